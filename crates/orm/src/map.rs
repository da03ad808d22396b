//! Generic map entity for rule trees without a typed result shape.

use std::any::Any;

use anyhow::Result;
use indexmap::IndexMap;
use trellis_sql::DataType;

use crate::entity::{Node, Relation};

/// One entry of a [`MapEntity`].
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    /// Scalar column value.
    Value(DataType),
    /// One-to-one relation.
    One(Option<Box<MapEntity>>),
    /// One-to-many relation.
    Many(Vec<MapEntity>),
}

/// Ordered key/value entity.
///
/// Keys keep the order in which columns were first bound. Lookups ignore
/// ASCII case. Relation containers are created the first time the engine
/// attaches to them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapEntity {
    slots: IndexMap<String, Slot>,
}

impl MapEntity {
    /// Creates an empty entity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an entity from scalar pairs.
    #[must_use]
    pub fn from_pairs<N, V>(pairs: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<DataType>,
    {
        let mut entity = Self::new();
        for (name, value) in pairs {
            entity.set(name, value);
        }
        entity
    }

    /// Sets a scalar value, replacing any slot of the same name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<DataType>) {
        let name = name.into();
        let key = self.key(&name).map_or(name, str::to_string);
        self.slots.insert(key, Slot::Value(value.into()));
    }

    /// Returns a scalar value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&DataType> {
        match self.slot(name)? {
            Slot::Value(value) => Some(value),
            Slot::One(_) | Slot::Many(_) => None,
        }
    }

    /// Returns the entity referenced by a one-to-one slot.
    #[must_use]
    pub fn one(&self, name: &str) -> Option<&Self> {
        match self.slot(name)? {
            Slot::One(item) => item.as_deref(),
            Slot::Value(_) | Slot::Many(_) => None,
        }
    }

    /// Returns the entities of a one-to-many slot; empty when absent.
    #[must_use]
    pub fn many(&self, name: &str) -> &[Self] {
        match self.slot(name) {
            Some(Slot::Many(items)) => items,
            _ => &[],
        }
    }

    /// Iterates slots in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Slot)> {
        self.slots.iter().map(|(name, slot)| (name.as_str(), slot))
    }

    /// Converts the entity, relations included, to a JSON object. Binary
    /// values are base64 encoded.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let object = self
            .slots
            .iter()
            .map(|(name, slot)| {
                let value = match slot {
                    Slot::Value(value) => value.to_json(),
                    Slot::One(item) => {
                        item.as_ref().map_or(serde_json::Value::Null, |item| item.to_json())
                    }
                    Slot::Many(items) => items.iter().map(Self::to_json).collect(),
                };
                (name.clone(), value)
            })
            .collect();
        serde_json::Value::Object(object)
    }

    fn key(&self, name: &str) -> Option<&str> {
        if let Some((key, _)) = self.slots.get_key_value(name) {
            return Some(key);
        }
        self.slots.keys().find(|key| key.eq_ignore_ascii_case(name)).map(String::as_str)
    }

    fn slot(&self, name: &str) -> Option<&Slot> {
        self.key(name).and_then(|key| self.slots.get(key))
    }
}

impl Node for MapEntity {
    fn field_names(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Value(_)))
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn get_field(&self, name: &str) -> Option<DataType> {
        self.get(name).cloned()
    }

    fn set_field(&mut self, name: &str, value: &DataType) -> Result<()> {
        self.set(name, value.clone());
        Ok(())
    }

    fn is_open(&self) -> bool {
        true
    }

    fn relation(&self, name: &str) -> Option<&dyn Relation> {
        match self.slot(name)? {
            Slot::One(item) => Some(item as &dyn Relation),
            Slot::Many(items) => Some(items as &dyn Relation),
            Slot::Value(_) => None,
        }
    }

    fn relation_mut(&mut self, name: &str, many: bool) -> Option<&mut dyn Relation> {
        let key = match self.key(name) {
            Some(key) => key.to_string(),
            None => {
                let slot = if many { Slot::Many(Vec::new()) } else { Slot::One(None) };
                self.slots.insert(name.to_string(), slot);
                name.to_string()
            }
        };

        match self.slots.get_mut(&key)? {
            Slot::One(item) => Some(item as &mut dyn Relation),
            Slot::Many(items) => Some(items as &mut dyn Relation),
            Slot::Value(_) => None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}
