//! # Rows
//!
//! A [`Row`] interprets one record through the lens of one [`Rule`]. The
//! column map is shared between scopes, so re-scoping a fetched record to
//! each rule of the tree never copies values.

use std::rc::Rc;

use anyhow::Result;
use indexmap::IndexMap;
use trellis_sql::{DataType, Record};

use crate::rule::Rule;
use crate::value::FieldValue;

/// Separator between key values in a signature.
pub(crate) const KEY_SEPARATOR: char = '\u{1f}';

static NULL: DataType = DataType::null();

/// Outcome of boundary detection for one row at one rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// The row starts a new instance.
    New,
    /// The row continues the instance started by an earlier row.
    Continuation,
    /// A unique key is `NULL` or missing: there is no instance here.
    Absent,
}

/// One record scoped to a rule.
#[derive(Debug, Clone)]
pub struct Row<'r> {
    columns: Rc<IndexMap<String, DataType>>,
    rule: &'r Rule,
    primary_keys: Vec<String>,
    lock_current: Vec<(String, DataType)>,
    lineage: Vec<usize>,
}

impl<'r> Row<'r> {
    /// Wraps a fetched record. When a column name repeats, the first
    /// occurrence wins.
    #[must_use]
    pub fn new(rule: &'r Rule, record: Record) -> Self {
        let mut columns = IndexMap::with_capacity(record.fields.len());
        for field in record.fields {
            columns.entry(field.name).or_insert(field.value);
        }
        Self::shared(rule, Rc::new(columns))
    }

    /// Wraps a column map.
    #[must_use]
    pub fn from_columns(rule: &'r Rule, columns: IndexMap<String, DataType>) -> Self {
        Self::shared(rule, Rc::new(columns))
    }

    pub(crate) fn shared(rule: &'r Rule, columns: Rc<IndexMap<String, DataType>>) -> Self {
        Self {
            columns,
            rule,
            primary_keys: Vec::new(),
            lock_current: Vec::new(),
            lineage: Vec::new(),
        }
    }

    pub(crate) fn shared_columns(&self) -> Rc<IndexMap<String, DataType>> {
        Rc::clone(&self.columns)
    }

    /// The same record seen through another rule.
    #[must_use]
    pub fn scope<'s>(&self, rule: &'s Rule) -> Row<'s> {
        Row::shared(rule, Rc::clone(&self.columns))
    }

    /// Sets the table's primary-key columns.
    #[must_use]
    pub fn with_primary_keys(mut self, keys: Vec<String>) -> Self {
        self.primary_keys = keys;
        self
    }

    /// Sets the lock values expected in the store.
    #[must_use]
    pub fn with_lock_current(mut self, current: Vec<(String, DataType)>) -> Self {
        self.lock_current = current;
        self
    }

    /// Sets the instance ordinals along the expression path.
    #[must_use]
    pub fn with_lineage(mut self, lineage: Vec<usize>) -> Self {
        self.lineage = lineage;
        self
    }

    /// The rule this row is scoped to.
    #[must_use]
    pub const fn rule(&self) -> &'r Rule {
        self.rule
    }

    /// Expression path of the rule.
    #[must_use]
    pub fn path(&self) -> &'r str {
        self.rule.path()
    }

    /// Target table of the rule.
    #[must_use]
    pub fn table(&self) -> Option<&'r str> {
        self.rule.table_name()
    }

    /// Primary-key columns.
    #[must_use]
    pub fn primary_keys(&self) -> &[String] {
        &self.primary_keys
    }

    /// Lock columns paired with the values expected in the store.
    #[must_use]
    pub fn lock_current(&self) -> &[(String, DataType)] {
        &self.lock_current
    }

    /// Instance ordinals along the expression path, outermost first.
    #[must_use]
    pub fn lineage(&self) -> &[usize] {
        &self.lineage
    }

    /// Columns in record order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &DataType)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Reads a column by its full name: exact match first, then ASCII
    /// case-insensitive.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&DataType> {
        self.columns.get(name).or_else(|| {
            self.columns.iter().find(|(key, _)| key.eq_ignore_ascii_case(name)).map(|(_, v)| v)
        })
    }

    /// Reads a field, applying the rule's column prefix.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&DataType> {
        let prefix = self.rule.column_prefix();
        if prefix.is_empty() {
            self.column(field)
        } else {
            self.column(&format!("{prefix}{field}"))
        }
    }

    /// Reads and converts a field. A missing column reads as `NULL`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be converted to `T`.
    pub fn value<T: FieldValue>(&self, field: &str) -> Result<T> {
        T::from_value(self.get(field).unwrap_or(&NULL))
    }

    /// Writes a column by its full name. Other scopes sharing the record are
    /// unaffected.
    pub fn set(&mut self, column: &str, value: DataType) {
        let columns = Rc::make_mut(&mut self.columns);
        let key = columns
            .keys()
            .find(|key| key.eq_ignore_ascii_case(column))
            .cloned()
            .unwrap_or_else(|| column.to_string());
        columns.insert(key, value);
    }

    /// Decides whether this row starts a new instance at its rule, given the
    /// immediately preceding row.
    #[must_use]
    pub fn boundary(&self, previous: Option<&Row>) -> Boundary {
        let keys = self.rule.unique_keys();
        if keys.is_empty() && self.rule.is_root() {
            return Boundary::New;
        }
        if keys.iter().any(|key| self.get(key).is_none_or(DataType::is_null)) {
            return Boundary::Absent;
        }
        let Some(previous) = previous else {
            return Boundary::New;
        };

        let changed = self.preceding_keys(previous).iter().any(|column| {
            !same_value(self.column(column), previous.column(column))
        });
        if changed { Boundary::New } else { Boundary::Continuation }
    }

    /// `true` when this row starts a new instance at its rule.
    #[must_use]
    pub fn can_create(&self, previous: Option<&Row>) -> bool {
        self.boundary(previous) == Boundary::New
    }

    /// Full column names compared against the preceding row: the union of
    /// both rows' prefixed unique keys.
    #[must_use]
    pub fn preceding_keys(&self, previous: &Row) -> Vec<String> {
        let mut union = prefixed_keys(previous.rule);
        for column in prefixed_keys(self.rule) {
            if !union.iter().any(|known| known.eq_ignore_ascii_case(&column)) {
                union.push(column);
            }
        }
        union
    }

    /// Unique-key values joined into one string; `None` when any key is
    /// `NULL` or missing.
    #[must_use]
    pub fn signature(&self) -> Option<String> {
        let mut parts = Vec::with_capacity(self.rule.unique_keys().len());
        for key in self.rule.unique_keys() {
            parts.push(self.get(key).and_then(DataType::render)?);
        }
        Some(parts.join(&KEY_SEPARATOR.to_string()))
    }

    /// Expression path plus primary-key values; `None` when a key is `NULL`
    /// (the row has never been stored) or the table has no primary key.
    #[must_use]
    pub fn identity(&self) -> Option<String> {
        if self.primary_keys.is_empty() {
            return None;
        }
        let mut parts = Vec::with_capacity(self.primary_keys.len());
        for key in &self.primary_keys {
            parts.push(self.column(key).and_then(DataType::render)?);
        }
        Some(format!("{}[{}]", self.path(), parts.join(",")))
    }
}

fn prefixed_keys(rule: &Rule) -> Vec<String> {
    let prefix = rule.column_prefix();
    rule.unique_keys().iter().map(|key| format!("{prefix}{key}")).collect()
}

// Null and missing compare equal to each other and unequal to any value.
fn same_value(a: Option<&DataType>, b: Option<&DataType>) -> bool {
    let a = a.and_then(DataType::render);
    let b = b.and_then(DataType::render);
    a == b
}
