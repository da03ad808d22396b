//! # Entities
//!
//! The mapping engine never inspects entity types at run time. Each type
//! exposes a static table of [`FieldAccessor`]s and its relation names
//! ([`Entity`]); the engine drives it through the object-safe [`Node`]
//! capability interface, which [`MapEntity`](crate::MapEntity) implements as
//! well.

use std::any::Any;

use anyhow::{Result, anyhow, bail};
use trellis_sql::DataType;

/// Typed accessor pair for one scalar field of `T`.
pub struct FieldAccessor<T> {
    /// Logical field name, matched against column names.
    pub name: &'static str,

    /// Reads the field as a column value.
    pub get: fn(&T) -> DataType,

    /// Converts a column value and assigns it to the field.
    pub set: fn(&mut T, &DataType) -> Result<()>,
}

/// Statically described entity type.
///
/// Typically implemented via the `entity!` macro rather than manually.
pub trait Entity: Node + Default {
    /// Scalar field accessors, in declaration order.
    fn fields() -> &'static [FieldAccessor<Self>];

    /// Relation property names, in declaration order.
    fn relations() -> &'static [&'static str];

    /// Looks up a field accessor by name, exact match first, then ASCII
    /// case-insensitive.
    #[must_use]
    fn field(name: &str) -> Option<&'static FieldAccessor<Self>> {
        let fields = Self::fields();
        fields
            .iter()
            .find(|field| field.name == name)
            .or_else(|| fields.iter().find(|field| field.name.eq_ignore_ascii_case(name)))
    }
}

/// Capability interface shared by typed entities and map entities.
pub trait Node: Any {
    /// Scalar field names.
    fn field_names(&self) -> Vec<String>;

    /// Reads a scalar field.
    fn get_field(&self, name: &str) -> Option<DataType>;

    /// Writes a scalar field.
    ///
    /// # Errors
    ///
    /// Returns an error if the field does not exist or the value cannot be
    /// converted to the field type.
    fn set_field(&mut self, name: &str, value: &DataType) -> Result<()>;

    /// Open entities accept any column, not just declared fields.
    fn is_open(&self) -> bool {
        false
    }

    /// Looks up a relation property.
    fn relation(&self, name: &str) -> Option<&dyn Relation>;

    /// Looks up a relation property for mutation. Open entities create the
    /// container (a list when `many`) on first use.
    fn relation_mut(&mut self, name: &str, many: bool) -> Option<&mut dyn Relation>;

    /// Upcast for downcasting to the concrete type.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Owned upcast.
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

/// A relation property: `Vec<T>` for one-to-many, `Option<Box<T>>` for
/// one-to-one.
pub trait Relation {
    /// `true` for collection relations.
    fn is_many(&self) -> bool;

    /// Attached entities in order.
    fn items(&self) -> Vec<&dyn Node>;

    /// Attached entities in order, mutably.
    fn items_mut(&mut self) -> Vec<&mut dyn Node>;

    /// The most recently attached entity: the last list element, or the
    /// referenced entity.
    fn current_mut(&mut self) -> Option<&mut dyn Node>;

    /// Appends (list) or assigns (single reference) an entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity is not of the relation's element type.
    fn attach(&mut self, node: Box<dyn Node>) -> Result<()>;
}

impl<T: Node> Relation for Vec<T> {
    fn is_many(&self) -> bool {
        true
    }

    fn items(&self) -> Vec<&dyn Node> {
        self.iter().map(|item| item as &dyn Node).collect()
    }

    fn items_mut(&mut self) -> Vec<&mut dyn Node> {
        self.iter_mut().map(|item| item as &mut dyn Node).collect()
    }

    fn current_mut(&mut self) -> Option<&mut dyn Node> {
        self.last_mut().map(|item| item as &mut dyn Node)
    }

    fn attach(&mut self, node: Box<dyn Node>) -> Result<()> {
        self.push(downcast(node)?);
        Ok(())
    }
}

impl<T: Node> Relation for Option<Box<T>> {
    fn is_many(&self) -> bool {
        false
    }

    fn items(&self) -> Vec<&dyn Node> {
        self.as_deref().map(|item| item as &dyn Node).into_iter().collect()
    }

    fn items_mut(&mut self) -> Vec<&mut dyn Node> {
        self.as_deref_mut().map(|item| item as &mut dyn Node).into_iter().collect()
    }

    fn current_mut(&mut self) -> Option<&mut dyn Node> {
        self.as_deref_mut().map(|item| item as &mut dyn Node)
    }

    fn attach(&mut self, node: Box<dyn Node>) -> Result<()> {
        *self = Some(Box::new(downcast(node)?));
        Ok(())
    }
}

/// Recovers the concrete entity from a node produced by the engine.
///
/// # Errors
///
/// Returns an error if the node is not a `T`.
pub fn downcast<T: Node>(node: Box<dyn Node>) -> Result<T> {
    node.into_any()
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_e| anyhow!("entity is not a {}", std::any::type_name::<T>()))
}

// Shared `Node` plumbing for `entity!` expansions.
#[doc(hidden)]
pub fn __field_names<T: Entity>() -> Vec<String> {
    T::fields().iter().map(|field| field.name.to_string()).collect()
}

#[doc(hidden)]
pub fn __get_field<T: Entity>(entity: &T, name: &str) -> Option<DataType> {
    T::field(name).map(|field| (field.get)(entity))
}

#[doc(hidden)]
pub fn __set_field<T: Entity>(entity: &mut T, name: &str, value: &DataType) -> Result<()> {
    let Some(field) = T::field(name) else {
        bail!("{} has no field '{name}'", std::any::type_name::<T>());
    };
    (field.set)(entity, value).map_err(|err| err.context(format!("setting field '{name}'")))
}

/// Declares an entity struct with field accessors and relation properties.
///
/// Scalar fields must implement [`FieldValue`](crate::FieldValue). Relations
/// are declared as `many T` (a `Vec<T>`) or `one T` (an `Option<Box<T>>`).
///
/// # Examples
///
/// ```ignore
/// entity! {
///     #[derive(Debug, Clone, Default, PartialEq)]
///     pub struct Order {
///         pub id: i64,
///         pub customer: String,
///     }
///     relations {
///         pub lines: many OrderLine,
///         pub shipping: one Address,
///     }
/// }
/// ```
#[macro_export]
macro_rules! entity {
    // Full form: struct + relations (single code-generation arm)
    (
        $(#[$meta:meta])*
        pub struct $struct_name:ident {
            $(
                $(#[$field_meta:meta])*
                pub $field_name:ident : $field_type:ty
            ),* $(,)?
        }
        relations {
            $(
                $(#[$rel_meta:meta])*
                pub $rel_name:ident : $rel_kind:ident $rel_type:ty
            ),* $(,)?
        }
    ) => {
        #[allow(missing_docs)]
        $(#[$meta])*
        pub struct $struct_name {
            $(
                $(#[$field_meta])*
                pub $field_name : $field_type,
            )*
            $(
                $(#[$rel_meta])*
                pub $rel_name : $crate::__relation_type!($rel_kind $rel_type),
            )*
        }

        impl $crate::Entity for $struct_name {
            fn fields() -> &'static [$crate::FieldAccessor<Self>] {
                const FIELDS: &[$crate::FieldAccessor<$struct_name>] = &[
                    $(
                        $crate::FieldAccessor {
                            name: stringify!($field_name),
                            get: |entity: &$struct_name| {
                                $crate::FieldValue::to_value(&entity.$field_name)
                            },
                            set: |entity: &mut $struct_name, value: &$crate::__private::DataType| {
                                entity.$field_name =
                                    <$field_type as $crate::FieldValue>::from_value(value)?;
                                Ok(())
                            },
                        },
                    )*
                ];
                FIELDS
            }

            fn relations() -> &'static [&'static str] {
                &[ $( stringify!($rel_name) ),* ]
            }
        }

        impl $crate::Node for $struct_name {
            fn field_names(&self) -> Vec<String> {
                $crate::__private::__field_names::<Self>()
            }

            fn get_field(&self, name: &str) -> Option<$crate::__private::DataType> {
                $crate::__private::__get_field(self, name)
            }

            fn set_field(
                &mut self, name: &str, value: &$crate::__private::DataType,
            ) -> $crate::__private::anyhow::Result<()> {
                $crate::__private::__set_field(self, name, value)
            }

            fn relation(&self, name: &str) -> Option<&dyn $crate::Relation> {
                match name {
                    $(
                        n if n.eq_ignore_ascii_case(stringify!($rel_name)) => {
                            Some(&self.$rel_name as &dyn $crate::Relation)
                        }
                    )*
                    _ => None,
                }
            }

            fn relation_mut(
                &mut self, name: &str, _many: bool,
            ) -> Option<&mut dyn $crate::Relation> {
                match name {
                    $(
                        n if n.eq_ignore_ascii_case(stringify!($rel_name)) => {
                            Some(&mut self.$rel_name as &mut dyn $crate::Relation)
                        }
                    )*
                    _ => None,
                }
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
                self
            }

            fn into_any(self: Box<Self>) -> Box<dyn ::std::any::Any> {
                self
            }
        }
    };

    // No relations → forward with an empty relations block
    (
        $(#[$meta:meta])*
        pub struct $struct_name:ident { $($body:tt)* }
    ) => {
        $crate::entity! {
            $(#[$meta])*
            pub struct $struct_name { $($body)* }
            relations {}
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __relation_type {
    (many $ty:ty) => {
        ::std::vec::Vec<$ty>
    };
    (one $ty:ty) => {
        ::std::option::Option<::std::boxed::Box<$ty>>
    };
}
