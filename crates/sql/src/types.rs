//! Values and records exchanged with a database connection.

use anyhow::{Result, bail};
use base64ct::{Base64, Encoding};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sea_query::{Value, Values};

/// A single nullable column value.
///
/// Date, time and timestamp values travel as their canonical text so that
/// every backend can bind them without a driver-specific temporal type.
#[derive(Debug, Clone, PartialEq)]
pub enum DataType {
    /// Boolean value.
    Boolean(Option<bool>),
    /// 32-bit signed integer.
    Int32(Option<i32>),
    /// 64-bit signed integer.
    Int64(Option<i64>),
    /// 32-bit unsigned integer.
    Uint32(Option<u32>),
    /// 64-bit unsigned integer.
    Uint64(Option<u64>),
    /// Single precision float.
    Float(Option<f32>),
    /// Double precision float.
    Double(Option<f64>),
    /// Text.
    Str(Option<String>),
    /// Raw bytes.
    Binary(Option<Vec<u8>>),
    /// Date formatted as `%Y-%m-%d`.
    Date(Option<String>),
    /// Time formatted as `%H:%M:%S%.f`.
    Time(Option<String>),
    /// Timestamp formatted as RFC 3339 or `%Y-%m-%d %H:%M:%S%.f`.
    Timestamp(Option<String>),
}

impl DataType {
    /// The untyped SQL `NULL`.
    #[must_use]
    pub const fn null() -> Self {
        Self::Str(None)
    }

    /// Returns `true` when the value is SQL `NULL`, whatever its variant.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(
            self,
            Self::Boolean(None)
                | Self::Int32(None)
                | Self::Int64(None)
                | Self::Uint32(None)
                | Self::Uint64(None)
                | Self::Float(None)
                | Self::Double(None)
                | Self::Str(None)
                | Self::Binary(None)
                | Self::Date(None)
                | Self::Time(None)
                | Self::Timestamp(None)
        )
    }

    /// Stable text rendering used for key signatures and row identities.
    ///
    /// Integers render identically regardless of width so that a key read
    /// back as `Int64` matches the same key supplied as `Int32`.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        match self {
            Self::Boolean(Some(v)) => Some(v.to_string()),
            Self::Int32(Some(v)) => Some(v.to_string()),
            Self::Int64(Some(v)) => Some(v.to_string()),
            Self::Uint32(Some(v)) => Some(v.to_string()),
            Self::Uint64(Some(v)) => Some(v.to_string()),
            Self::Float(Some(v)) => Some(v.to_string()),
            Self::Double(Some(v)) => Some(v.to_string()),
            Self::Str(Some(v))
            | Self::Date(Some(v))
            | Self::Time(Some(v))
            | Self::Timestamp(Some(v)) => Some(v.clone()),
            Self::Binary(Some(v)) => Some(Base64::encode_string(v)),
            _ => None,
        }
    }

    /// Converts the value to JSON. Binary values are base64 encoded.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;

        match self {
            Self::Int32(Some(v)) => Json::Number((*v).into()),
            Self::Int64(Some(v)) => Json::Number((*v).into()),
            Self::Uint32(Some(v)) => Json::Number((*v).into()),
            Self::Uint64(Some(v)) => Json::Number((*v).into()),
            Self::Float(Some(v)) => {
                serde_json::Number::from_f64(f64::from(*v)).map_or(Json::Null, Json::Number)
            }
            Self::Double(Some(v)) => {
                serde_json::Number::from_f64(*v).map_or(Json::Null, Json::Number)
            }
            Self::Boolean(Some(v)) => Json::Bool(*v),
            Self::Str(Some(v))
            | Self::Date(Some(v))
            | Self::Time(Some(v))
            | Self::Timestamp(Some(v)) => Json::String(v.clone()),
            Self::Binary(Some(v)) => Json::String(Base64::encode_string(v)),
            _ => Json::Null,
        }
    }
}

impl From<bool> for DataType {
    fn from(v: bool) -> Self {
        Self::Boolean(Some(v))
    }
}

impl From<i32> for DataType {
    fn from(v: i32) -> Self {
        Self::Int32(Some(v))
    }
}

impl From<i64> for DataType {
    fn from(v: i64) -> Self {
        Self::Int64(Some(v))
    }
}

impl From<u32> for DataType {
    fn from(v: u32) -> Self {
        Self::Uint32(Some(v))
    }
}

impl From<u64> for DataType {
    fn from(v: u64) -> Self {
        Self::Uint64(Some(v))
    }
}

impl From<f32> for DataType {
    fn from(v: f32) -> Self {
        Self::Float(Some(v))
    }
}

impl From<f64> for DataType {
    fn from(v: f64) -> Self {
        Self::Double(Some(v))
    }
}

impl From<String> for DataType {
    fn from(v: String) -> Self {
        Self::Str(Some(v))
    }
}

impl From<&str> for DataType {
    fn from(v: &str) -> Self {
        Self::Str(Some(v.to_string()))
    }
}

impl From<Vec<u8>> for DataType {
    fn from(v: Vec<u8>) -> Self {
        Self::Binary(Some(v))
    }
}

impl From<NaiveDate> for DataType {
    fn from(v: NaiveDate) -> Self {
        Self::Date(Some(v.to_string()))
    }
}

impl From<NaiveDateTime> for DataType {
    fn from(v: NaiveDateTime) -> Self {
        Self::Timestamp(Some(v.to_string()))
    }
}

impl From<DateTime<Utc>> for DataType {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(Some(v.to_rfc3339()))
    }
}

impl<T: Into<Self>> From<Option<T>> for DataType {
    fn from(v: Option<T>) -> Self {
        v.map_or_else(Self::null, Into::into)
    }
}

/// A named column value within a [`Record`].
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Column name as reported by the result set.
    pub name: String,

    /// Column value.
    pub value: DataType,
}

/// One materialized record from a result stream.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    /// Zero-based position of the record in its result stream.
    pub index: usize,

    /// Column values in result-set order.
    pub fields: Vec<Field>,
}

impl Record {
    /// Builds a record from `(column, value)` pairs.
    #[must_use]
    pub fn from_pairs<N, V>(index: usize, pairs: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<DataType>,
    {
        let fields = pairs
            .into_iter()
            .map(|(name, value)| Field {
                name: name.into(),
                value: value.into(),
            })
            .collect();
        Self { index, fields }
    }

    /// Returns the value of the named column, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&DataType> {
        self.fields.iter().find(|field| field.name == name).map(|field| &field.value)
    }
}

/// Converts records to a JSON array of objects.
#[must_use]
pub fn into_json(records: Vec<Record>) -> serde_json::Value {
    let rows = records
        .into_iter()
        .map(|record| {
            let mut map = serde_json::Map::new();
            for field in record.fields {
                map.insert(field.name, field.value.to_json());
            }
            serde_json::Value::Object(map)
        })
        .collect();
    serde_json::Value::Array(rows)
}

// Outbound conversion (statement building)
pub(crate) fn datatype_to_value(value: DataType) -> Value {
    match value {
        DataType::Boolean(v) => Value::Bool(v),
        DataType::Int32(v) => Value::Int(v),
        DataType::Int64(v) => Value::BigInt(v),
        DataType::Uint32(v) => Value::Unsigned(v),
        DataType::Uint64(v) => Value::BigUnsigned(v),
        DataType::Float(v) => Value::Float(v),
        DataType::Double(v) => Value::Double(v),
        DataType::Str(v) | DataType::Date(v) | DataType::Time(v) | DataType::Timestamp(v) => {
            Value::String(v.map(Box::new))
        }
        DataType::Binary(v) => Value::Bytes(v.map(Box::new)),
    }
}

// Inbound conversion (bound parameters recovered from a built statement)
pub(crate) fn values_to_datatypes(values: Values) -> Result<Vec<DataType>> {
    values.into_iter().map(value_to_datatype).collect()
}

fn value_to_datatype(value: Value) -> Result<DataType> {
    let data_type = match value {
        Value::Bool(v) => DataType::Boolean(v),
        Value::TinyInt(v) => DataType::Int32(v.map(i32::from)),
        Value::SmallInt(v) => DataType::Int32(v.map(i32::from)),
        Value::Int(v) => DataType::Int32(v),
        Value::BigInt(v) => DataType::Int64(v),
        Value::TinyUnsigned(v) => DataType::Uint32(v.map(u32::from)),
        Value::SmallUnsigned(v) => DataType::Uint32(v.map(u32::from)),
        Value::Unsigned(v) => DataType::Uint32(v),
        Value::BigUnsigned(v) => DataType::Uint64(v),
        Value::Float(v) => DataType::Float(v),
        Value::Double(v) => DataType::Double(v),
        Value::String(v) => DataType::Str(v.map(|value| *value)),
        Value::Char(v) => DataType::Str(v.map(|ch| ch.to_string())),
        Value::Bytes(v) => DataType::Binary(v.map(|bytes| *bytes)),
        Value::ChronoDate(v) => DataType::Date(v.map(|date| date.to_string())),
        Value::ChronoTime(v) => DataType::Time(v.map(|time| time.to_string())),
        Value::ChronoDateTime(v) => DataType::Timestamp(v.map(|dt| dt.to_string())),
        Value::ChronoDateTimeUtc(v) => DataType::Timestamp(v.map(|dt| dt.to_rfc3339())),
        _ => {
            bail!("unsupported values require explicit conversion before building the statement")
        }
    };
    Ok(data_type)
}
