//! Typed field values.
//!
//! [`FieldValue`] converts between entity field types and [`DataType`]. The
//! exact variant is accepted first; otherwise the value is coerced: numeric
//! widening and range-checked narrowing, numeric text parsing, booleans from
//! integers or text, and `NULL` through `Option<T>`.

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use trellis_sql::DataType;

/// Conversion between an entity field type and a column value.
pub trait FieldValue: Sized {
    /// Converts a column value into the field type.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is `NULL` for a non-optional type or
    /// cannot be coerced.
    fn from_value(value: &DataType) -> Result<Self>;

    /// Converts the field into a column value.
    fn to_value(&self) -> DataType;
}

impl FieldValue for bool {
    fn from_value(value: &DataType) -> Result<Self> {
        match value {
            DataType::Boolean(Some(v)) => Ok(*v),
            DataType::Str(Some(raw)) => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "1" => Ok(true),
                "false" | "f" | "no" | "n" | "0" => Ok(false),
                _ => bail!("cannot convert '{raw}' to boolean"),
            },
            other => Ok(as_i128(other, "boolean")? != 0),
        }
    }

    fn to_value(&self) -> DataType {
        DataType::Boolean(Some(*self))
    }
}

macro_rules! integer_value {
    ($($ty:ty => $variant:ident, $label:literal);* $(;)?) => {
        $(
            impl FieldValue for $ty {
                fn from_value(value: &DataType) -> Result<Self> {
                    if let DataType::$variant(Some(v)) = value {
                        return Ok(*v);
                    }
                    let wide = as_i128(value, $label)?;
                    <$ty>::try_from(wide).map_err(|_e| anyhow!("{wide} is out of range for {}", $label))
                }

                fn to_value(&self) -> DataType {
                    DataType::$variant(Some(*self))
                }
            }
        )*
    };
}

integer_value! {
    i32 => Int32, "int32";
    i64 => Int64, "int64";
    u32 => Uint32, "uint32";
    u64 => Uint64, "uint64";
}

impl FieldValue for f64 {
    fn from_value(value: &DataType) -> Result<Self> {
        as_f64(value, "double")
    }

    fn to_value(&self) -> DataType {
        DataType::Double(Some(*self))
    }
}

impl FieldValue for f32 {
    #[allow(clippy::cast_possible_truncation)]
    fn from_value(value: &DataType) -> Result<Self> {
        if let DataType::Float(Some(v)) = value {
            return Ok(*v);
        }
        Ok(as_f64(value, "float")? as Self)
    }

    fn to_value(&self) -> DataType {
        DataType::Float(Some(*self))
    }
}

impl FieldValue for String {
    fn from_value(value: &DataType) -> Result<Self> {
        match value {
            DataType::Binary(Some(bytes)) => {
                Self::from_utf8(bytes.clone()).context("binary value is not valid UTF-8")
            }
            other => other.render().ok_or_else(|| anyhow!("expected string, found NULL")),
        }
    }

    fn to_value(&self) -> DataType {
        DataType::Str(Some(self.clone()))
    }
}

impl FieldValue for Vec<u8> {
    fn from_value(value: &DataType) -> Result<Self> {
        match value {
            DataType::Binary(Some(bytes)) => Ok(bytes.clone()),
            DataType::Str(Some(raw)) => Ok(raw.as_bytes().to_vec()),
            _ => bail!("expected binary data type"),
        }
    }

    fn to_value(&self) -> DataType {
        DataType::Binary(Some(self.clone()))
    }
}

impl FieldValue for NaiveDate {
    fn from_value(value: &DataType) -> Result<Self> {
        let raw = temporal_text(value, "date")?;
        // timestamps are accepted and truncated to their date
        let date = raw.get(..10).unwrap_or(raw);
        Self::parse_from_str(date, "%Y-%m-%d")
            .map_err(|_e| anyhow!("unsupported date: {raw}; expected \"%Y-%m-%d\" format"))
    }

    fn to_value(&self) -> DataType {
        DataType::Date(Some(self.to_string()))
    }
}

impl FieldValue for NaiveDateTime {
    fn from_value(value: &DataType) -> Result<Self> {
        let raw = temporal_text(value, "timestamp")?;
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Ok(parsed.naive_utc());
        }
        Self::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
            .or_else(|_| Self::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
            .map_err(|_e| anyhow!("unsupported timestamp: {raw}"))
    }

    fn to_value(&self) -> DataType {
        DataType::Timestamp(Some(self.to_string()))
    }
}

impl FieldValue for DateTime<Utc> {
    fn from_value(value: &DataType) -> Result<Self> {
        let raw = temporal_text(value, "timestamp")?;
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Ok(parsed.with_timezone(&Utc));
        }
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
            return Ok(Self::from_naive_utc_and_offset(parsed, Utc));
        }
        bail!("unsupported timestamp: {raw}; expected RFC3339 or \"%Y-%m-%d %H:%M:%S%.f\" format")
    }

    fn to_value(&self) -> DataType {
        DataType::Timestamp(Some(self.to_rfc3339()))
    }
}

impl FieldValue for serde_json::Value {
    fn from_value(value: &DataType) -> Result<Self> {
        match value {
            DataType::Str(Some(raw)) => Ok(serde_json::from_str(raw)?),
            DataType::Binary(Some(bytes)) => Ok(serde_json::from_slice(bytes)?),
            _ => bail!("expected json compatible data type"),
        }
    }

    fn to_value(&self) -> DataType {
        DataType::Str(Some(self.to_string()))
    }
}

impl<T: FieldValue> FieldValue for Option<T> {
    fn from_value(value: &DataType) -> Result<Self> {
        if value.is_null() { Ok(None) } else { T::from_value(value).map(Some) }
    }

    fn to_value(&self) -> DataType {
        self.as_ref().map_or_else(DataType::null, FieldValue::to_value)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn as_i128(value: &DataType, label: &str) -> Result<i128> {
    match value {
        DataType::Boolean(Some(v)) => Ok(i128::from(*v)),
        DataType::Int32(Some(v)) => Ok(i128::from(*v)),
        DataType::Int64(Some(v)) => Ok(i128::from(*v)),
        DataType::Uint32(Some(v)) => Ok(i128::from(*v)),
        DataType::Uint64(Some(v)) => Ok(i128::from(*v)),
        DataType::Float(Some(v)) if v.fract() == 0.0 => Ok(*v as i128),
        DataType::Double(Some(v)) if v.fract() == 0.0 => Ok(*v as i128),
        DataType::Str(Some(raw)) => {
            raw.trim().parse().map_err(|_e| anyhow!("cannot convert '{raw}' to {label}"))
        }
        v if v.is_null() => bail!("expected {label}, found NULL"),
        _ => bail!("cannot convert {value:?} to {label}"),
    }
}

#[allow(clippy::cast_precision_loss)]
fn as_f64(value: &DataType, label: &str) -> Result<f64> {
    match value {
        DataType::Double(Some(v)) => Ok(*v),
        DataType::Float(Some(v)) => Ok(f64::from(*v)),
        DataType::Int32(Some(v)) => Ok(f64::from(*v)),
        DataType::Uint32(Some(v)) => Ok(f64::from(*v)),
        DataType::Int64(Some(v)) => Ok(*v as f64),
        DataType::Uint64(Some(v)) => Ok(*v as f64),
        DataType::Str(Some(raw)) => {
            raw.trim().parse().map_err(|_e| anyhow!("cannot convert '{raw}' to {label}"))
        }
        v if v.is_null() => bail!("expected {label}, found NULL"),
        _ => bail!("cannot convert {value:?} to {label}"),
    }
}

fn temporal_text<'a>(value: &'a DataType, label: &str) -> Result<&'a str> {
    match value {
        DataType::Date(Some(raw))
        | DataType::Time(Some(raw))
        | DataType::Timestamp(Some(raw))
        | DataType::Str(Some(raw)) => Ok(raw),
        v if v.is_null() => bail!("expected {label}, found NULL"),
        _ => bail!("expected {label} data type"),
    }
}
