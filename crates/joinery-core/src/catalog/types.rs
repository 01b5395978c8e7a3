//! Scalar types and default values for entity fields.

use crate::error::Error;
use joinery_proto::Value;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Semantic type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    /// Boolean.
    Bool,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 32-bit float.
    Float32,
    /// 64-bit float.
    Float64,
    /// UTF-8 string.
    String,
    /// Raw bytes.
    Bytes,
    /// Microseconds since the Unix epoch.
    Timestamp,
    /// 128-bit UUID.
    Uuid,
}

impl ScalarType {
    /// Check if this type is a numeric type.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ScalarType::Int32 | ScalarType::Int64 | ScalarType::Float32 | ScalarType::Float64
        )
    }

    /// Check if values of this type can serve as auto-increment keys.
    pub fn is_integer(&self) -> bool {
        matches!(self, ScalarType::Int32 | ScalarType::Int64)
    }

    /// Wrap an integer in the value variant matching this type.
    pub fn integer_value(&self, n: i64) -> Result<Value, Error> {
        match self {
            ScalarType::Int32 => i32::try_from(n).map(Value::Int32).map_err(|_| {
                Error::Persistence(format!("integer {} does not fit an int32 field", n))
            }),
            _ => Ok(Value::Int64(n)),
        }
    }
}

/// Default applied to a missing field when a row is prepared for saving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValue {
    /// Explicit null.
    Null,
    /// Fixed boolean.
    Bool(bool),
    /// Fixed integer.
    Int(i64),
    /// Fixed float.
    Float(f64),
    /// Fixed string.
    String(String),
    /// Current time at preparation.
    CurrentTimestamp,
}

impl DefaultValue {
    /// Produce the value for a field of the given type.
    pub fn evaluate(&self, field_type: ScalarType) -> Result<Value, Error> {
        let value = match self {
            DefaultValue::Null => Value::Null,
            DefaultValue::Bool(b) => Value::Bool(*b),
            DefaultValue::Int(n) => match field_type {
                ScalarType::Float32 => Value::Float32(*n as f32),
                ScalarType::Float64 => Value::Float64(*n as f64),
                other => other.integer_value(*n)?,
            },
            DefaultValue::Float(f) => match field_type {
                ScalarType::Float32 => Value::Float32(*f as f32),
                _ => Value::Float64(*f),
            },
            DefaultValue::String(s) => Value::String(s.clone()),
            DefaultValue::CurrentTimestamp => Value::Timestamp(current_timestamp()),
        };
        Ok(value)
    }
}

fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_type_checks() {
        assert!(ScalarType::Int32.is_numeric());
        assert!(ScalarType::Float64.is_numeric());
        assert!(!ScalarType::String.is_numeric());
        assert!(ScalarType::Int64.is_integer());
        assert!(!ScalarType::Float32.is_integer());
        assert_eq!(ScalarType::Int32.integer_value(7).unwrap(), Value::Int32(7));
        assert_eq!(ScalarType::Int64.integer_value(7).unwrap(), Value::Int64(7));
    }

    #[test]
    fn test_integer_value_out_of_range() {
        let too_big = i64::from(i32::MAX) + 1;
        assert!(matches!(
            ScalarType::Int32.integer_value(too_big),
            Err(Error::Persistence(_))
        ));
        assert_eq!(
            ScalarType::Int64.integer_value(too_big).unwrap(),
            Value::Int64(too_big)
        );
        assert!(DefaultValue::Int(too_big).evaluate(ScalarType::Int32).is_err());
    }

    #[test]
    fn test_default_follows_field_type() {
        assert_eq!(DefaultValue::Int(3).evaluate(ScalarType::Int32).unwrap(), Value::Int32(3));
        assert_eq!(
            DefaultValue::Int(3).evaluate(ScalarType::Float64).unwrap(),
            Value::Float64(3.0)
        );
        assert_eq!(
            DefaultValue::String("draft".into()).evaluate(ScalarType::String).unwrap(),
            Value::String("draft".into())
        );
        assert!(matches!(
            DefaultValue::CurrentTimestamp.evaluate(ScalarType::Timestamp),
            Ok(Value::Timestamp(t)) if t > 0
        ));
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&ScalarType::Int64).unwrap();
        assert_eq!(json, "\"int64\"");
        let parsed: DefaultValue = serde_json::from_str("{\"int\":5}").unwrap();
        assert_eq!(parsed, DefaultValue::Int(5));
    }
}
