//! SQL value types carried between records, staging tables and output rows.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::schema::ScalarType;
use crate::error::{Result, SyncError};

/// SQL value enum for type-safe row handling.
///
/// Only the scalar families the staging path can carry are represented.
/// NULL carries no type hint: the destination column descriptor decides the
/// wire type when the value is encoded.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL.
    Null,

    /// Boolean value (bit).
    Bool(bool),

    /// 16-bit signed integer (smallint).
    I16(i16),

    /// 32-bit signed integer (int).
    I32(i32),

    /// 64-bit signed integer (bigint).
    I64(i64),

    /// Decimal value with arbitrary precision.
    Decimal(Decimal),

    /// Text data.
    Text(String),

    /// UUID/GUID value.
    Uuid(Uuid),

    /// Timestamp without timezone.
    DateTime(NaiveDateTime),
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Widen any integer variant to i64.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::I16(v) => Some(i64::from(*v)),
            SqlValue::I32(v) => Some(i64::from(*v)),
            SqlValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Whether an identity-style value marks a not-yet-persisted row.
    ///
    /// NULL counts as zero.
    #[must_use]
    pub fn is_unsaved_identity(&self) -> bool {
        match self {
            SqlValue::Null => true,
            SqlValue::Decimal(d) => d.is_zero(),
            other => other.as_i64() == Some(0),
        }
    }

    /// Build an integer value of the width the column type expects.
    pub fn integer_for(scalar: &ScalarType, value: i64) -> Result<SqlValue> {
        let out_of_range = || {
            SyncError::Record(format!(
                "value {} does not fit column type {}",
                value, scalar
            ))
        };
        match scalar {
            ScalarType::SmallInt => i16::try_from(value)
                .map(SqlValue::I16)
                .map_err(|_| out_of_range()),
            ScalarType::Int => i32::try_from(value)
                .map(SqlValue::I32)
                .map_err(|_| out_of_range()),
            ScalarType::BigInt => Ok(SqlValue::I64(value)),
            ScalarType::Decimal { .. } => Ok(SqlValue::Decimal(Decimal::from(value))),
            other => Err(SyncError::Record(format!(
                "column type {} cannot hold an integer identity",
                other
            ))),
        }
    }

    /// Short type name used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Bool(_) => "bool",
            SqlValue::I16(_) => "i16",
            SqlValue::I32(_) => "i32",
            SqlValue::I64(_) => "i64",
            SqlValue::Decimal(_) => "decimal",
            SqlValue::Text(_) => "text",
            SqlValue::Uuid(_) => "uuid",
            SqlValue::DateTime(_) => "datetime",
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i16> for SqlValue {
    fn from(v: i16) -> Self {
        SqlValue::I16(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::I32(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<Uuid> for SqlValue {
    fn from(v: Uuid) -> Self {
        SqlValue::Uuid(v)
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::DateTime(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_value_is_null() {
        assert!(SqlValue::Null.is_null());
        assert!(!SqlValue::I32(42).is_null());
    }

    #[test]
    fn test_unsaved_identity_detection() {
        assert!(SqlValue::I32(0).is_unsaved_identity());
        assert!(SqlValue::I64(0).is_unsaved_identity());
        assert!(SqlValue::Null.is_unsaved_identity());
        assert!(!SqlValue::I32(-100).is_unsaved_identity());
        assert!(!SqlValue::I16(7).is_unsaved_identity());
        assert!(!SqlValue::Text("0".into()).is_unsaved_identity());
        assert!(SqlValue::Decimal(Decimal::ZERO).is_unsaved_identity());
        assert!(SqlValue::Decimal(Decimal::new(0, 2)).is_unsaved_identity());
        assert!(!SqlValue::Decimal(Decimal::from(-100)).is_unsaved_identity());
    }

    #[test]
    fn test_integer_for_matches_column_width() {
        assert_eq!(
            SqlValue::integer_for(&ScalarType::Int, -100).unwrap(),
            SqlValue::I32(-100)
        );
        assert_eq!(
            SqlValue::integer_for(&ScalarType::SmallInt, -101).unwrap(),
            SqlValue::I16(-101)
        );
        assert_eq!(
            SqlValue::integer_for(&ScalarType::BigInt, -5).unwrap(),
            SqlValue::I64(-5)
        );
        assert!(SqlValue::integer_for(&ScalarType::SmallInt, -40_000).is_err());
        assert!(SqlValue::integer_for(&ScalarType::Text, -1).is_err());
    }

    #[test]
    fn test_from_implementations() {
        let v: SqlValue = 42i32.into();
        assert_eq!(v, SqlValue::I32(42));

        let v: SqlValue = "hello".into();
        assert_eq!(v, SqlValue::Text("hello".to_string()));

        let v: SqlValue = Option::<i64>::None.into();
        assert_eq!(v, SqlValue::Null);
    }
}
