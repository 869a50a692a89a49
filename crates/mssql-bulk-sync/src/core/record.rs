//! Property access for records taking part in a synchronization.
//!
//! Records expose their column values by name. Statically described types
//! implement [`Entity`] and carry their own [`TableSchema`]; [`DynamicRecord`]
//! works against any schema and is what the CLI loads from JSON.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use super::schema::{ScalarType, TableSchema};
use super::value::SqlValue;
use crate::error::{Result, SyncError};

/// Read and write access to a record's column values.
pub trait Record {
    /// Current value of a column, `None` if the record has no such property.
    fn value(&self, column: &str) -> Option<SqlValue>;

    /// Assign a value to a column.
    fn set_value(&mut self, column: &str, value: SqlValue) -> Result<()>;
}

/// A record type that describes its own table.
pub trait Entity: Record {
    /// Name used to key catalog lookups and temp-table names.
    fn entity_name() -> &'static str;

    /// Table description for the type.
    fn table_schema() -> TableSchema;
}

/// A record backed by a column map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicRecord {
    values: BTreeMap<String, SqlValue>,
}

impl DynamicRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column assignment.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.values.insert(column.into(), value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.values.get(column)
    }

    /// Build a record from a JSON object, converting each property by the
    /// column's scalar type. Columns absent from the object are NULL.
    pub fn from_json(schema: &TableSchema, json: &JsonValue) -> Result<Self> {
        let object = json.as_object().ok_or_else(|| {
            SyncError::Record(format!(
                "{}: expected a JSON object, got {}",
                schema.full_name(),
                json
            ))
        })?;

        for key in object.keys() {
            if schema.column(key).is_none() {
                return Err(SyncError::Record(format!(
                    "{}: unknown column {}",
                    schema.full_name(),
                    key
                )));
            }
        }

        let mut record = Self::new();
        for column in &schema.columns {
            let raw = object
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(&column.name))
                .map(|(_, v)| v);
            let value = match raw {
                None | Some(JsonValue::Null) => SqlValue::Null,
                Some(raw) => json_to_value(schema, &column.name, &column.scalar_type, raw)?,
            };
            record.values.insert(column.name.clone(), value);
        }
        Ok(record)
    }

    /// Render the record as a JSON object holding every schema column.
    pub fn to_json(&self, schema: &TableSchema) -> JsonValue {
        let mut object = Map::new();
        for column in &schema.columns {
            let value = self.values.get(&column.name).unwrap_or(&SqlValue::Null);
            object.insert(column.name.clone(), value_to_json(value));
        }
        JsonValue::Object(object)
    }
}

impl Record for DynamicRecord {
    fn value(&self, column: &str) -> Option<SqlValue> {
        self.values.get(column).cloned()
    }

    fn set_value(&mut self, column: &str, value: SqlValue) -> Result<()> {
        self.values.insert(column.to_string(), value);
        Ok(())
    }
}

fn json_to_value(
    schema: &TableSchema,
    column: &str,
    scalar: &ScalarType,
    raw: &JsonValue,
) -> Result<SqlValue> {
    let mismatch = || {
        SyncError::Record(format!(
            "{}.{}: cannot read {} as {}",
            schema.full_name(),
            column,
            raw,
            scalar
        ))
    };

    match scalar {
        ScalarType::SmallInt | ScalarType::Int | ScalarType::BigInt => {
            let n = raw.as_i64().ok_or_else(mismatch)?;
            SqlValue::integer_for(scalar, n)
        }
        ScalarType::Decimal { .. } => {
            let text = match raw {
                JsonValue::Number(n) => n.to_string(),
                JsonValue::String(s) => s.clone(),
                _ => return Err(mismatch()),
            };
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .map(SqlValue::Decimal)
                .map_err(|_| mismatch())
        }
        ScalarType::DateTime => {
            let text = raw.as_str().ok_or_else(mismatch)?;
            parse_datetime(text).map(SqlValue::DateTime).ok_or_else(mismatch)
        }
        ScalarType::Text => raw
            .as_str()
            .map(|s| SqlValue::Text(s.to_string()))
            .ok_or_else(mismatch),
        ScalarType::Bool => match raw {
            JsonValue::Bool(b) => Ok(SqlValue::Bool(*b)),
            JsonValue::Number(n) if n.as_i64() == Some(0) => Ok(SqlValue::Bool(false)),
            JsonValue::Number(n) if n.as_i64() == Some(1) => Ok(SqlValue::Bool(true)),
            _ => Err(mismatch()),
        },
        ScalarType::Guid => {
            let text = raw.as_str().ok_or_else(mismatch)?;
            Uuid::parse_str(text).map(SqlValue::Uuid).map_err(|_| mismatch())
        }
        ScalarType::Other(type_name) => Err(SyncError::UnsupportedColumnType {
            table: schema.full_name(),
            column: column.to_string(),
            type_name: type_name.clone(),
        }),
    }
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    text.parse::<NaiveDateTime>()
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}

fn value_to_json(value: &SqlValue) -> JsonValue {
    match value {
        SqlValue::Null => JsonValue::Null,
        SqlValue::Bool(b) => JsonValue::Bool(*b),
        SqlValue::I16(v) => JsonValue::from(*v),
        SqlValue::I32(v) => JsonValue::from(*v),
        SqlValue::I64(v) => JsonValue::from(*v),
        // keep exact digits
        SqlValue::Decimal(d) => JsonValue::String(d.to_string()),
        SqlValue::Text(s) => JsonValue::String(s.clone()),
        SqlValue::Uuid(u) => JsonValue::String(u.to_string()),
        SqlValue::DateTime(dt) => JsonValue::String(dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()),
    }
}
