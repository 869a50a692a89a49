//! Schema catalog: resolving a record type's table description.
//!
//! Descriptions are resolved on every call and never cached, so a catalog
//! backed by the live database sees schema changes between calls.

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

use crate::connection::SyncConnection;
use crate::core::{ColumnDescriptor, Entity, GenerationKind, ScalarType, SqlValue, TableSchema};
use crate::error::{Result, SyncError};

/// Resolves table, column, key and generated-column facts for an entity.
#[async_trait]
pub trait SchemaCatalog: Send + Sync {
    async fn table_schema(&self, conn: &mut dyn SyncConnection, entity: &str) -> Result<TableSchema>;
}

/// Catalog of explicitly registered descriptions.
#[derive(Debug, Default, Clone)]
pub struct StaticCatalog {
    tables: HashMap<String, TableSchema>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a description under an entity name.
    pub fn register(&mut self, entity: impl Into<String>, schema: TableSchema) -> Result<()> {
        schema.validate()?;
        self.tables.insert(entity.into(), schema);
        Ok(())
    }

    /// Register a record type that describes itself.
    pub fn register_entity<E: Entity>(&mut self) -> Result<()> {
        self.register(E::entity_name(), E::table_schema())
    }

    pub fn contains(&self, entity: &str) -> bool {
        self.tables.contains_key(entity)
    }
}

#[async_trait]
impl SchemaCatalog for StaticCatalog {
    async fn table_schema(&self, _conn: &mut dyn SyncConnection, entity: &str) -> Result<TableSchema> {
        self.tables
            .get(entity)
            .cloned()
            .ok_or_else(|| SyncError::Schema(format!("no table registered for entity {}", entity)))
    }
}

const COLUMNS_QUERY: &str = r#"
    SELECT c.name,
           t.name,
           CAST(c.precision AS int),
           CAST(c.scale AS int),
           c.is_nullable,
           c.is_identity,
           c.is_computed
    FROM sys.columns c
    JOIN sys.types t ON c.system_type_id = t.user_type_id
    JOIN sys.tables tb ON c.object_id = tb.object_id
    JOIN sys.schemas s ON tb.schema_id = s.schema_id
    WHERE s.name = @P1 AND tb.name = @P2
    ORDER BY c.column_id
"#;

const PRIMARY_KEY_QUERY: &str = r#"
    SELECT c.name
    FROM sys.indexes i
    JOIN sys.index_columns ic ON i.object_id = ic.object_id AND i.index_id = ic.index_id
    JOIN sys.columns c ON ic.object_id = c.object_id AND ic.column_id = c.column_id
    JOIN sys.tables tb ON i.object_id = tb.object_id
    JOIN sys.schemas s ON tb.schema_id = s.schema_id
    WHERE i.is_primary_key = 1 AND s.name = @P1 AND tb.name = @P2
    ORDER BY ic.key_ordinal
"#;

/// Catalog reading SQL Server system views.
///
/// The entity name is the table name, optionally schema-qualified
/// (`sales.Orders`); unqualified names use the default schema.
#[derive(Debug, Clone)]
pub struct SysCatalog {
    default_schema: String,
}

impl Default for SysCatalog {
    fn default() -> Self {
        Self::new("dbo")
    }
}

impl SysCatalog {
    pub fn new(default_schema: impl Into<String>) -> Self {
        Self {
            default_schema: default_schema.into(),
        }
    }

    fn split_name<'a>(&'a self, entity: &'a str) -> (&'a str, &'a str) {
        match entity.split_once('.') {
            Some((schema, table)) => (schema, table),
            None => (self.default_schema.as_str(), entity),
        }
    }
}

#[async_trait]
impl SchemaCatalog for SysCatalog {
    async fn table_schema(&self, conn: &mut dyn SyncConnection, entity: &str) -> Result<TableSchema> {
        let (schema_name, table_name) = self.split_name(entity);
        let params = [
            SqlValue::Text(schema_name.to_string()),
            SqlValue::Text(table_name.to_string()),
        ];

        let column_shape = [
            ScalarType::Text,
            ScalarType::Text,
            ScalarType::Int,
            ScalarType::Int,
            ScalarType::Bool,
            ScalarType::Bool,
            ScalarType::Bool,
        ];
        let rows = conn.query(COLUMNS_QUERY, &params, &column_shape).await?;
        if rows.is_empty() {
            return Err(SyncError::Schema(format!(
                "table {}.{} not found",
                schema_name, table_name
            )));
        }

        let mut table = TableSchema::new(schema_name, table_name);
        for row in &rows {
            table.columns.push(column_from_row(row)?);
        }

        let keys = conn
            .query(PRIMARY_KEY_QUERY, &params, &[ScalarType::Text])
            .await?;
        for row in keys {
            match row.into_iter().next() {
                Some(SqlValue::Text(name)) => table.primary_key.push(name),
                other => {
                    return Err(SyncError::Schema(format!(
                        "unexpected primary key row for {}: {:?}",
                        table.full_name(),
                        other
                    )))
                }
            }
        }

        debug!(
            "Resolved {} from catalog: {} columns, key ({})",
            table.full_name(),
            table.columns.len(),
            table.primary_key.join(", ")
        );
        Ok(table)
    }
}

fn column_from_row(row: &[SqlValue]) -> Result<ColumnDescriptor> {
    let malformed = || SyncError::Schema(format!("unexpected sys.columns row: {:?}", row));

    let text = |i: usize| match row.get(i) {
        Some(SqlValue::Text(s)) => Some(s.clone()),
        _ => None,
    };
    let small = |i: usize| match row.get(i) {
        Some(SqlValue::I32(n)) => u8::try_from(*n).ok(),
        _ => None,
    };
    let flag = |i: usize| match row.get(i) {
        Some(SqlValue::Bool(b)) => Some(*b),
        Some(SqlValue::Null) => Some(false),
        _ => None,
    };

    let name = text(0).ok_or_else(malformed)?;
    let type_name = text(1).ok_or_else(malformed)?;
    let precision = small(2).ok_or_else(malformed)?;
    let scale = small(3).ok_or_else(malformed)?;
    let nullable = flag(4).ok_or_else(malformed)?;
    let is_identity = flag(5).ok_or_else(malformed)?;
    let is_computed = flag(6).ok_or_else(malformed)?;

    let generated = if is_identity {
        GenerationKind::Identity
    } else if is_computed {
        GenerationKind::Computed
    } else {
        GenerationKind::None
    };

    Ok(ColumnDescriptor {
        name,
        scalar_type: ScalarType::from_mssql(&type_name, precision, scale),
        generated,
        nullable,
    })
}
