//! Materializing records into staging batches.

use crate::bulk::RowBatch;
use crate::core::{ColumnDescriptor, Record, SqlValue, TableSchema};
use crate::error::{Result, SyncError};

/// Rows for every column of the table, one per record.
///
/// Properties a record does not expose are staged as NULL.
pub fn record_batch<'r, R, I>(schema: &TableSchema, records: I) -> Result<RowBatch>
where
    R: Record + ?Sized + 'r,
    I: IntoIterator<Item = &'r R>,
{
    let mut batch = RowBatch::new(schema.columns.clone());
    for record in records {
        let row = schema
            .columns
            .iter()
            .map(|c| record.value(&c.name).unwrap_or(SqlValue::Null))
            .collect();
        batch.push(row)?;
    }
    Ok(batch)
}

/// Key-only rows for the delete phase.
///
/// Every record must carry a value for every key column.
pub fn key_batch<'r, R, I>(schema: &TableSchema, records: I) -> Result<RowBatch>
where
    R: Record + ?Sized + 'r,
    I: IntoIterator<Item = &'r R>,
{
    let keys: Vec<ColumnDescriptor> = schema.key_columns().into_iter().cloned().collect();
    if keys.is_empty() {
        return Err(SyncError::Schema(format!(
            "{} has no primary key to delete by",
            schema.full_name()
        )));
    }

    let mut batch = RowBatch::new(keys);
    for (index, record) in records.into_iter().enumerate() {
        let mut row = Vec::with_capacity(batch.columns.len());
        for key in &batch.columns {
            match record.value(&key.name) {
                Some(value) if !value.is_null() => row.push(value),
                _ => {
                    return Err(SyncError::Record(format!(
                        "delete #{} for {} has no value for key column {}",
                        index,
                        schema.full_name(),
                        key.name
                    )))
                }
            }
        }
        batch.push(row)?;
    }
    Ok(batch)
}
