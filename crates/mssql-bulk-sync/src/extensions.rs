//! Single-record helpers outside the bulk path.

use tracing::debug;

use crate::connection::SyncConnection;
use crate::core::{Record, SqlValue, TableSchema};
use crate::error::Result;
use crate::sql;

/// Insert or update one record with a parameterized MERGE on the primary key.
///
/// Generated columns are never written and nothing is read back. Returns the
/// number of rows affected.
pub async fn upsert_record<C, R>(conn: &mut C, schema: &TableSchema, record: &R) -> Result<u64>
where
    C: SyncConnection + ?Sized,
    R: Record + ?Sized,
{
    let (statement, columns) = sql::upsert_single_sql(schema)?;
    let params: Vec<SqlValue> = columns
        .iter()
        .map(|c| record.value(&c.name).unwrap_or(SqlValue::Null))
        .collect();
    let affected = conn.execute_params(&statement, &params).await?;
    debug!("{}: upserted one record ({} rows)", schema.full_name(), affected);
    Ok(affected)
}

/// Delete every row whose `column` equals `value`. Returns rows affected.
pub async fn delete_by_column<C>(
    conn: &mut C,
    schema: &TableSchema,
    column: &str,
    value: SqlValue,
) -> Result<u64>
where
    C: SyncConnection + ?Sized,
{
    let statement = sql::delete_by_column_sql(schema, column)?;
    let affected = conn.execute_params(&statement, &[value]).await?;
    debug!(
        "{}: deleted {} rows by {}",
        schema.full_name(),
        affected,
        column
    );
    Ok(affected)
}
