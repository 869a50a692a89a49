//! High-throughput row loading into staging tables.
//!
//! [`BulkTransferProvider`] is the seam the pipeline loads staging tables
//! through. [`TdsBulkProvider`] drives the TDS bulk-load protocol and falls
//! back to batched parameterized INSERTs for rows the protocol cannot carry.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use std::borrow::Cow;
use std::time::Instant;
use tiberius::{ColumnData, TokenRow};
use tracing::{debug, warn};

use crate::connection::SyncConnection;
use crate::core::identifier::quote_mssql;
use crate::core::{ColumnDescriptor, ScalarType, SqlValue};
use crate::error::{Result, SyncError};

/// Maximum string length (in bytes) for TDS bulk insert.
/// Tiberius bulk insert has a hard limit of 65535 bytes for UTF-16 encoded strings.
const BULK_INSERT_STRING_LIMIT: usize = 65535;

/// Last 1/300 s tick of a DATETIME day.
const MAX_DATETIME_TICKS: u32 = 25_919_999;

/// SQL Server accepts at most 2100 parameters per statement.
const MAX_PARAMS_PER_STATEMENT: usize = 2100;

/// Rows to load, laid out in the destination table's column order.
#[derive(Debug, Clone)]
pub struct RowBatch {
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl RowBatch {
    pub fn new(columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row. Its width must match the column list.
    pub fn push(&mut self, row: Vec<SqlValue>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(SyncError::Record(format!(
                "row has {} values but the batch has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Loads a tabular batch into a named table as fast as the store allows.
#[async_trait]
pub trait BulkTransferProvider: Send + Sync {
    /// Write every row of `batch` into `destination`, returning rows written.
    async fn write_rows(
        &self,
        conn: &mut dyn SyncConnection,
        destination: &str,
        batch: &RowBatch,
    ) -> Result<u64>;
}

/// Bulk loader using the TDS bulk-load protocol.
#[derive(Debug, Default, Clone, Copy)]
pub struct TdsBulkProvider;

impl TdsBulkProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BulkTransferProvider for TdsBulkProvider {
    async fn write_rows(
        &self,
        conn: &mut dyn SyncConnection,
        destination: &str,
        batch: &RowBatch,
    ) -> Result<u64> {
        if batch.is_empty() {
            return Ok(0);
        }
        let started = Instant::now();

        // Partition rows: bulk-insertable vs oversized strings
        let (bulk_rows, oversized_rows): (Vec<&Vec<SqlValue>>, Vec<&Vec<SqlValue>>) = batch
            .rows
            .iter()
            .partition(|row| !row_has_oversized_strings(row));

        let mut total = 0u64;

        if !bulk_rows.is_empty() {
            let provider = conn.provider();
            let client = conn.tds_client().ok_or_else(|| {
                SyncError::UnsupportedProvider(format!(
                    "{} connection exposes no TDS client for bulk load",
                    provider
                ))
            })?;

            let table = quote_mssql(destination)?;
            let mut bulk_load = client.bulk_insert(&table).await.map_err(|e| {
                SyncError::transfer(destination, format!("bulk insert init: {}", e))
            })?;

            for row in &bulk_rows {
                let mut token_row = TokenRow::new();
                for (value, column) in row.iter().zip(&batch.columns) {
                    token_row.push(to_column_data(destination, value, column)?);
                }
                bulk_load.send(token_row).await.map_err(|e| {
                    SyncError::transfer(destination, format!("bulk insert send: {}", e))
                })?;
            }

            bulk_load.finalize().await.map_err(|e| {
                SyncError::transfer(destination, format!("bulk insert finalize: {}", e))
            })?;
            total += bulk_rows.len() as u64;
        }

        if !oversized_rows.is_empty() {
            debug!(
                "Falling back to INSERT for {} rows with oversized strings in {}",
                oversized_rows.len(),
                destination
            );
            total += insert_rows_fallback(conn, destination, &batch.columns, &oversized_rows).await?;
        }

        debug!(
            "{}: loaded {} rows in {:?}",
            destination,
            total,
            started.elapsed()
        );
        Ok(total)
    }
}

/// Check if a row contains any string values that exceed the bulk insert limit.
fn row_has_oversized_strings(row: &[SqlValue]) -> bool {
    row.iter().any(|value| match value {
        SqlValue::Text(s) => {
            let utf16_len: usize = s.chars().map(|c| c.len_utf16() * 2).sum();
            utf16_len > BULK_INSERT_STRING_LIMIT
        }
        _ => false,
    })
}

/// Insert rows using batched parameterized INSERT statements.
async fn insert_rows_fallback(
    conn: &mut dyn SyncConnection,
    destination: &str,
    columns: &[ColumnDescriptor],
    rows: &[&Vec<SqlValue>],
) -> Result<u64> {
    let table = quote_mssql(destination)?;
    let col_list: Result<Vec<String>> = columns.iter().map(|c| quote_mssql(&c.name)).collect();
    let col_str = col_list?.join(", ");

    let cols_per_row = columns.len().max(1);
    let max_rows_per_batch = (MAX_PARAMS_PER_STATEMENT / cols_per_row).max(1);
    let mut total = 0u64;

    for chunk in rows.chunks(max_rows_per_batch) {
        let mut groups = Vec::with_capacity(chunk.len());
        let mut param_idx = 1;
        for _ in chunk {
            let placeholders: Vec<String> = (0..columns.len())
                .map(|_| {
                    let p = format!("@P{}", param_idx);
                    param_idx += 1;
                    p
                })
                .collect();
            groups.push(format!("({})", placeholders.join(", ")));
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            table,
            col_str,
            groups.join(", ")
        );
        let params: Vec<SqlValue> = chunk.iter().flat_map(|row| row.iter().cloned()).collect();
        conn.execute_params(&sql, &params).await?;
        total += chunk.len() as u64;
    }

    Ok(total)
}

/// Encode a value for a staging column of the given type.
fn to_column_data(
    table: &str,
    value: &SqlValue,
    column: &ColumnDescriptor,
) -> Result<ColumnData<'static>> {
    let mismatch = || {
        SyncError::Record(format!(
            "value of type {} cannot be staged in column {} ({})",
            value.type_name(),
            column.name,
            column.scalar_type
        ))
    };
    let narrow = |n: i64| {
        SyncError::Record(format!(
            "value {} is out of range for column {} ({})",
            n, column.name, column.scalar_type
        ))
    };

    let data = match &column.scalar_type {
        ScalarType::SmallInt => match value {
            SqlValue::Null => ColumnData::I16(None),
            v => {
                let n = v.as_i64().ok_or_else(mismatch)?;
                ColumnData::I16(Some(i16::try_from(n).map_err(|_| narrow(n))?))
            }
        },
        ScalarType::Int => match value {
            SqlValue::Null => ColumnData::I32(None),
            v => {
                let n = v.as_i64().ok_or_else(mismatch)?;
                ColumnData::I32(Some(i32::try_from(n).map_err(|_| narrow(n))?))
            }
        },
        ScalarType::BigInt => match value {
            SqlValue::Null => ColumnData::I64(None),
            v => ColumnData::I64(Some(v.as_i64().ok_or_else(mismatch)?)),
        },
        ScalarType::Decimal { scale, .. } => match value {
            SqlValue::Null => ColumnData::Numeric(None),
            SqlValue::Decimal(d) => {
                let mut d = *d;
                d.rescale(u32::from(*scale));
                ColumnData::Numeric(Some(tiberius::numeric::Numeric::new_with_scale(
                    d.mantissa(),
                    *scale,
                )))
            }
            v => {
                let n = v.as_i64().ok_or_else(mismatch)?;
                let mantissa = i128::from(n) * 10i128.pow(u32::from(*scale));
                ColumnData::Numeric(Some(tiberius::numeric::Numeric::new_with_scale(
                    mantissa, *scale,
                )))
            }
        },
        ScalarType::DateTime => match value {
            SqlValue::Null => ColumnData::DateTime(None),
            SqlValue::DateTime(dt) => ColumnData::DateTime(legacy_datetime(dt)),
            _ => return Err(mismatch()),
        },
        ScalarType::Text => match value {
            SqlValue::Null => ColumnData::String(None),
            SqlValue::Text(s) => ColumnData::String(Some(Cow::Owned(s.clone()))),
            _ => return Err(mismatch()),
        },
        ScalarType::Bool => match value {
            SqlValue::Null => ColumnData::Bit(None),
            SqlValue::Bool(b) => ColumnData::Bit(Some(*b)),
            _ => return Err(mismatch()),
        },
        ScalarType::Guid => match value {
            SqlValue::Null => ColumnData::Guid(None),
            SqlValue::Uuid(u) => ColumnData::Guid(Some(*u)),
            _ => return Err(mismatch()),
        },
        ScalarType::Other(type_name) => {
            return Err(SyncError::UnsupportedColumnType {
                table: table.to_string(),
                column: column.name.clone(),
                type_name: type_name.clone(),
            })
        }
    };
    Ok(data)
}

/// Encode as legacy DATETIME: days since 1900-01-01 and 1/300 second ticks.
///
/// Values outside 1753-01-01..=9999-12-31 become NULL with a warning.
fn legacy_datetime(dt: &NaiveDateTime) -> Option<tiberius::time::DateTime> {
    let min = NaiveDate::from_ymd_opt(1753, 1, 1)?;
    let base = NaiveDate::from_ymd_opt(1900, 1, 1)?;
    if dt.date() < min {
        warn!("DateTime {} is before the DATETIME range, converting to NULL", dt);
        return None;
    }
    let days = i32::try_from((dt.date() - base).num_days()).ok()?;
    let time = dt.time();
    let nanos = u64::from(time.num_seconds_from_midnight()) * 1_000_000_000
        + u64::from(time.nanosecond().min(999_999_999));
    // round to the nearest 1/300 s tick
    let ticks = (nanos * 300 + 500_000_000) / 1_000_000_000;
    let ticks = u32::try_from(ticks).ok()?.min(MAX_DATETIME_TICKS);
    Some(tiberius::time::DateTime::new(days, ticks))
}
