//! Copying store-generated values back onto records after a MERGE.
//!
//! Each output row carries the source-side key values it was staged with
//! (`Old_<key>`). Records are matched to rows through a [`CorrelationKey`]
//! computed from those values, and the full key tuple is compared on every
//! hit so that a hash collision can never assign another record's values.

use std::collections::hash_map::{DefaultHasher, Entry};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::Instant;

use tracing::debug;

use crate::capture::OutputCapture;
use crate::connection::SyncConnection;
use crate::core::{Record, ScalarType, SqlValue};
use crate::error::{Result, SyncError};

/// Hash of a key tuple, in declared key order.
///
/// Integer widths are normalized so an `int` column read back from the store
/// hashes the same as the record's value for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationKey(u64);

impl CorrelationKey {
    pub fn from_values(values: &[SqlValue]) -> Self {
        let mut hasher = DefaultHasher::new();
        values.len().hash(&mut hasher);
        for value in values {
            hash_value(value, &mut hasher);
        }
        CorrelationKey(hasher.finish())
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

fn hash_value<H: Hasher>(value: &SqlValue, state: &mut H) {
    if let Some(n) = value.as_i64() {
        1u8.hash(state);
        n.hash(state);
        return;
    }
    match value {
        SqlValue::Null => 0u8.hash(state),
        SqlValue::Bool(b) => {
            2u8.hash(state);
            b.hash(state);
        }
        SqlValue::Decimal(d) => {
            3u8.hash(state);
            d.normalize().hash(state);
        }
        SqlValue::Text(s) => {
            4u8.hash(state);
            s.hash(state);
        }
        SqlValue::Uuid(u) => {
            5u8.hash(state);
            u.hash(state);
        }
        SqlValue::DateTime(dt) => {
            6u8.hash(state);
            dt.hash(state);
        }
        // integers handled above
        SqlValue::I16(_) | SqlValue::I32(_) | SqlValue::I64(_) => {}
    }
}

fn same_key_value(a: &SqlValue, b: &SqlValue) -> bool {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => x == y,
        _ => match (a, b) {
            (SqlValue::Decimal(x), SqlValue::Decimal(y)) => x.normalize() == y.normalize(),
            _ => a == b,
        },
    }
}

fn describe(values: &[SqlValue]) -> String {
    let parts: Vec<String> = values.iter().map(|v| format!("{:?}", v)).collect();
    format!("({})", parts.join(", "))
}

/// Captured rows indexed by correlation key.
struct CapturedRows {
    rows: HashMap<CorrelationKey, (Vec<SqlValue>, Vec<SqlValue>)>,
}

impl CapturedRows {
    fn build(table: &str, capture: &OutputCapture, rows: Vec<Vec<SqlValue>>) -> Result<Self> {
        let key_len = capture.keys.len();
        let width = key_len + capture.columns.len();
        let mut indexed = HashMap::with_capacity(rows.len());

        for (i, mut row) in rows.into_iter().enumerate() {
            if row.len() != width {
                return Err(SyncError::correlation(
                    table,
                    format!("output row {} has {} values, expected {}", i, row.len(), width),
                ));
            }
            let values = row.split_off(key_len);
            let pre_image = row;
            match indexed.entry(CorrelationKey::from_values(&pre_image)) {
                Entry::Occupied(_) => {
                    return Err(SyncError::correlation(
                        table,
                        format!(
                            "more than one output row for key {}",
                            describe(&pre_image)
                        ),
                    ));
                }
                Entry::Vacant(slot) => {
                    slot.insert((pre_image, values));
                }
            }
        }

        Ok(Self { rows: indexed })
    }
}

/// Assign captured values onto records.
///
/// Every record must match exactly one row and every row exactly one record;
/// anything else is a [`SyncError::RefreshCorrelation`]. Returns the number of
/// records refreshed.
pub fn correlate<'r, R, I>(
    table: &str,
    capture: &OutputCapture,
    rows: Vec<Vec<SqlValue>>,
    records: I,
) -> Result<usize>
where
    R: Record + ?Sized + 'r,
    I: IntoIterator<Item = &'r mut R>,
{
    let mut captured = CapturedRows::build(table, capture, rows)?;
    let mut refreshed = 0usize;

    for (index, record) in records.into_iter().enumerate() {
        let current: Vec<SqlValue> = capture
            .keys
            .iter()
            .map(|k| record.value(&k.name).unwrap_or(SqlValue::Null))
            .collect();

        let key = CorrelationKey::from_values(&current);
        let (pre_image, values) = captured.rows.remove(&key).ok_or_else(|| {
            SyncError::correlation(
                table,
                format!(
                    "no output row for record #{} with key {}",
                    index,
                    describe(&current)
                ),
            )
        })?;

        let matches = pre_image
            .iter()
            .zip(&current)
            .all(|(a, b)| same_key_value(a, b));
        if !matches {
            return Err(SyncError::correlation(
                table,
                format!(
                    "key hash collision: record #{} has key {} but the output row was staged as {}",
                    index,
                    describe(&current),
                    describe(&pre_image)
                ),
            ));
        }

        for (column, value) in capture.columns.iter().zip(values) {
            record.set_value(&column.name, value)?;
        }
        refreshed += 1;
    }

    if !captured.rows.is_empty() {
        return Err(SyncError::correlation(
            table,
            format!("{} output rows matched no record", captured.rows.len()),
        ));
    }

    Ok(refreshed)
}

/// Read the output table and refresh the staged records from it.
pub async fn refresh_records<'r, C, R, I>(
    conn: &mut C,
    table: &str,
    capture: &OutputCapture,
    records: I,
) -> Result<usize>
where
    C: SyncConnection + ?Sized,
    R: Record + ?Sized + 'r,
    I: IntoIterator<Item = &'r mut R>,
{
    let started = Instant::now();
    let select = capture.select_sql()?;
    let shape: Vec<ScalarType> = capture
        .keys
        .iter()
        .chain(capture.columns.iter())
        .map(|c| c.scalar_type.clone())
        .collect();

    let rows = conn.query(&select, &[], &shape).await?;
    let row_count = rows.len();
    let refreshed = correlate(table, capture, rows, records)?;

    debug!(
        "{}: refreshed {} records from {} output rows in {:?}",
        table,
        refreshed,
        row_count,
        started.elapsed()
    );
    Ok(refreshed)
}
