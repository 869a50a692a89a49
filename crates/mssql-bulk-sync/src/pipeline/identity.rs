//! Placeholder identities for rows the store has not numbered yet.

use crate::core::{Record, SqlValue, TableSchema};
use crate::error::{Result, SyncError};

/// Placeholder numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// First placeholder handed out. Must be negative.
    pub identity_seed: i64,
    /// Added after each assignment. Must be negative.
    pub identity_increment: i64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            identity_seed: -100,
            identity_increment: -1,
        }
    }
}

/// Give every zero (or NULL) identity column of every insert a distinct
/// negative placeholder, so that each staged row has a key the MERGE output
/// can be correlated on.
///
/// One counter runs across all records and identity columns, in iteration
/// order. Returns the number of placeholders assigned.
pub fn assign_placeholders<R: Record + ?Sized>(
    schema: &TableSchema,
    inserts: &mut [&mut R],
    options: &SyncOptions,
) -> Result<usize> {
    if options.identity_seed >= 0 || options.identity_increment >= 0 {
        return Err(SyncError::Config(format!(
            "placeholder identities must be negative (seed {}, increment {})",
            options.identity_seed, options.identity_increment
        )));
    }

    let identities = schema.identity_columns();
    let mut next = options.identity_seed;
    let mut assigned = 0usize;

    for record in inserts.iter_mut() {
        for column in &identities {
            let current = record.value(&column.name).unwrap_or(SqlValue::Null);
            if !current.is_unsaved_identity() {
                continue;
            }
            let placeholder = SqlValue::integer_for(&column.scalar_type, next)?;
            record.set_value(&column.name, placeholder)?;
            next = next.checked_add(options.identity_increment).ok_or_else(|| {
                SyncError::Record(format!(
                    "{}: ran out of placeholder identities",
                    schema.full_name()
                ))
            })?;
            assigned += 1;
        }
    }

    Ok(assigned)
}
