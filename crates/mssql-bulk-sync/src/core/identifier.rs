//! Identifier validation and quoting for generated SQL Server statements.
//!
//! SQL identifiers (table names, column names, schema names) cannot be passed as
//! parameters in prepared statements - only data values can be parameterized.
//! Every structural name that ends up in generated DDL/DML goes through
//! [`quote_mssql`], and names only ever come from the schema catalog.

use chrono::{Local, Timelike};

use crate::error::{Result, SyncError};

/// Maximum identifier length accepted by SQL Server (characters).
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Local temp tables get 12 fewer characters than regular identifiers.
const MAX_TEMP_BASE_LENGTH: usize = 100;

/// Validate an identifier for security issues.
///
/// Rejects:
/// - Empty identifiers
/// - Identifiers containing null bytes (injection vector)
/// - Identifiers exceeding maximum length
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SyncError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(SyncError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.chars().count() > MAX_IDENTIFIER_LENGTH {
        return Err(SyncError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} characters: {:?}",
            MAX_IDENTIFIER_LENGTH, name
        )));
    }

    Ok(())
}

/// Quote a SQL Server identifier using brackets.
///
/// Escapes closing brackets by doubling them and wraps in brackets.
///
/// ```ignore
/// assert_eq!(quote_mssql("users")?, "[users]");
/// assert_eq!(quote_mssql("table]name")?, "[table]]name]");
/// ```
pub fn quote_mssql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("[{}]", name.replace(']', "]]")))
}

/// Qualify a SQL Server table name with schema.
pub fn qualify_mssql(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_mssql(schema)?, quote_mssql(table)?))
}

/// Build a session-scoped temp table name (`#<Entity><n>`) for an entity.
///
/// The suffix is the current millisecond modulo 1000, so two calls within the
/// same millisecond of different seconds can collide. Callers must not run
/// overlapping synchronizations of the same entity on one session.
pub fn temp_table_name(entity: &str) -> String {
    temp_table_name_with_suffix(entity, Local::now().nanosecond() / 1_000_000 % 1000)
}

pub(crate) fn temp_table_name_with_suffix(entity: &str, suffix: u32) -> String {
    // Only the last segment of "schema.table" names the entity
    let base = entity.rsplit('.').next().unwrap_or(entity);
    let mut sanitized: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .take(MAX_TEMP_BASE_LENGTH)
        .collect();
    if sanitized.is_empty() {
        sanitized.push_str("Entity");
    }
    format!("#{}{}", sanitized, suffix)
}
