//! SQL text generation for staging, merge, delete and single-row statements.
//!
//! Everything here is pure and connection independent. Identifiers are
//! bracket-quoted and always come from a [`TableSchema`]; values never appear
//! in generated text (the single-row helpers use `@P1..@Pn` parameters).

use crate::capture::OutputCapture;
use crate::core::identifier::quote_mssql;
use crate::core::{ColumnDescriptor, TableSchema};
use crate::error::{Result, SyncError};

/// Prefix for output-table columns holding a row's pre-merge key values.
pub const OLD_COLUMN_PREFIX: &str = "Old_";

/// Suffix of the temp table receiving MERGE output rows.
pub const OUTPUT_TABLE_SUFFIX: &str = "OutValues";

/// Suffix of the temp table holding keys to delete.
pub const DELETE_TABLE_SUFFIX: &str = "DelKeys";

fn column_definition(schema: &TableSchema, name: &str, column: &ColumnDescriptor) -> Result<String> {
    let ty = column
        .scalar_type
        .staging_type()
        .ok_or_else(|| SyncError::UnsupportedColumnType {
            table: schema.full_name(),
            column: column.name.clone(),
            type_name: column.scalar_type.to_string(),
        })?;
    Ok(format!("{} {}", quote_mssql(name)?, ty))
}

fn quoted_list(columns: &[&ColumnDescriptor], prefix: &str) -> Result<String> {
    let quoted: Result<Vec<String>> = columns
        .iter()
        .map(|c| Ok(format!("{}{}", prefix, quote_mssql(&c.name)?)))
        .collect();
    Ok(quoted?.join(", "))
}

fn require_keys<'s>(schema: &'s TableSchema) -> Result<Vec<&'s ColumnDescriptor>> {
    let keys = schema.key_columns();
    if keys.is_empty() {
        return Err(SyncError::Schema(format!(
            "{} has no primary key to match rows on",
            schema.full_name()
        )));
    }
    Ok(keys)
}

/// Assignments for the `WHEN MATCHED` branch.
///
/// Non-key writable columns are copied from the source. When there are none,
/// the first writable key is assigned to itself so matched rows still reach
/// the OUTPUT clause. `None` when no column can be assigned at all.
fn matched_set_clause(schema: &TableSchema) -> Result<Option<String>> {
    let writable = schema.writable_columns();
    let mut targets: Vec<&ColumnDescriptor> = writable
        .iter()
        .copied()
        .filter(|c| !schema.is_key(&c.name))
        .collect();
    if targets.is_empty() {
        targets.extend(writable.iter().copied().filter(|c| schema.is_key(&c.name)).take(1));
    }
    if targets.is_empty() {
        return Ok(None);
    }
    let set: Result<Vec<String>> = targets
        .iter()
        .map(|c| {
            let q = quote_mssql(&c.name)?;
            Ok(format!("dest.{0} = src.{0}", q))
        })
        .collect();
    Ok(Some(set?.join(", ")))
}

/// Whether a MERGE can touch matched rows, and so report them in its output.
pub fn updates_reach_output(schema: &TableSchema) -> bool {
    !schema.writable_columns().is_empty()
}

/// `CREATE TABLE` for a staging table mirroring the given columns.
pub fn staging_table_ddl(
    staging_table: &str,
    schema: &TableSchema,
    columns: &[&ColumnDescriptor],
) -> Result<String> {
    let defs: Result<Vec<String>> = columns
        .iter()
        .map(|c| column_definition(schema, &c.name, c))
        .collect();
    Ok(format!(
        "CREATE TABLE {} ({})",
        quote_mssql(staging_table)?,
        defs?.join(", ")
    ))
}

/// `CREATE TABLE` for the MERGE output table.
///
/// Columns are the pre-image keys (`Old_<key>`), then the captured columns.
pub fn output_table_ddl(
    output_table: &str,
    schema: &TableSchema,
    keys: &[&ColumnDescriptor],
    columns: &[&ColumnDescriptor],
) -> Result<String> {
    let mut defs = Vec::with_capacity(keys.len() + columns.len());
    for key in keys {
        defs.push(column_definition(
            schema,
            &format!("{}{}", OLD_COLUMN_PREFIX, key.name),
            key,
        )?);
    }
    for column in columns {
        defs.push(column_definition(schema, &column.name, column)?);
    }
    Ok(format!(
        "CREATE TABLE {} ({})",
        quote_mssql(output_table)?,
        defs.join(", ")
    ))
}

pub fn drop_table_sql(table: &str) -> Result<String> {
    Ok(format!("DROP TABLE {}", quote_mssql(table)?))
}

/// The set-based MERGE from a staging table into the destination.
///
/// Matched rows update every non-key, non-generated column (the branch is
/// left out when there are none). Unmatched rows insert every non-generated
/// column. With a capture, an OUTPUT clause writes the source-side keys as
/// pre-image columns and the inserted-side captured columns.
pub fn merge_sql(
    schema: &TableSchema,
    staging_table: &str,
    capture: Option<&OutputCapture>,
) -> Result<String> {
    let keys = require_keys(schema)?;
    let writable = schema.writable_columns();

    let on: Result<Vec<String>> = keys
        .iter()
        .map(|k| {
            let q = quote_mssql(&k.name)?;
            Ok(format!("dest.{0} = src.{0}", q))
        })
        .collect();

    let mut sql = format!(
        "MERGE INTO {} dest USING (SELECT * FROM {}) src ON ({})",
        schema.qualified_name()?,
        quote_mssql(staging_table)?,
        on?.join(" AND ")
    );

    if let Some(set) = matched_set_clause(schema)? {
        sql.push_str(" WHEN MATCHED THEN UPDATE SET ");
        sql.push_str(&set);
    }

    if writable.is_empty() {
        sql.push_str(" WHEN NOT MATCHED THEN INSERT DEFAULT VALUES");
    } else {
        sql.push_str(&format!(
            " WHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
            quoted_list(&writable, "")?,
            quoted_list(&writable, "src.")?
        ));
    }

    if let Some(capture) = capture {
        let mut outputs = Vec::new();
        let mut targets = Vec::new();
        for key in &capture.keys {
            let old = quote_mssql(&format!("{}{}", OLD_COLUMN_PREFIX, key.name))?;
            outputs.push(format!("src.{} AS {}", quote_mssql(&key.name)?, old));
            targets.push(old);
        }
        for column in &capture.columns {
            let q = quote_mssql(&column.name)?;
            outputs.push(format!("inserted.{}", q));
            targets.push(q);
        }
        sql.push_str(&format!(
            " OUTPUT {} INTO {} ({})",
            outputs.join(", "),
            quote_mssql(&capture.table_name)?,
            targets.join(", ")
        ));
    }

    sql.push(';');
    Ok(sql)
}

/// `DELETE ... WHERE EXISTS` against a staging table of key values.
pub fn delete_sql(schema: &TableSchema, staging_table: &str) -> Result<String> {
    let keys = require_keys(schema)?;
    let dest = schema.qualified_name()?;
    let predicate: Result<Vec<String>> = keys
        .iter()
        .map(|k| {
            let q = quote_mssql(&k.name)?;
            Ok(format!("src.{0} = {1}.{0}", q, dest))
        })
        .collect();
    Ok(format!(
        "DELETE FROM {0} WHERE EXISTS (SELECT 1 FROM {1} src WHERE {2})",
        dest,
        quote_mssql(staging_table)?,
        predicate?.join(" AND ")
    ))
}

/// Read back every captured row: pre-image keys first, then captured columns.
pub fn select_output_sql(capture: &OutputCapture) -> Result<String> {
    let mut cols = Vec::with_capacity(capture.keys.len() + capture.columns.len());
    for key in &capture.keys {
        cols.push(quote_mssql(&format!("{}{}", OLD_COLUMN_PREFIX, key.name))?);
    }
    for column in &capture.columns {
        cols.push(quote_mssql(&column.name)?);
    }
    Ok(format!(
        "SELECT {} FROM {}",
        cols.join(", "),
        quote_mssql(&capture.table_name)?
    ))
}

/// Single-row upsert as a parameterized MERGE.
///
/// Returns the statement and the columns bound to `@P1..@Pn`, in order: every
/// key column plus every non-generated column, in table order.
pub fn upsert_single_sql(schema: &TableSchema) -> Result<(String, Vec<&ColumnDescriptor>)> {
    let keys = require_keys(schema)?;
    let params: Vec<&ColumnDescriptor> = schema
        .columns
        .iter()
        .filter(|c| !c.is_generated() || schema.is_key(&c.name))
        .collect();
    let writable = schema.writable_columns();

    let source: Result<Vec<String>> = params
        .iter()
        .enumerate()
        .map(|(i, c)| Ok(format!("@P{} AS {}", i + 1, quote_mssql(&c.name)?)))
        .collect();
    let on: Result<Vec<String>> = keys
        .iter()
        .map(|k| {
            let q = quote_mssql(&k.name)?;
            Ok(format!("dest.{0} = src.{0}", q))
        })
        .collect();

    let mut sql = format!(
        "MERGE INTO {} dest USING (SELECT {}) src ON ({})",
        schema.qualified_name()?,
        source?.join(", "),
        on?.join(" AND ")
    );

    if let Some(set) = matched_set_clause(schema)? {
        sql.push_str(" WHEN MATCHED THEN UPDATE SET ");
        sql.push_str(&set);
    }
    if writable.is_empty() {
        sql.push_str(" WHEN NOT MATCHED THEN INSERT DEFAULT VALUES;");
    } else {
        sql.push_str(&format!(
            " WHEN NOT MATCHED THEN INSERT ({}) VALUES ({});",
            quoted_list(&writable, "")?,
            quoted_list(&writable, "src.")?
        ));
    }

    Ok((sql, params))
}

/// `DELETE FROM <table> WHERE [column] = @P1`.
pub fn delete_by_column_sql(schema: &TableSchema, column: &str) -> Result<String> {
    let descriptor = schema.column(column).ok_or_else(|| {
        SyncError::Schema(format!(
            "{} has no column {}",
            schema.full_name(),
            column
        ))
    })?;
    Ok(format!(
        "DELETE FROM {} WHERE {} = @P1",
        schema.qualified_name()?,
        quote_mssql(&descriptor.name)?
    ))
}
