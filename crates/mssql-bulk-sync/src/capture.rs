//! Refresh policy and output-capture planning.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::identifier::temp_table_name;
use crate::core::{ColumnDescriptor, TableSchema};
use crate::error::SyncError;
use crate::sql::{self, OUTPUT_TABLE_SUFFIX};

/// Which store-generated columns are copied back onto records after a merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshPolicy {
    /// Nothing is read back.
    #[default]
    None,
    /// Identity columns of inserted rows.
    Identity,
    /// Identity columns plus every other computed column.
    All,
}

impl RefreshPolicy {
    /// Policy to use when tracking state is reconciled after the call.
    ///
    /// A tracked insert cannot be finalized without its real key, so `None`
    /// becomes `Identity`.
    pub fn for_tracked(self) -> Self {
        match self {
            RefreshPolicy::None => RefreshPolicy::Identity,
            other => other,
        }
    }
}

impl fmt::Display for RefreshPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshPolicy::None => write!(f, "none"),
            RefreshPolicy::Identity => write!(f, "identity"),
            RefreshPolicy::All => write!(f, "all"),
        }
    }
}

impl FromStr for RefreshPolicy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(RefreshPolicy::None),
            "identity" => Ok(RefreshPolicy::Identity),
            "all" => Ok(RefreshPolicy::All),
            other => Err(SyncError::Config(format!(
                "Invalid refresh mode '{}'. Use none, identity or all",
                other
            ))),
        }
    }
}

/// Columns captured by the MERGE OUTPUT clause for one call.
#[derive(Debug, Clone)]
pub struct OutputCapture {
    /// Correlation keys. Their source-side values are captured as `Old_<key>`.
    pub keys: Vec<ColumnDescriptor>,
    /// Values copied back onto records: the keys, then the generated columns.
    pub columns: Vec<ColumnDescriptor>,
    /// Temp table receiving the output rows.
    pub table_name: String,
    /// `CREATE TABLE` for [`Self::table_name`].
    pub ddl: String,
}

impl OutputCapture {
    pub fn select_sql(&self) -> crate::error::Result<String> {
        sql::select_output_sql(self)
    }

    pub fn drop_sql(&self) -> crate::error::Result<String> {
        sql::drop_table_sql(&self.table_name)
    }
}

/// Decide what a call captures, or `None` when nothing needs reading back.
///
/// - `Identity`: identity columns, only when there are inserts.
/// - `All`: identity columns when there are inserts, computed columns when
///   there are inserts or updates. Without identity keys the primary key is
///   used to correlate the computed values.
pub fn plan_capture(
    schema: &TableSchema,
    entity: &str,
    has_inserts: bool,
    has_updates: bool,
    policy: RefreshPolicy,
) -> crate::error::Result<Option<OutputCapture>> {
    let mut keys: Vec<&ColumnDescriptor> = Vec::new();
    let mut computed: Vec<&ColumnDescriptor> = Vec::new();

    match policy {
        RefreshPolicy::None => return Ok(None),
        RefreshPolicy::Identity => {
            if has_inserts {
                keys = schema.identity_columns();
            }
        }
        RefreshPolicy::All => {
            if has_inserts {
                keys = schema.identity_columns();
            }
            if has_inserts || has_updates {
                computed = schema.computed_columns();
                if !computed.is_empty() && keys.is_empty() {
                    keys = schema.key_columns();
                }
            }
        }
    }

    if keys.is_empty() {
        return Ok(None);
    }

    let mut columns = keys.clone();
    for column in computed {
        if !columns.iter().any(|c| c.name == column.name) {
            columns.push(column);
        }
    }

    let table_name = format!("{}{}", temp_table_name(entity), OUTPUT_TABLE_SUFFIX);
    let ddl = sql::output_table_ddl(&table_name, schema, &keys, &columns)?;

    Ok(Some(OutputCapture {
        keys: keys.into_iter().cloned().collect(),
        columns: columns.into_iter().cloned().collect(),
        table_name,
        ddl,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ScalarType;

    fn employee() -> TableSchema {
        TableSchema::new("dbo", "Employee")
            .with_column(ColumnDescriptor::new("Id", ScalarType::Int).identity())
            .with_column(ColumnDescriptor::new("Name", ScalarType::Text))
            .with_column(ColumnDescriptor::new("CreatedDate", ScalarType::DateTime).computed())
            .with_column(ColumnDescriptor::new("UpdatedDate", ScalarType::DateTime).computed())
            .with_primary_key(&["Id"])
    }

    fn names(columns: &[ColumnDescriptor]) -> Vec<&str> {
        columns.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_none_never_captures() {
        assert!(plan_capture(&employee(), "Employee", true, true, RefreshPolicy::None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_identity_needs_inserts() {
        let schema = employee();
        assert!(plan_capture(&schema, "Employee", false, true, RefreshPolicy::Identity)
            .unwrap()
            .is_none());

        let capture = plan_capture(&schema, "Employee", true, false, RefreshPolicy::Identity)
            .unwrap()
            .unwrap();
        assert_eq!(names(&capture.keys), vec!["Id"]);
        assert_eq!(names(&capture.columns), vec!["Id"]);
        assert!(capture.table_name.starts_with("#Employee"));
        assert!(capture.table_name.ends_with("OutValues"));
        assert!(capture.ddl.contains("[Old_Id] int, [Id] int"));
    }

    #[test]
    fn test_all_with_inserts_captures_identity_and_computed() {
        let capture = plan_capture(&employee(), "Employee", true, true, RefreshPolicy::All)
            .unwrap()
            .unwrap();
        assert_eq!(names(&capture.keys), vec!["Id"]);
        assert_eq!(
            names(&capture.columns),
            vec!["Id", "CreatedDate", "UpdatedDate"]
        );
    }

    #[test]
    fn test_all_updates_only_falls_back_to_primary_key() {
        let capture = plan_capture(&employee(), "Employee", false, true, RefreshPolicy::All)
            .unwrap()
            .unwrap();
        assert_eq!(names(&capture.keys), vec!["Id"]);
        assert_eq!(
            names(&capture.columns),
            vec!["Id", "CreatedDate", "UpdatedDate"]
        );
    }

    #[test]
    fn test_all_without_generated_columns_skips_capture() {
        let schema = TableSchema::new("dbo", "EmpNoId")
            .with_column(ColumnDescriptor::new("Id", ScalarType::Int))
            .with_column(ColumnDescriptor::new("Name", ScalarType::Text))
            .with_primary_key(&["Id"]);
        assert!(plan_capture(&schema, "EmpNoId", true, true, RefreshPolicy::All)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_unsupported_output_type_is_reported() {
        let schema = employee().with_column(
            ColumnDescriptor::new("RowVer", ScalarType::Other("timestamp(8)".into())).computed(),
        );
        let err = plan_capture(&schema, "Employee", true, false, RefreshPolicy::All).unwrap_err();
        assert!(err.to_string().contains("timestamp(8)"));
    }

    #[test]
    fn test_for_tracked_coerces_none() {
        assert_eq!(RefreshPolicy::None.for_tracked(), RefreshPolicy::Identity);
        assert_eq!(RefreshPolicy::Identity.for_tracked(), RefreshPolicy::Identity);
        assert_eq!(RefreshPolicy::All.for_tracked(), RefreshPolicy::All);
    }

    #[test]
    fn test_parse_policy() {
        assert_eq!("ALL".parse::<RefreshPolicy>().unwrap(), RefreshPolicy::All);
        assert!("sometimes".parse::<RefreshPolicy>().is_err());
    }
}
