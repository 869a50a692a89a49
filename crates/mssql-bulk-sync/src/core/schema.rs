//! Table and column descriptors resolved from the schema catalog.
//!
//! A [`TableSchema`] is the only source of structural names that ever reach
//! generated SQL. It doubles as the YAML table manifest used by the CLI, so
//! every type here round-trips through serde.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::identifier::{qualify_mssql, validate_identifier};
use crate::error::{Result, SyncError};

/// Precision used for `decimal` columns declared without arguments.
const DEFAULT_DECIMAL_PRECISION: u8 = 18;

/// Scalar type family of a column, independent of any host language.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ScalarType {
    /// 16-bit integer.
    SmallInt,
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    BigInt,
    /// Exact numeric.
    Decimal { precision: u8, scale: u8 },
    /// Date and time without offset.
    DateTime,
    /// Unicode text.
    Text,
    /// Boolean.
    Bool,
    /// UUID / uniqueidentifier.
    Guid,
    /// Any type the staging path cannot represent. Kept so that the failure
    /// happens at DDL generation and names the offending type.
    Other(String),
}

impl ScalarType {
    /// Column type used for this scalar in staging and output tables.
    ///
    /// Returns `None` for [`ScalarType::Other`].
    pub fn staging_type(&self) -> Option<String> {
        let ty = match self {
            ScalarType::SmallInt => "smallint".to_string(),
            ScalarType::Int => "int".to_string(),
            ScalarType::BigInt => "bigint".to_string(),
            ScalarType::Decimal { precision, scale } => {
                format!("decimal({}, {})", precision, scale)
            }
            ScalarType::DateTime => "datetime".to_string(),
            ScalarType::Text => "nvarchar(max)".to_string(),
            ScalarType::Bool => "bit".to_string(),
            ScalarType::Guid => "uniqueidentifier".to_string(),
            ScalarType::Other(_) => return None,
        };
        Some(ty)
    }

    /// Whether the type is one of the integer widths.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ScalarType::SmallInt | ScalarType::Int | ScalarType::BigInt
        )
    }

    /// Map a SQL Server catalog type name (`sys.types.name`) to a scalar type.
    pub fn from_mssql(type_name: &str, precision: u8, scale: u8) -> Self {
        match type_name.to_lowercase().as_str() {
            "smallint" => ScalarType::SmallInt,
            "int" => ScalarType::Int,
            "bigint" => ScalarType::BigInt,
            "decimal" | "numeric" => ScalarType::Decimal { precision, scale },
            "datetime" | "datetime2" | "smalldatetime" | "date" => ScalarType::DateTime,
            "nvarchar" | "varchar" | "nchar" | "char" | "ntext" | "text" => ScalarType::Text,
            "bit" => ScalarType::Bool,
            "uniqueidentifier" => ScalarType::Guid,
            _ => ScalarType::Other(type_name.to_string()),
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarType::SmallInt => write!(f, "smallint"),
            ScalarType::Int => write!(f, "int"),
            ScalarType::BigInt => write!(f, "bigint"),
            ScalarType::Decimal { precision, scale } => {
                write!(f, "decimal({},{})", precision, scale)
            }
            ScalarType::DateTime => write!(f, "datetime"),
            ScalarType::Text => write!(f, "text"),
            ScalarType::Bool => write!(f, "bool"),
            ScalarType::Guid => write!(f, "guid"),
            ScalarType::Other(name) => write!(f, "{}", name),
        }
    }
}

impl FromStr for ScalarType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        let parsed = match normalized.as_str() {
            "smallint" | "int16" | "i16" => ScalarType::SmallInt,
            "int" | "integer" | "int32" | "i32" => ScalarType::Int,
            "bigint" | "int64" | "i64" => ScalarType::BigInt,
            "datetime" | "timestamp" | "smalldatetime" | "date" => ScalarType::DateTime,
            "text" | "string" => ScalarType::Text,
            "bool" | "boolean" | "bit" => ScalarType::Bool,
            "guid" | "uuid" | "uniqueidentifier" => ScalarType::Guid,
            other => {
                if let Some(decimal) = parse_decimal(other) {
                    decimal
                } else if is_sized(other, &["nvarchar", "varchar", "nchar", "char"], true) {
                    ScalarType::Text
                } else if is_sized(other, &["datetime2"], false) {
                    ScalarType::DateTime
                } else {
                    ScalarType::Other(s.trim().to_string())
                }
            }
        };
        Ok(parsed)
    }
}

/// Match `base`, `base(n)` and, when `allow_max` is set, `base(max)`.
fn is_sized(s: &str, bases: &[&str], allow_max: bool) -> bool {
    bases.iter().any(|base| {
        let Some(rest) = s.strip_prefix(*base) else {
            return false;
        };
        let rest = rest.trim();
        if rest.is_empty() {
            return true;
        }
        match rest.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
            Some(arg) => {
                let arg = arg.trim();
                (allow_max && arg == "max") || arg.parse::<u32>().is_ok()
            }
            None => false,
        }
    })
}

/// Parse `decimal`, `decimal(p)` and `decimal(p,s)` (also `numeric`).
fn parse_decimal(s: &str) -> Option<ScalarType> {
    let rest = s
        .strip_prefix("decimal")
        .or_else(|| s.strip_prefix("numeric"))?
        .trim();
    if rest.is_empty() {
        return Some(ScalarType::Decimal {
            precision: DEFAULT_DECIMAL_PRECISION,
            scale: 0,
        });
    }
    let args = rest.strip_prefix('(')?.strip_suffix(')')?;
    let mut parts = args.split(',').map(str::trim);
    let precision: u8 = parts.next()?.parse().ok()?;
    let scale: u8 = match parts.next() {
        Some(scale) => scale.parse().ok()?,
        None => 0,
    };
    if parts.next().is_some() || precision == 0 || precision > 38 || scale > precision {
        return None;
    }
    Some(ScalarType::Decimal { precision, scale })
}

impl From<String> for ScalarType {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(ty) => ty,
            Err(never) => match never {},
        }
    }
}

impl From<ScalarType> for String {
    fn from(ty: ScalarType) -> Self {
        ty.to_string()
    }
}

/// How the store produces a column's value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationKind {
    /// Supplied by the caller.
    #[default]
    None,
    /// Auto-increment identity.
    Identity,
    /// Computed or defaulted by the store, never an identity.
    Computed,
}

/// One column of a table as seen by the synchronization engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name.
    pub name: String,

    /// Scalar type family.
    #[serde(rename = "type")]
    pub scalar_type: ScalarType,

    /// Server-side generation kind.
    #[serde(default)]
    pub generated: GenerationKind,

    /// Whether the column allows NULL.
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDescriptor {
    /// Create a caller-supplied, nullable column.
    pub fn new(name: impl Into<String>, scalar_type: ScalarType) -> Self {
        Self {
            name: name.into(),
            scalar_type,
            generated: GenerationKind::None,
            nullable: true,
        }
    }

    /// Mark the column as an identity column.
    pub fn identity(mut self) -> Self {
        self.generated = GenerationKind::Identity;
        self.nullable = false;
        self
    }

    /// Mark the column as computed by the store.
    pub fn computed(mut self) -> Self {
        self.generated = GenerationKind::Computed;
        self
    }

    /// Mark the column as NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn is_generated(&self) -> bool {
        self.generated != GenerationKind::None
    }

    pub fn is_identity(&self) -> bool {
        self.generated == GenerationKind::Identity
    }
}

/// Table metadata: ordered columns plus the primary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Schema name.
    #[serde(default = "default_schema")]
    pub schema: String,

    /// Table name.
    pub name: String,

    /// Column definitions in table order.
    pub columns: Vec<ColumnDescriptor>,

    /// Primary key column names in key order.
    #[serde(default)]
    pub primary_key: Vec<String>,
}

fn default_schema() -> String {
    "dbo".to_string()
}

impl TableSchema {
    /// Create an empty table description.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
        }
    }

    /// Append a column.
    pub fn with_column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }

    /// Set the primary key columns.
    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Get the fully qualified table name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Bracket-quoted `[schema].[name]`.
    pub fn qualified_name(&self) -> Result<String> {
        qualify_mssql(&self.schema, &self.name)
    }

    /// Look up a column by name (case-insensitive, like the server's default collation).
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Primary key columns in key order.
    pub fn key_columns(&self) -> Vec<&ColumnDescriptor> {
        self.primary_key
            .iter()
            .filter_map(|k| self.column(k))
            .collect()
    }

    /// Generated columns with a flag that is true for identity-style columns.
    pub fn generated_columns(&self) -> Vec<(&str, bool)> {
        self.columns
            .iter()
            .filter(|c| c.is_generated())
            .map(|c| (c.name.as_str(), c.is_identity()))
            .collect()
    }

    pub fn identity_columns(&self) -> Vec<&ColumnDescriptor> {
        self.columns.iter().filter(|c| c.is_identity()).collect()
    }

    /// Generated columns that are not identities.
    pub fn computed_columns(&self) -> Vec<&ColumnDescriptor> {
        self.columns
            .iter()
            .filter(|c| c.generated == GenerationKind::Computed)
            .collect()
    }

    /// Columns the caller supplies on write.
    pub fn writable_columns(&self) -> Vec<&ColumnDescriptor> {
        self.columns.iter().filter(|c| !c.is_generated()).collect()
    }

    /// Whether a column is part of the primary key.
    pub fn is_key(&self, column: &str) -> bool {
        self.primary_key
            .iter()
            .any(|k| k.eq_ignore_ascii_case(column))
    }

    /// Check the description is usable for statement generation.
    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.schema)
            .map_err(|e| SyncError::Schema(format!("{}: schema name: {}", self.name, e)))?;
        validate_identifier(&self.name)
            .map_err(|e| SyncError::Schema(format!("table name: {}", e)))?;

        if self.columns.is_empty() {
            return Err(SyncError::Schema(format!(
                "{} has no columns",
                self.full_name()
            )));
        }

        for (i, column) in self.columns.iter().enumerate() {
            validate_identifier(&column.name).map_err(|e| {
                SyncError::Schema(format!("{}: column {}: {}", self.full_name(), i, e))
            })?;
            if self.columns[..i]
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(&column.name))
            {
                return Err(SyncError::Schema(format!(
                    "{}: duplicate column {}",
                    self.full_name(),
                    column.name
                )));
            }
        }

        for key in &self.primary_key {
            if self.column(key).is_none() {
                return Err(SyncError::Schema(format!(
                    "{}: primary key column {} is not a column of the table",
                    self.full_name(),
                    key
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn employee() -> TableSchema {
        TableSchema::new("dbo", "Employee")
            .with_column(ColumnDescriptor::new("Id", ScalarType::Int).identity())
            .with_column(ColumnDescriptor::new("Name", ScalarType::Text))
            .with_column(ColumnDescriptor::new("ManagerId", ScalarType::Int))
            .with_column(ColumnDescriptor::new("CreatedDate", ScalarType::DateTime).computed())
            .with_primary_key(&["Id"])
    }

    #[test]
    fn test_staging_type_mapping() {
        assert_eq!(ScalarType::SmallInt.staging_type().unwrap(), "smallint");
        assert_eq!(ScalarType::Int.staging_type().unwrap(), "int");
        assert_eq!(ScalarType::BigInt.staging_type().unwrap(), "bigint");
        assert_eq!(
            ScalarType::Decimal { precision: 10, scale: 2 }
                .staging_type()
                .unwrap(),
            "decimal(10, 2)"
        );
        assert_eq!(ScalarType::DateTime.staging_type().unwrap(), "datetime");
        assert_eq!(ScalarType::Text.staging_type().unwrap(), "nvarchar(max)");
        assert_eq!(ScalarType::Bool.staging_type().unwrap(), "bit");
        assert_eq!(ScalarType::Guid.staging_type().unwrap(), "uniqueidentifier");
        assert!(ScalarType::Other("xml".into()).staging_type().is_none());
    }

    #[test]
    fn test_parse_scalar_type() {
        assert_eq!("int".parse::<ScalarType>().unwrap(), ScalarType::Int);
        assert_eq!("Int64".parse::<ScalarType>().unwrap(), ScalarType::BigInt);
        assert_eq!(
            "decimal".parse::<ScalarType>().unwrap(),
            ScalarType::Decimal { precision: 18, scale: 0 }
        );
        assert_eq!(
            "numeric(12, 4)".parse::<ScalarType>().unwrap(),
            ScalarType::Decimal { precision: 12, scale: 4 }
        );
        assert_eq!(
            "geography".parse::<ScalarType>().unwrap(),
            ScalarType::Other("geography".into())
        );
        assert_eq!("nvarchar(50)".parse::<ScalarType>().unwrap(), ScalarType::Text);
        assert_eq!("VARCHAR(100)".parse::<ScalarType>().unwrap(), ScalarType::Text);
        assert_eq!("nvarchar(max)".parse::<ScalarType>().unwrap(), ScalarType::Text);
        assert_eq!("char".parse::<ScalarType>().unwrap(), ScalarType::Text);
        assert_eq!(
            "varchar(abc)".parse::<ScalarType>().unwrap(),
            ScalarType::Other("varchar(abc)".into())
        );
        assert_eq!("datetime2(7)".parse::<ScalarType>().unwrap(), ScalarType::DateTime);
        assert_eq!("date".parse::<ScalarType>().unwrap(), ScalarType::DateTime);
        // scale above precision is not a decimal we can stage
        assert_eq!(
            "decimal(2,5)".parse::<ScalarType>().unwrap(),
            ScalarType::Other("decimal(2,5)".into())
        );
    }

    #[test]
    fn test_from_mssql() {
        assert_eq!(ScalarType::from_mssql("nvarchar", 0, 0), ScalarType::Text);
        assert_eq!(
            ScalarType::from_mssql("numeric", 9, 3),
            ScalarType::Decimal { precision: 9, scale: 3 }
        );
        assert_eq!(ScalarType::from_mssql("datetime2", 27, 7), ScalarType::DateTime);
        assert_eq!(ScalarType::from_mssql("smalldatetime", 16, 0), ScalarType::DateTime);
        assert_eq!(ScalarType::from_mssql("date", 10, 0), ScalarType::DateTime);
        assert_eq!(
            ScalarType::from_mssql("varbinary", 0, 0),
            ScalarType::Other("varbinary".into())
        );
    }

    #[test]
    fn test_generated_column_split() {
        let schema = employee();
        assert_eq!(
            schema.generated_columns(),
            vec![("Id", true), ("CreatedDate", false)]
        );
        assert_eq!(schema.identity_columns().len(), 1);
        assert_eq!(schema.computed_columns()[0].name, "CreatedDate");
        let writable: Vec<_> = schema.writable_columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(writable, vec!["Name", "ManagerId"]);
    }

    #[test]
    fn test_key_columns_follow_key_order() {
        let schema = TableSchema::new("dbo", "OrderLine")
            .with_column(ColumnDescriptor::new("LineNo", ScalarType::Int))
            .with_column(ColumnDescriptor::new("OrderId", ScalarType::Int))
            .with_primary_key(&["OrderId", "LineNo"]);
        let keys: Vec<_> = schema.key_columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(keys, vec!["OrderId", "LineNo"]);
        assert!(schema.is_key("lineno"));
    }

    #[test]
    fn test_qualified_name() {
        assert_eq!(employee().qualified_name().unwrap(), "[dbo].[Employee]");
        assert_eq!(employee().full_name(), "dbo.Employee");
    }

    #[test]
    fn test_validate() {
        assert!(employee().validate().is_ok());

        let no_columns = TableSchema::new("dbo", "Empty");
        assert!(no_columns.validate().is_err());

        let bad_key = employee().with_primary_key(&["Missing"]);
        let err = bad_key.validate().unwrap_err().to_string();
        assert!(err.contains("Missing"));

        let dup = employee().with_column(ColumnDescriptor::new("name", ScalarType::Text));
        assert!(dup.validate().unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn test_manifest_yaml() {
        let yaml = r#"
name: Employee
columns:
  - name: Id
    type: int
    generated: identity
  - name: Salary
    type: decimal(10,2)
  - name: Name
    type: text
primary_key: [Id]
"#;
        let schema: TableSchema = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(schema.schema, "dbo");
        assert!(schema.columns[0].is_identity());
        assert_eq!(
            schema.columns[1].scalar_type,
            ScalarType::Decimal { precision: 10, scale: 2 }
        );
        assert!(schema.columns[2].nullable);

        let back = serde_yaml::to_string(&schema).unwrap();
        assert!(back.contains("decimal(10,2)"));
    }
}
