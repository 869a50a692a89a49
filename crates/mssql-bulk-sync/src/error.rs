//! Error types for the bulk synchronization library.

use thiserror::Error;

/// Main error type for synchronization operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A record in the batch is not registered with the change tracker.
    #[error("Record #{index} of entity {entity} is not tracked - attach it before synchronizing")]
    UntrackedRecord { entity: String, index: usize },

    /// The connection is not a kind the bulk path can drive.
    #[error("Unsupported provider: {0} (only SQL Server connections are supported)")]
    UnsupportedProvider(String),

    /// A column type has no staging DDL mapping.
    #[error("Unsupported column type {type_name} for column {table}.{column}")]
    UnsupportedColumnType {
        table: String,
        column: String,
        type_name: String,
    },

    /// Captured output rows could not be matched to in-memory records.
    #[error("Refresh correlation failed for table {table}: {message}")]
    RefreshCorrelation { table: String, message: String },

    /// A DDL/DML statement was rejected by SQL Server.
    #[error("Statement execution failed: {statement}")]
    StatementExecution {
        statement: String,
        #[source]
        source: tiberius::error::Error,
    },

    /// A statement failed on a backend that reports plain messages.
    #[error("Statement execution failed: {statement}: {message}")]
    Statement { statement: String, message: String },

    /// Bulk load into a staging table failed.
    #[error("Transfer failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// Schema metadata could not be resolved.
    #[error("Schema resolution failed: {0}")]
    Schema(String),

    /// Connection could not be established or was lost.
    #[error("Connection error: {message}\n  Context: {context}")]
    Connection { message: String, context: String },

    /// Record property access failed.
    #[error("Record error: {0}")]
    Record(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for connection errors.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Exit code for schema, type and provider errors.
pub const EXIT_SCHEMA_ERROR: u8 = 3;
/// Exit code for statement and transfer failures.
pub const EXIT_STATEMENT_ERROR: u8 = 4;
/// Exit code for refresh correlation failures.
pub const EXIT_CORRELATION_ERROR: u8 = 5;
/// Exit code for untracked or malformed records.
pub const EXIT_RECORD_ERROR: u8 = 6;
/// Exit code for IO errors.
pub const EXIT_IO_ERROR: u8 = 7;

impl SyncError {
    /// Create a Connection error with context about where it occurred
    pub fn connection(message: impl ToString, context: impl Into<String>) -> Self {
        SyncError::Connection {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Transfer error
    pub fn transfer(table: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Transfer {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a RefreshCorrelation error
    pub fn correlation(table: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::RefreshCorrelation {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Wrap a tiberius failure with the statement that caused it.
    pub fn statement(statement: impl Into<String>, source: tiberius::error::Error) -> Self {
        SyncError::StatementExecution {
            statement: statement.into(),
            source,
        }
    }

    /// Map the error family to a process exit code.
    pub fn exit_code(&self) -> u8 {
        match self {
            SyncError::Config(_) | SyncError::Yaml(_) | SyncError::Json(_) => EXIT_CONFIG_ERROR,
            SyncError::Connection { .. } => EXIT_CONNECTION_ERROR,
            SyncError::UnsupportedProvider(_)
            | SyncError::UnsupportedColumnType { .. }
            | SyncError::Schema(_) => EXIT_SCHEMA_ERROR,
            SyncError::StatementExecution { .. }
            | SyncError::Statement { .. }
            | SyncError::Transfer { .. } => EXIT_STATEMENT_ERROR,
            SyncError::RefreshCorrelation { .. } => EXIT_CORRELATION_ERROR,
            SyncError::UntrackedRecord { .. } | SyncError::Record(_) => EXIT_RECORD_ERROR,
            SyncError::Io(_) => EXIT_IO_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        // Add error chain for wrapped errors
        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;
