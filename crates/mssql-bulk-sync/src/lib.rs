//! # mssql-bulk-sync
//!
//! Bulk synchronization of in-memory records with SQL Server tables.
//!
//! A batch of changed records is classified into inserts, updates and
//! deletes, loaded into a session temp table with the TDS bulk-load protocol
//! and applied with a single `MERGE`. Server-generated values (identities,
//! computed columns) are captured with `OUTPUT ... INTO` and written back onto
//! the originating records, including rows that had no key before the merge.
//!
//! - **Change classification** from explicit tracking state
//! - **Staging pipeline** with placeholder identities for unsaved rows
//! - **Refresh correlation** of output rows back to records
//! - **Schema catalogs** from explicit registration or `sys.*` views
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mssql_bulk_sync::{
//!     Config, DynamicRecord, MssqlConnection, RefreshPolicy, StagingPipeline, SysCatalog,
//!     TdsBulkProvider, Tracked,
//! };
//!
//! #[tokio::main]
//! async fn main() -> mssql_bulk_sync::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let mut conn = MssqlConnection::new(config.target.clone());
//!     let pipeline = StagingPipeline::new(
//!         Arc::new(SysCatalog::new(config.target.schema.clone())),
//!         Arc::new(TdsBulkProvider::new()),
//!     )
//!     .with_options(config.sync.options());
//!
//!     let mut rows = vec![
//!         Tracked::added(DynamicRecord::new().with("Id", 0).with("Name", "A")),
//!         Tracked::added(DynamicRecord::new().with("Id", 0).with("Name", "B")),
//!     ];
//!     let summary = pipeline
//!         .synchronize_tracked(&mut conn, "Employee", &mut rows, RefreshPolicy::Identity)
//!         .await?;
//!     println!("Inserted {} rows", summary.inserted);
//!     Ok(())
//! }
//! ```

pub mod bulk;
pub mod capture;
pub mod catalog;
pub mod classify;
pub mod config;
pub mod connection;
pub mod core;
pub mod error;
pub mod extensions;
pub mod pipeline;
pub mod refresh;
pub mod sql;

// Re-exports for convenient access
pub use bulk::{BulkTransferProvider, RowBatch, TdsBulkProvider};
pub use capture::{plan_capture, OutputCapture, RefreshPolicy};
pub use catalog::{SchemaCatalog, StaticCatalog, SysCatalog};
pub use classify::{classify, ChangeKind, ChangeSet, RecordState, Tracked};
pub use config::{Config, SyncConfig, TargetConfig};
pub use connection::{MssqlConnection, Provider, SyncConnection, TdsClient};
pub use crate::core::{
    ColumnDescriptor, DynamicRecord, Entity, GenerationKind, Record, ScalarType, SqlValue,
    TableSchema,
};
pub use error::{Result, SyncError};
pub use extensions::{delete_by_column, upsert_record};
pub use pipeline::{StagingPipeline, SyncOptions, SyncSummary};
pub use refresh::{correlate, CorrelationKey};
