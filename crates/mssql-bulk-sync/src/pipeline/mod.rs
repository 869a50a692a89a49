//! Staging pipeline: the end-to-end bulk synchronization of one change set.
//!
//! For one entity and one [`ChangeSet`] the pipeline:
//!
//! 1. resolves the table through the [`SchemaCatalog`]
//! 2. plans the output capture from the [`RefreshPolicy`]
//! 3. stages inserts and updates, MERGEs them in one statement, refreshes
//!    generated values and drops the scratch tables
//! 4. stages delete keys and removes the matching rows
//! 5. leaves the connection open or closed exactly as it found it
//!
//! Statements run one after another on the caller's connection with no
//! enclosing transaction. A failure aborts the remaining steps and is returned
//! unchanged; temp tables created before the failure are left to the session.

mod identity;
mod staging;

pub use identity::{assign_placeholders, SyncOptions};
pub use staging::{key_batch, record_batch};

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::bulk::BulkTransferProvider;
use crate::capture::{plan_capture, RefreshPolicy};
use crate::catalog::SchemaCatalog;
use crate::classify::{classify, ChangeSet, Tracked};
use crate::connection::{Provider, SyncConnection};
use crate::core::identifier::temp_table_name;
use crate::core::Record;
use crate::error::{Result, SyncError};
use crate::refresh::refresh_records;
use crate::sql::{self, DELETE_TABLE_SUFFIX};

/// Outcome of one synchronization call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncSummary {
    /// Destination table (`schema.table`).
    pub table: String,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Records that received generated values.
    pub refreshed: usize,
    /// Placeholder identities handed out before staging.
    pub placeholders: usize,
    pub elapsed_ms: u64,
}

/// Runs change sets against SQL Server through staging tables.
pub struct StagingPipeline {
    catalog: Arc<dyn SchemaCatalog>,
    bulk: Arc<dyn BulkTransferProvider>,
    options: SyncOptions,
}

impl StagingPipeline {
    pub fn new(catalog: Arc<dyn SchemaCatalog>, bulk: Arc<dyn BulkTransferProvider>) -> Self {
        Self {
            catalog,
            bulk,
            options: SyncOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Synchronize a change set, refreshing generated columns per `policy`.
    ///
    /// Records are updated in place: placeholder identities on inserts are
    /// replaced by the real ones when the policy captures them.
    pub async fn synchronize<R: Record + Send + Sync>(
        &self,
        conn: &mut dyn SyncConnection,
        entity: &str,
        changes: &mut ChangeSet<'_, R>,
        policy: RefreshPolicy,
    ) -> Result<SyncSummary> {
        check_provider(conn)?;
        if changes.is_empty() {
            debug!("{}: nothing to synchronize", entity);
            return Ok(SyncSummary::default());
        }

        let was_open = open_if_closed(conn).await?;
        let result = self.run(conn, entity, changes, policy).await;
        restore_connection(conn, entity, was_open, result).await
    }

    /// Synchronize a combined upsert list plus deletes.
    ///
    /// Records whose first identity column is zero (or NULL) are inserted,
    /// the rest are updated; see [`ChangeSet::infer_from_identity`].
    pub async fn synchronize_upserts<R: Record + Send + Sync>(
        &self,
        conn: &mut dyn SyncConnection,
        entity: &str,
        upserts: Vec<&mut R>,
        deletes: Vec<&R>,
        policy: RefreshPolicy,
    ) -> Result<SyncSummary> {
        check_provider(conn)?;
        if upserts.is_empty() && deletes.is_empty() {
            return Ok(SyncSummary::default());
        }

        let was_open = open_if_closed(conn).await?;
        let result = match self.catalog.table_schema(conn, entity).await {
            Ok(schema) => {
                let mut changes = ChangeSet::infer_from_identity(&schema, upserts, deletes);
                self.synchronize(conn, entity, &mut changes, policy).await
            }
            Err(e) => Err(e),
        };
        restore_connection(conn, entity, was_open, result).await
    }

    /// Synchronize tracked records and reconcile their tracking state.
    ///
    /// `RefreshPolicy::None` is treated as `Identity`, since an insert only
    /// becomes clean once its real key is known. On success inserts and
    /// updates become `Unchanged` and deletes become `Detached`. On failure no
    /// state changes.
    pub async fn synchronize_tracked<R: Record + Send + Sync>(
        &self,
        conn: &mut dyn SyncConnection,
        entity: &str,
        entries: &mut [Tracked<R>],
        policy: RefreshPolicy,
    ) -> Result<SyncSummary> {
        let policy = policy.for_tracked();
        let summary = {
            let mut changes = classify(entity, entries)?;
            self.synchronize(conn, entity, &mut changes, policy).await?
        };

        for entry in entries.iter_mut() {
            entry.finish_sync();
        }
        Ok(summary)
    }

    async fn run<R: Record + Send + Sync>(
        &self,
        conn: &mut dyn SyncConnection,
        entity: &str,
        changes: &mut ChangeSet<'_, R>,
        policy: RefreshPolicy,
    ) -> Result<SyncSummary> {
        let started = Instant::now();
        let schema = self.catalog.table_schema(conn, entity).await?;
        schema.validate()?;
        let table = schema.full_name();

        let has_inserts = !changes.inserts.is_empty();
        let has_updates = !changes.updates.is_empty();
        let capture = plan_capture(&schema, entity, has_inserts, has_updates, policy)?;
        if has_updates && capture.is_some() && !sql::updates_reach_output(&schema) {
            return Err(SyncError::Schema(format!(
                "{}: updated rows cannot be refreshed, the table has no column a MERGE can set",
                table
            )));
        }

        let mut summary = SyncSummary {
            table: table.clone(),
            inserted: changes.inserts.len(),
            updated: changes.updates.len(),
            deleted: changes.deletes.len(),
            ..SyncSummary::default()
        };

        if has_inserts || has_updates {
            let staging = temp_table_name(entity);
            let columns: Vec<_> = schema.columns.iter().collect();
            let step = Instant::now();
            conn.execute(&sql::staging_table_ddl(&staging, &schema, &columns)?)
                .await?;

            if let Some(capture) = &capture {
                conn.execute(&capture.ddl).await?;
                summary.placeholders =
                    assign_placeholders(&schema, &mut changes.inserts, &self.options)?;
            }
            debug!("{}: created {} in {:?}", table, staging, step.elapsed());

            let step = Instant::now();
            let batch = record_batch(
                &schema,
                changes
                    .inserts
                    .iter()
                    .map(|r| &**r)
                    .chain(changes.updates.iter().map(|r| &**r)),
            )?;
            let loaded = self.bulk.write_rows(conn, &staging, &batch).await?;
            debug!("{}: staged {} rows in {:?}", table, loaded, step.elapsed());

            let step = Instant::now();
            conn.execute(&sql::merge_sql(&schema, &staging, capture.as_ref())?)
                .await?;
            debug!("{}: merged in {:?}", table, step.elapsed());

            if let Some(capture) = &capture {
                summary.refreshed = refresh_records(
                    conn,
                    &table,
                    capture,
                    changes
                        .inserts
                        .iter_mut()
                        .map(|r| &mut **r)
                        .chain(changes.updates.iter_mut().map(|r| &mut **r)),
                )
                .await?;
                conn.execute(&capture.drop_sql()?).await?;
            }

            conn.execute(&sql::drop_table_sql(&staging)?).await?;
        }

        if !changes.deletes.is_empty() {
            let step = Instant::now();
            let staging = format!("{}{}", temp_table_name(entity), DELETE_TABLE_SUFFIX);
            let batch = key_batch(&schema, changes.deletes.iter().copied())?;
            let keys: Vec<_> = batch.columns.iter().collect();

            conn.execute(&sql::staging_table_ddl(&staging, &schema, &keys)?)
                .await?;
            self.bulk.write_rows(conn, &staging, &batch).await?;
            conn.execute(&sql::delete_sql(&schema, &staging)?).await?;
            conn.execute(&sql::drop_table_sql(&staging)?).await?;
            debug!(
                "{}: deleted {} keys in {:?}",
                table,
                batch.len(),
                step.elapsed()
            );
        }

        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            "{}: {} inserted, {} updated, {} deleted, {} refreshed in {}ms",
            table,
            summary.inserted,
            summary.updated,
            summary.deleted,
            summary.refreshed,
            summary.elapsed_ms
        );
        Ok(summary)
    }
}

fn check_provider(conn: &dyn SyncConnection) -> Result<()> {
    match conn.provider() {
        Provider::SqlServer => Ok(()),
        other => Err(SyncError::UnsupportedProvider(other.to_string())),
    }
}

/// Open the connection if needed, returning whether it was already open.
async fn open_if_closed(conn: &mut dyn SyncConnection) -> Result<bool> {
    let was_open = conn.is_open();
    if !was_open {
        conn.open().await?;
    }
    Ok(was_open)
}

/// Close a connection this call opened, on success and on failure.
async fn restore_connection<T>(
    conn: &mut dyn SyncConnection,
    entity: &str,
    was_open: bool,
    result: Result<T>,
) -> Result<T> {
    if was_open || !conn.is_open() {
        return result;
    }
    match (conn.close().await, result) {
        (Ok(()), result) => result,
        (Err(close_err), Ok(_)) => Err(close_err),
        (Err(close_err), Err(e)) => {
            warn!("{}: closing connection after failure: {}", entity, close_err);
            Err(e)
        }
    }
}
