//! Change classification: splitting a batch of records into the insert,
//! update and delete lists of one synchronization call.
//!
//! Tracking state is held explicitly in [`Tracked`] rather than inferred from
//! the records, and [`classify`] is a pure function of that state.

use serde::{Deserialize, Serialize};

use crate::core::{Record, TableSchema};
use crate::error::{Result, SyncError};

/// Per-record tracking state, as a change tracker would report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordState {
    /// New, not yet persisted.
    Added,
    /// Persisted and changed.
    Modified,
    /// Persisted and marked for removal.
    Deleted,
    /// Persisted and clean.
    Unchanged,
    /// Not registered with the tracker.
    Detached,
}

impl RecordState {
    /// What a batch should do with a record in this state.
    ///
    /// `Detached` has no classification and is rejected by [`classify`].
    pub fn change_kind(self) -> Option<ChangeKind> {
        match self {
            RecordState::Added => Some(ChangeKind::Insert),
            RecordState::Modified => Some(ChangeKind::Update),
            RecordState::Deleted => Some(ChangeKind::Delete),
            RecordState::Unchanged | RecordState::Detached => None,
        }
    }

    /// State after a successful synchronization.
    ///
    /// Inserts become clean only because the refresh has already written
    /// their real identity back.
    pub fn after_sync(self) -> RecordState {
        match self {
            RecordState::Added | RecordState::Modified => RecordState::Unchanged,
            RecordState::Deleted => RecordState::Detached,
            other => other,
        }
    }
}

/// The write a record contributes to a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A record paired with its tracking state.
#[derive(Debug, Clone, PartialEq)]
pub struct Tracked<R> {
    state: RecordState,
    record: R,
}

impl<R> Tracked<R> {
    pub fn new(state: RecordState, record: R) -> Self {
        Self { state, record }
    }

    /// Track a new record.
    pub fn added(record: R) -> Self {
        Self::new(RecordState::Added, record)
    }

    /// Track a record loaded from the store.
    pub fn unchanged(record: R) -> Self {
        Self::new(RecordState::Unchanged, record)
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    pub fn record(&self) -> &R {
        &self.record
    }

    /// Mutable access. A clean record becomes modified.
    pub fn record_mut(&mut self) -> &mut R {
        if self.state == RecordState::Unchanged {
            self.state = RecordState::Modified;
        }
        &mut self.record
    }

    /// Mark for deletion. Deleting a never-persisted record just forgets it.
    pub fn mark_deleted(&mut self) {
        self.state = match self.state {
            RecordState::Added => RecordState::Detached,
            _ => RecordState::Deleted,
        };
    }

    pub fn into_record(self) -> R {
        self.record
    }

    pub(crate) fn finish_sync(&mut self) {
        self.state = self.state.after_sync();
    }
}

/// Disjoint insert/update/delete lists for one record type and one call.
#[derive(Debug)]
pub struct ChangeSet<'a, R> {
    pub inserts: Vec<&'a mut R>,
    pub updates: Vec<&'a mut R>,
    pub deletes: Vec<&'a R>,
}

impl<'a, R> Default for ChangeSet<'a, R> {
    fn default() -> Self {
        Self {
            inserts: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
        }
    }
}

impl<'a, R> ChangeSet<'a, R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from explicit lists.
    pub fn from_lists(inserts: Vec<&'a mut R>, updates: Vec<&'a mut R>, deletes: Vec<&'a R>) -> Self {
        Self {
            inserts,
            updates,
            deletes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }
}

impl<'a, R: Record> ChangeSet<'a, R> {
    /// Split a combined upsert list the legacy way: a record whose first
    /// identity column is zero (or NULL) is new, anything else is an update.
    ///
    /// Tables without an identity column treat every upsert as an update.
    pub fn infer_from_identity(
        schema: &TableSchema,
        upserts: Vec<&'a mut R>,
        deletes: Vec<&'a R>,
    ) -> Self {
        let identity = schema.identity_columns().first().map(|c| c.name.clone());
        let mut set = Self {
            deletes,
            ..Self::default()
        };

        for record in upserts {
            let is_new = identity.as_deref().is_some_and(|column| {
                record
                    .value(column)
                    .is_some_and(|v| v.is_unsaved_identity())
            });
            if is_new {
                set.inserts.push(record);
            } else {
                set.updates.push(record);
            }
        }
        set
    }
}

/// Classify tracked records into a [`ChangeSet`].
///
/// Unchanged records are skipped. A detached record fails the whole batch
/// with [`SyncError::UntrackedRecord`] before anything is touched.
pub fn classify<'a, R>(entity: &str, entries: &'a mut [Tracked<R>]) -> Result<ChangeSet<'a, R>> {
    if let Some(index) = entries
        .iter()
        .position(|e| e.state == RecordState::Detached)
    {
        return Err(SyncError::UntrackedRecord {
            entity: entity.to_string(),
            index,
        });
    }

    let mut set = ChangeSet::new();
    for entry in entries {
        let Tracked { state, record } = entry;
        match state.change_kind() {
            Some(ChangeKind::Insert) => set.inserts.push(record),
            Some(ChangeKind::Update) => set.updates.push(record),
            Some(ChangeKind::Delete) => {
                let record: &'a R = record;
                set.deletes.push(record);
            }
            None => {}
        }
    }
    Ok(set)
}
