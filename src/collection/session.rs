//! Batched writes against one collection.
//!
//! A session writes records immediately but touches the ANN index once, at
//! [`WriteSession::end`]: either one incremental update or one stale mark.

use std::path::PathBuf;

use serde::Serialize;

use crate::collection::store::Collection;
use crate::error::StoreResult;
use crate::index::{ChangeSet, UpdateReport};
use crate::storage::{IdIndex, VectorRecord};

/// What a finished session did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSummary {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    /// The index was marked stale instead of updated.
    pub deferred: bool,
    /// Present when the index was updated at session end.
    pub update: Option<UpdateReport>,
}

/// An open batch of writes.
///
/// Ending the session is required to bring the index up to date. A session
/// dropped without [`end`](WriteSession::end) marks the index stale so the
/// next reader rebuilds it.
#[derive(Debug)]
pub struct WriteSession<'a> {
    collection: &'a Collection,
    ids: IdIndex,
    changes: ChangeSet,
    finished: bool,
}

impl<'a> WriteSession<'a> {
    pub(crate) fn begin(collection: &'a Collection, ids: IdIndex) -> Self {
        tracing::debug!(
            collection = collection.name(),
            records = ids.len(),
            "began write session"
        );
        Self {
            collection,
            ids,
            changes: ChangeSet::new(),
            finished: false,
        }
    }

    /// Writes one record, replacing any earlier record with the same id.
    ///
    /// Returns the record file path.
    pub fn upsert(&mut self, record: &VectorRecord) -> StoreResult<PathBuf> {
        let store = self.collection.record_store();
        let path = store.write(record)?;
        let previous = self.ids.insert(record, path.clone());
        if let Some(old) = &previous {
            // A changed vector may land in a different bucket
            if *old != path {
                store.delete_paths(std::slice::from_ref(old))?;
            }
        }
        self.changes
            .record_upsert(&record.id, path.clone(), previous.is_some());
        Ok(path)
    }

    pub fn upsert_batch(&mut self, records: &[VectorRecord]) -> StoreResult<usize> {
        for record in records {
            self.upsert(record)?;
        }
        Ok(records.len())
    }

    /// Deletes records by id. Unknown ids are ignored; returns how many
    /// existed.
    pub fn delete(&mut self, ids: &[&str]) -> StoreResult<usize> {
        let store = self.collection.record_store();
        let mut deleted = 0;
        for id in ids {
            let Some(path) = self.ids.remove(id) else {
                continue;
            };
            store.delete_paths(std::slice::from_ref(&path))?;
            self.changes.record_delete(id);
            deleted += 1;
        }
        Ok(deleted)
    }

    /// Deletes every record whose payload `file_path` equals `file`.
    pub fn delete_by_file(&mut self, file: &str) -> StoreResult<usize> {
        let ids = self
            .ids
            .ids_for_file(self.collection.record_store(), file);
        let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
        let deleted = self.delete(&ids)?;
        tracing::debug!(file, deleted, "deleted records by source file");
        Ok(deleted)
    }

    /// Changes accumulated so far.
    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    /// Closes the session.
    ///
    /// With `defer_rebuild` the index is only marked stale and the next
    /// query rebuilds it; otherwise the changes are applied now. A failed
    /// update still leaves the index marked stale.
    pub fn end(mut self, defer_rebuild: bool) -> StoreResult<SessionSummary> {
        self.finished = true;
        let changes = std::mem::take(&mut self.changes);
        self.collection.store_ids(std::mem::take(&mut self.ids));

        let mut summary = SessionSummary {
            added: changes.added_count(),
            updated: changes.updated_count(),
            deleted: changes.deleted_count(),
            ..SessionSummary::default()
        };
        if changes.is_empty() {
            return Ok(summary);
        }

        if defer_rebuild {
            self.collection.mark_stale()?;
            summary.deferred = true;
            tracing::debug!(
                collection = self.collection.name(),
                changes = changes.len(),
                "deferred index update"
            );
        } else {
            match self.collection.index_manager().apply_incremental_update(&changes) {
                Ok(report) => summary.update = Some(report),
                Err(e) => {
                    // Records are already on disk; make the next reader rebuild
                    if let Err(mark_err) = self.collection.mark_stale() {
                        tracing::error!(error = %mark_err, "failed to mark index stale");
                    }
                    return Err(e);
                }
            }
        }
        Ok(summary)
    }
}

impl Drop for WriteSession<'_> {
    fn drop(&mut self) {
        if self.finished || self.changes.is_empty() {
            return;
        }
        tracing::warn!(
            collection = self.collection.name(),
            changes = self.changes.len(),
            "write session dropped without end, marking index stale"
        );
        self.collection.refresh_ids();
        if let Err(e) = self.collection.mark_stale() {
            tracing::error!(error = %e, "failed to mark index stale");
        }
    }
}
