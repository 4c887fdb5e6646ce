//! Cross-process staleness protocol for a collection's ANN index.
//!
//! State lives in `collection_meta.json` and every transition happens while
//! holding the collection lock:
//!
//! ```text
//!   Fresh ──mark_stale──▶ Stale ──reader starts rebuild──▶ Rebuilding
//!     ▲                                                       │
//!     └──────────────── rebuild succeeded ◀───────────────────┤
//!                       rebuild failed ──▶ Stale ◀────────────┘
//! ```
//!
//! Deciding whether to act only reads the metadata, without the lock. A stale
//! read costs at most one redundant rebuild.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::error::StoreResult;
use crate::index::persist::ANN_INDEX_FILE;
use crate::storage::{AnnIndexState, CollectionLock, CollectionMetadata, RecordStore, now_millis};

/// Observable index state of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    Fresh,
    Stale,
    Rebuilding,
}

impl IndexState {
    /// Derives the state from the persisted flags.
    pub fn from_metadata(state: &AnnIndexState) -> Self {
        if state.rebuilding_since.is_some() {
            Self::Rebuilding
        } else if state.is_stale {
            Self::Stale
        } else {
            Self::Fresh
        }
    }
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fresh => "fresh",
            Self::Stale => "stale",
            Self::Rebuilding => "rebuilding",
        })
    }
}

/// Coordinates staleness transitions for the collection at `root`.
#[derive(Debug, Clone)]
pub struct StalenessCoordinator {
    root: PathBuf,
    lock_timeout: Option<Duration>,
}

impl StalenessCoordinator {
    pub fn new(root: impl Into<PathBuf>, lock_timeout: Option<Duration>) -> Self {
        Self {
            root: root.into(),
            lock_timeout,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Takes the exclusive collection lock.
    pub fn lock(&self) -> StoreResult<CollectionLock> {
        CollectionLock::acquire(&self.root, self.lock_timeout)
    }

    /// State as recorded in metadata. Lock-free.
    pub fn state(&self) -> StoreResult<IndexState> {
        let metadata = CollectionMetadata::load(&self.root)?;
        Ok(IndexState::from_metadata(&metadata.ann_index))
    }

    /// Whether the persisted index must be rebuilt before it can be trusted.
    ///
    /// True when the flag is set or a rebuild is in flight (or died), and as
    /// crash-recovery fallbacks when the recorded vector count differs from
    /// the record files on disk or the index file does not match its
    /// recorded size. Lock-free.
    pub fn is_stale(&self, store: &RecordStore) -> StoreResult<bool> {
        let metadata = CollectionMetadata::load(&self.root)?;
        let state = &metadata.ann_index;
        if IndexState::from_metadata(state) != IndexState::Fresh {
            return Ok(true);
        }

        let on_disk = store.count_records();
        if on_disk != state.vector_count {
            tracing::debug!(
                recorded = state.vector_count,
                on_disk,
                "record count diverged from index metadata"
            );
            return Ok(true);
        }

        let index_path = self.root.join(ANN_INDEX_FILE);
        let actual_size = std::fs::metadata(&index_path).map(|m| m.len()).ok();
        let consistent = match actual_size {
            Some(size) => size == state.file_size_bytes,
            // An empty collection may have no index file yet
            None => state.vector_count == 0,
        };
        if !consistent {
            tracing::debug!(
                recorded = state.file_size_bytes,
                actual = ?actual_size,
                "index file does not match metadata"
            );
        }
        Ok(!consistent)
    }

    /// Flags the index stale. Never touches the index binary.
    ///
    /// Concurrent callers serialize on the lock; the flag ends up set no
    /// matter how they interleave.
    pub fn mark_stale(&self) -> StoreResult<()> {
        let _lock = self.lock()?;
        let mut metadata = CollectionMetadata::load(&self.root)?;
        metadata.ann_index.is_stale = true;
        metadata.ann_index.last_marked_stale_timestamp = Some(now_millis());
        metadata.save(&self.root)?;
        tracing::debug!(collection = %metadata.name, "marked index stale");
        Ok(())
    }

    /// Runs `build` as a rebuild. The caller must hold the lock.
    ///
    /// The metadata moves to `Rebuilding` before `build` runs. On success
    /// `build` is expected to have filled in the new index state and the
    /// metadata is left `Fresh`; on failure it is left `Stale` so the next
    /// reader retries.
    pub fn rebuild_locked<F>(
        &self,
        _lock: &CollectionLock,
        metadata: &mut CollectionMetadata,
        build: F,
    ) -> StoreResult<()>
    where
        F: FnOnce(&mut CollectionMetadata) -> StoreResult<()>,
    {
        metadata.ann_index.rebuilding_since = Some(now_millis());
        metadata.save(&self.root)?;

        match build(metadata) {
            Ok(()) => {
                metadata.ann_index.rebuilding_since = None;
                metadata.ann_index.is_stale = false;
                metadata.ann_index.last_rebuild_timestamp = Some(now_millis());
                metadata.save(&self.root)
            }
            Err(e) => {
                tracing::warn!(error = %e, collection = %metadata.name, "index rebuild failed");
                metadata.ann_index.rebuilding_since = None;
                metadata.ann_index.is_stale = true;
                if let Err(save_err) = metadata.save(&self.root) {
                    tracing::error!(error = %save_err, "failed to record rebuild failure");
                }
                Err(e)
            }
        }
    }
}
