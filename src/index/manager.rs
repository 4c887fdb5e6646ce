//! Builds, updates and loads a collection's ANN index.
//!
//! Records are the source of truth and the index is derived from them, so
//! every failure to use the persisted index degrades to a full rebuild rather
//! than an error on the write path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::cache::IndexCache;
use crate::error::{StoreError, StoreResult};
use crate::index::changes::ChangeSet;
use crate::index::persist::{ANN_INDEX_FILE, AnnIndex};
use crate::index::staleness::{IndexState, StalenessCoordinator};
use crate::storage::{AnnIndexState, CollectionLock, CollectionMetadata, RecordStore};

/// Default fraction of the corpus that may change before an incremental
/// update is abandoned for a full rebuild.
pub const DEFAULT_REBUILD_THRESHOLD: f64 = 0.5;

/// How an index update was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Nothing to apply.
    Noop,
    /// Changes applied to the loaded index.
    Incremental,
    /// The index was rebuilt from every record.
    FullRebuild,
}

/// Outcome of [`AnnIndexManager::apply_incremental_update`].
#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub mode: UpdateMode,
    /// Vectors inserted into the index.
    pub inserted: usize,
    /// Labels soft-deleted.
    pub removed: usize,
    /// Queued ids whose record could not be read.
    pub skipped: usize,
    pub state: AnnIndexState,
}

/// Owns the ANN index of one collection.
#[derive(Debug, Clone)]
pub struct AnnIndexManager {
    store: RecordStore,
    coordinator: StalenessCoordinator,
    cache: Arc<IndexCache>,
    rebuild_threshold: f64,
}

impl AnnIndexManager {
    pub fn new(
        store: RecordStore,
        coordinator: StalenessCoordinator,
        cache: Arc<IndexCache>,
        rebuild_threshold: f64,
    ) -> Self {
        Self {
            store,
            coordinator,
            cache,
            rebuild_threshold,
        }
    }

    pub fn index_path(&self) -> PathBuf {
        self.store.root().join(ANN_INDEX_FILE)
    }

    pub fn coordinator(&self) -> &StalenessCoordinator {
        &self.coordinator
    }

    /// Whether the persisted index needs a rebuild. Lock-free.
    pub fn is_stale(&self) -> StoreResult<bool> {
        self.coordinator.is_stale(&self.store)
    }

    pub fn state(&self) -> StoreResult<IndexState> {
        self.coordinator.state()
    }

    /// Flags the index stale without touching it.
    pub fn mark_stale(&self) -> StoreResult<()> {
        self.coordinator.mark_stale()
    }

    /// Loads the persisted index through the cache.
    ///
    /// `Ok(None)` when no index file exists; corruption is reported as
    /// [`StoreError::IndexCorrupt`].
    pub fn load(&self) -> StoreResult<Option<Arc<AnnIndex>>> {
        self.cache.get_or_load(&self.index_path(), AnnIndex::load)
    }

    /// Rebuilds the index from every record on disk.
    pub fn rebuild_from_store(&self) -> StoreResult<AnnIndexState> {
        let lock = self.coordinator.lock()?;
        let mut metadata = CollectionMetadata::load(self.store.root())?;
        self.rebuild_locked(&lock, &mut metadata)?;
        Ok(metadata.ann_index)
    }

    /// Rebuilds only if the index is stale, re-checking under the lock so
    /// that concurrent readers rebuild once. Returns whether a rebuild ran.
    pub fn rebuild_if_stale(&self) -> StoreResult<bool> {
        if !self.is_stale()? {
            return Ok(false);
        }
        let lock = self.coordinator.lock()?;
        // Someone else may have finished a rebuild while we waited
        if !self.is_stale()? {
            return Ok(false);
        }
        let mut metadata = CollectionMetadata::load(self.store.root())?;
        self.rebuild_locked(&lock, &mut metadata)?;
        Ok(true)
    }

    fn rebuild_locked(
        &self,
        lock: &CollectionLock,
        metadata: &mut CollectionMetadata,
    ) -> StoreResult<()> {
        let path = self.index_path();
        self.coordinator.rebuild_locked(lock, metadata, |metadata| {
            let start = Instant::now();
            let scan = self.store.scan();

            let mut index = AnnIndex::new(metadata.ann_params.hnsw(), metadata.seed);
            for (path, record) in &scan.records {
                index.insert(&record.id, self.relative(path), &record.vector);
            }
            let size = index.save(&path)?;

            let state = &mut metadata.ann_index;
            state.version += 1;
            state.vector_count = scan.files_seen();
            state.live_labels = index.live_count();
            state.soft_deleted = 0;
            state.corrupt_records = scan.corrupt;
            state.file_size_bytes = size;

            tracing::info!(
                collection = %metadata.name,
                vectors = index.live_count(),
                corrupt = scan.corrupt,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "rebuilt ANN index"
            );
            self.cache.insert(&path, Arc::new(index));
            Ok(())
        })
    }

    /// Applies a session's changes to the persisted index.
    ///
    /// Work is proportional to the number of changed ids. Falls back to a
    /// full rebuild when the index is stale, missing or corrupt, when the
    /// change set exceeds the rebuild threshold, or when soft-deleted labels
    /// outnumber live ones.
    pub fn apply_incremental_update(&self, changes: &ChangeSet) -> StoreResult<UpdateReport> {
        let lock = self.coordinator.lock()?;
        let mut metadata = CollectionMetadata::load(self.store.root())?;
        let state = IndexState::from_metadata(&metadata.ann_index);

        if changes.is_empty() && state == IndexState::Fresh {
            return Ok(UpdateReport {
                mode: UpdateMode::Noop,
                inserted: 0,
                removed: 0,
                skipped: 0,
                state: metadata.ann_index,
            });
        }

        let index = match self.load_for_update(&metadata, changes, state) {
            Ok(index) => index,
            Err(reason) => {
                tracing::warn!(
                    collection = %metadata.name,
                    changes = changes.len(),
                    reason = %reason,
                    "falling back to full index rebuild"
                );
                self.rebuild_locked(&lock, &mut metadata)?;
                let live = metadata.ann_index.live_labels;
                return Ok(UpdateReport {
                    mode: UpdateMode::FullRebuild,
                    inserted: live,
                    removed: 0,
                    skipped: 0,
                    state: metadata.ann_index,
                });
            }
        };

        match self.apply_loaded(index, changes, &mut metadata) {
            Ok(report) => {
                drop(lock);
                Ok(report)
            }
            Err(e) => {
                // The index on disk may no longer match the records
                tracing::warn!(error = %e, collection = %metadata.name, "incremental update failed");
                if let Err(mark_err) = self.flag_stale_locked(&lock) {
                    tracing::error!(error = %mark_err, "failed to mark index stale after update failure");
                }
                Err(e)
            }
        }
    }

    /// Sets the stale flag on freshly loaded metadata. The caller holds the lock.
    fn flag_stale_locked(&self, _lock: &CollectionLock) -> StoreResult<()> {
        self.cache.invalidate(&self.index_path());
        let mut metadata = CollectionMetadata::load(self.store.root())?;
        metadata.ann_index.is_stale = true;
        metadata.ann_index.last_marked_stale_timestamp = Some(crate::storage::now_millis());
        metadata.save(self.store.root())
    }

    fn apply_loaded(
        &self,
        mut index: AnnIndex,
        changes: &ChangeSet,
        metadata: &mut CollectionMetadata,
    ) -> StoreResult<UpdateReport> {
        let start = Instant::now();
        let mut count_delta: i64 = 0;
        let mut removed = 0;
        let mut inserted = 0;
        let mut skipped = 0;
        let mut newly_corrupt = 0;

        for id in changes.deleted() {
            if index.remove(id) {
                removed += 1;
                count_delta -= 1;
            }
        }

        for (id, path) in changes.upserts() {
            let was_live = index.contains(id);
            match self.store.read_at(path) {
                Ok(record) if record.id == id => {
                    index.insert(id, self.relative(path), &record.vector);
                    inserted += 1;
                    if !was_live {
                        count_delta += 1;
                    }
                }
                Ok(record) => {
                    tracing::warn!(id, found = %record.id, "queued record file holds another id, skipping");
                    skipped += 1;
                    if was_live && index.remove(id) {
                        removed += 1;
                        count_delta -= 1;
                    }
                }
                Err(StoreError::FileRead { source, .. })
                    if source.kind() == std::io::ErrorKind::NotFound =>
                {
                    tracing::warn!(id, path = %path.display(), "queued record no longer on disk, skipping");
                    skipped += 1;
                    if was_live && index.remove(id) {
                        removed += 1;
                        count_delta -= 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(id, error = %e, "queued record unreadable, skipping");
                    skipped += 1;
                    newly_corrupt += 1;
                    if was_live {
                        index.remove(id);
                        removed += 1;
                    } else {
                        count_delta += 1;
                    }
                }
            }
        }

        let path = self.index_path();
        let size = index.save(&path)?;

        let ann = &mut metadata.ann_index;
        ann.version += 1;
        ann.vector_count = (ann.vector_count as i64 + count_delta).max(0) as usize;
        ann.live_labels = index.live_count();
        ann.soft_deleted = index.soft_deleted();
        ann.corrupt_records += newly_corrupt;
        ann.file_size_bytes = size;
        metadata.save(self.store.root())?;

        tracing::info!(
            collection = %metadata.name,
            inserted,
            removed,
            skipped,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "applied incremental index update"
        );
        self.cache.insert(&path, Arc::new(index));

        Ok(UpdateReport {
            mode: UpdateMode::Incremental,
            inserted,
            removed,
            skipped,
            state: metadata.ann_index.clone(),
        })
    }

    fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(self.store.root()).unwrap_or(path)
    }

    /// Loads a mutable copy of the index for an incremental update, or
    /// explains why a full rebuild is needed instead.
    fn load_for_update(
        &self,
        metadata: &CollectionMetadata,
        changes: &ChangeSet,
        state: IndexState,
    ) -> Result<AnnIndex, String> {
        if state != IndexState::Fresh {
            return Err(format!("index is {state}"));
        }

        let corpus = metadata.ann_index.vector_count.max(1) as f64;
        if changes.len() as f64 > self.rebuild_threshold * corpus {
            return Err(format!(
                "{} changes exceed {:.0}% of {} records",
                changes.len(),
                self.rebuild_threshold * 100.0,
                metadata.ann_index.vector_count
            ));
        }

        let index = match self.load() {
            Ok(Some(index)) => index,
            Ok(None) if metadata.ann_index.vector_count == 0 => {
                return Ok(AnnIndex::new(metadata.ann_params.hnsw(), metadata.seed));
            }
            Ok(None) => return Err("index file is missing".to_string()),
            Err(e) => return Err(e.to_string()),
        };

        if index.soft_deleted() > index.live_count() {
            return Err(format!(
                "{} soft-deleted labels outnumber {} live ones",
                index.soft_deleted(),
                index.live_count()
            ));
        }

        Ok(Arc::unwrap_or_clone(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{AnnParams, METADATA_VERSION, VectorRecord, now_millis};
    use crate::vector::{
        ProjectionMatrix, QuantizationBits, VectorDimension, VectorPathEncoder,
    };
    use tempfile::TempDir;

    const DIM: usize = 8;

    fn manager(root: &Path) -> AnnIndexManager {
        let dimension = VectorDimension::new(DIM).unwrap();
        let metadata = CollectionMetadata {
            version: METADATA_VERSION,
            name: "test".to_string(),
            vector_dim: dimension,
            reduced_dim: 4,
            quantization_bits: QuantizationBits::Two,
            depth_factor: 2,
            max_depth: 2,
            seed: 5,
            created_at: now_millis(),
            ann_params: AnnParams {
                m: 8,
                ef_construction: 64,
                ..AnnParams::default()
            },
            ann_index: AnnIndexState::default(),
        };
        metadata.save(root).unwrap();
        let matrix = Arc::new(ProjectionMatrix::generate(dimension, 4, 5));
        let encoder = VectorPathEncoder::new(matrix, metadata.encoder_params()).unwrap();
        let store = RecordStore::new(root, Arc::new(encoder), dimension);
        AnnIndexManager::new(
            store,
            StalenessCoordinator::new(root, None),
            Arc::new(IndexCache::default()),
            DEFAULT_REBUILD_THRESHOLD,
        )
    }

    fn vector(i: usize) -> Vec<f32> {
        (0..DIM)
            .map(|d| ((i * 7919 + d * 104_729) % 1000) as f32 / 500.0 - 1.0)
            .collect()
    }

    fn write(manager: &AnnIndexManager, changes: &mut ChangeSet, i: usize) {
        let record = VectorRecord::new(format!("r{i}"), vector(i));
        let path = manager.store.write(&record).unwrap();
        changes.record_upsert(&record.id, path, false);
    }

    #[test]
    fn test_rebuild_covers_all_records() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(temp_dir.path());
        let mut changes = ChangeSet::new();
        for i in 0..30 {
            write(&manager, &mut changes, i);
        }

        let state = manager.rebuild_from_store().unwrap();
        assert_eq!(state.vector_count, 30);
        assert_eq!(state.live_labels, 30);
        assert!(!state.is_stale);
        assert!(!manager.is_stale().unwrap());

        let index = manager.load().unwrap().unwrap();
        let hits = index.search(&vector(7), 1, 32);
        assert_eq!(hits[0].id, "r7");
    }

    #[test]
    fn test_small_change_set_is_incremental() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(temp_dir.path());
        let mut changes = ChangeSet::new();
        for i in 0..40 {
            write(&manager, &mut changes, i);
        }
        manager.rebuild_from_store().unwrap();

        let mut changes = ChangeSet::new();
        for i in 40..43 {
            write(&manager, &mut changes, i);
        }
        manager.store.delete(&["r0"]).unwrap();
        changes.record_delete("r0");

        let report = manager.apply_incremental_update(&changes).unwrap();
        assert_eq!(report.mode, UpdateMode::Incremental);
        assert_eq!(report.inserted, 3);
        assert_eq!(report.removed, 1);
        assert_eq!(report.state.vector_count, 42);
        assert_eq!(report.state.soft_deleted, 1);
        assert!(!manager.is_stale().unwrap());

        let index = manager.load().unwrap().unwrap();
        assert!(!index.contains("r0"));
        assert_eq!(index.search(&vector(41), 1, 32)[0].id, "r41");
    }

    #[test]
    fn test_large_change_set_rebuilds() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(temp_dir.path());
        let mut changes = ChangeSet::new();
        for i in 0..4 {
            write(&manager, &mut changes, i);
        }
        manager.rebuild_from_store().unwrap();

        let mut changes = ChangeSet::new();
        for i in 4..10 {
            write(&manager, &mut changes, i);
        }
        let report = manager.apply_incremental_update(&changes).unwrap();
        assert_eq!(report.mode, UpdateMode::FullRebuild);
        assert_eq!(report.state.vector_count, 10);
        assert_eq!(report.state.soft_deleted, 0);
    }

    #[test]
    fn test_stale_index_forces_rebuild() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(temp_dir.path());
        let mut changes = ChangeSet::new();
        for i in 0..20 {
            write(&manager, &mut changes, i);
        }
        manager.rebuild_from_store().unwrap();
        manager.mark_stale().unwrap();

        let mut changes = ChangeSet::new();
        write(&manager, &mut changes, 20);
        let report = manager.apply_incremental_update(&changes).unwrap();
        assert_eq!(report.mode, UpdateMode::FullRebuild);
        assert_eq!(manager.state().unwrap(), IndexState::Fresh);
    }

    #[test]
    fn test_vanished_added_record_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(temp_dir.path());
        let mut changes = ChangeSet::new();
        for i in 0..20 {
            write(&manager, &mut changes, i);
        }
        manager.rebuild_from_store().unwrap();

        let mut changes = ChangeSet::new();
        write(&manager, &mut changes, 20);
        write(&manager, &mut changes, 21);
        manager.store.delete(&["r21"]).unwrap();

        let report = manager.apply_incremental_update(&changes).unwrap();
        assert_eq!(report.mode, UpdateMode::Incremental);
        assert_eq!(report.inserted, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.state.vector_count, 21);
        assert!(!manager.is_stale().unwrap());
    }

    #[test]
    fn test_corrupt_index_falls_back_to_rebuild() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(temp_dir.path());
        let mut changes = ChangeSet::new();
        for i in 0..20 {
            write(&manager, &mut changes, i);
        }
        manager.rebuild_from_store().unwrap();
        std::fs::write(manager.index_path(), b"").unwrap();

        let mut changes = ChangeSet::new();
        write(&manager, &mut changes, 20);
        let report = manager.apply_incremental_update(&changes).unwrap();
        assert_eq!(report.mode, UpdateMode::FullRebuild);
        assert_eq!(report.state.vector_count, 21);
        assert!(manager.load().unwrap().is_some());
    }

    #[test]
    fn test_failed_incremental_save_marks_stale() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(temp_dir.path());
        let mut changes = ChangeSet::new();
        for i in 0..20 {
            write(&manager, &mut changes, i);
        }
        manager.rebuild_from_store().unwrap();
        let index = manager.load().unwrap().unwrap();

        // A non-empty directory in place of the index file cannot be
        // renamed over; the cache still serves the loaded index
        let path = manager.index_path();
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("blocker"), b"x").unwrap();
        manager.cache.insert(&path, index);

        let mut changes = ChangeSet::new();
        write(&manager, &mut changes, 20);
        let err = manager.apply_incremental_update(&changes).unwrap_err();
        assert!(matches!(err, StoreError::FileWrite { .. }));
        assert_eq!(manager.state().unwrap(), IndexState::Stale);
        assert!(manager.is_stale().unwrap());
    }

    #[test]
    fn test_rebuild_if_stale_runs_once() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(temp_dir.path());
        let mut changes = ChangeSet::new();
        for i in 0..5 {
            write(&manager, &mut changes, i);
        }

        assert!(manager.rebuild_if_stale().unwrap());
        assert!(!manager.rebuild_if_stale().unwrap());
    }

    #[test]
    fn test_empty_changes_on_fresh_index_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(temp_dir.path());
        let report = manager.apply_incremental_update(&ChangeSet::new()).unwrap();
        assert_eq!(report.mode, UpdateMode::Noop);
        assert!(!manager.index_path().exists());
    }
}
