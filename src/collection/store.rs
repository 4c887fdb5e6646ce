//! Handle over one open collection.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::cache::IndexCache;
use crate::collection::session::{SessionSummary, WriteSession};
use crate::collection::CollectionOptions;
use crate::embedding::EmbeddingGenerator;
use crate::error::StoreResult;
use crate::index::{ANN_INDEX_FILE, AnnIndexManager, IndexState, StalenessCoordinator};
use crate::query::{AccuracyLevel, QueryEngine, SearchFilter, SearchOutcome, SearchResult};
use crate::storage::{AnnIndexState, AnnParams, CollectionMetadata, IdIndex, RecordStore, VectorRecord};
use crate::vector::{ProjectionMatrix, VectorPathEncoder};

/// File name of the projection matrix inside a collection root.
pub const PROJECTION_FILE: &str = "projection_matrix.bin";

/// Snapshot of a collection's condition.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionHealth {
    pub name: String,
    pub vector_dim: usize,
    pub record_count: usize,
    pub index_present: bool,
    pub is_stale: bool,
    pub state: IndexState,
    pub ann_params: AnnParams,
    /// Unreadable records seen by the last index build or update.
    pub corrupt_records: usize,
    pub soft_deleted_labels: usize,
    pub index_file_size: u64,
    pub last_rebuild_timestamp: Option<i64>,
    pub last_marked_stale_timestamp: Option<i64>,
}

/// An open collection.
///
/// Cheap to share between threads. Several handles, in this process or
/// others, may point at the same directory; they coordinate through the
/// collection lock and metadata only.
#[derive(Debug)]
pub struct Collection {
    name: String,
    root: PathBuf,
    metadata: CollectionMetadata,
    store: RecordStore,
    index: AnnIndexManager,
    engine: QueryEngine,
    options: CollectionOptions,
    /// Filename-derived ids, cached between calls. Refreshed by every
    /// write session.
    ids: Mutex<Option<IdIndex>>,
}

impl Collection {
    /// Opens an existing collection directory.
    pub(crate) fn open(
        name: &str,
        root: PathBuf,
        cache: Arc<IndexCache>,
        options: CollectionOptions,
    ) -> StoreResult<Self> {
        let metadata = CollectionMetadata::load(&root)?;
        let matrix = ProjectionMatrix::load(&root.join(PROJECTION_FILE))?;
        if matrix.input_dim() != metadata.vector_dim.get()
            || matrix.reduced_dim() != metadata.reduced_dim
        {
            return Err(crate::vector::VectorError::InvalidProjection(format!(
                "matrix is {}x{}, metadata expects {}x{}",
                matrix.input_dim(),
                matrix.reduced_dim(),
                metadata.vector_dim,
                metadata.reduced_dim
            ))
            .into());
        }

        let encoder = VectorPathEncoder::new(Arc::new(matrix), metadata.encoder_params())?;
        let store = RecordStore::new(&root, Arc::new(encoder), metadata.vector_dim);
        let coordinator = StalenessCoordinator::new(&root, options.lock_timeout);
        let index = AnnIndexManager::new(
            store.clone(),
            coordinator,
            cache,
            options.rebuild_threshold,
        );
        let engine = QueryEngine::new(store.clone(), index.clone(), metadata.ann_params.ef_search)
            .with_max_buckets(options.max_buckets);

        Ok(Self {
            name: name.to_string(),
            root,
            metadata,
            store,
            index,
            engine,
            options,
            ids: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Metadata as read when the collection was opened.
    pub fn metadata(&self) -> &CollectionMetadata {
        &self.metadata
    }

    pub fn record_store(&self) -> &RecordStore {
        &self.store
    }

    pub fn index_manager(&self) -> &AnnIndexManager {
        &self.index
    }

    pub fn query_engine(&self) -> &QueryEngine {
        &self.engine
    }

    pub fn options(&self) -> &CollectionOptions {
        &self.options
    }

    /// Starts a batch of writes. The id index is rebuilt from disk.
    pub fn begin_write_session(&self) -> WriteSession<'_> {
        WriteSession::begin(self, IdIndex::build(&self.store))
    }

    /// Hands a session's id index back for reuse by later calls.
    pub(crate) fn store_ids(&self, ids: IdIndex) {
        *self.ids.lock() = Some(ids);
    }

    /// Runs `f` against the cached id index, building it first if needed.
    fn with_ids<T>(&self, f: impl FnOnce(&mut IdIndex) -> T) -> T {
        let mut guard = self.ids.lock();
        let ids = guard.get_or_insert_with(|| IdIndex::build(&self.store));
        f(ids)
    }

    /// Drops the cached id index so the next call sees other processes'
    /// writes.
    pub fn refresh_ids(&self) {
        *self.ids.lock() = None;
    }

    /// Writes records as one session, ending it with the configured
    /// rebuild behaviour.
    pub fn upsert(&self, records: &[VectorRecord]) -> StoreResult<SessionSummary> {
        let mut session = self.begin_write_session();
        for record in records {
            session.upsert(record)?;
        }
        session.end(self.options.defer_rebuild)
    }

    /// Deletes records by id as one session. Returns how many existed.
    pub fn delete(&self, ids: &[&str]) -> StoreResult<usize> {
        let mut session = self.begin_write_session();
        let deleted = session.delete(ids)?;
        session.end(self.options.defer_rebuild)?;
        Ok(deleted)
    }

    /// Deletes every record whose payload `file_path` is `file`.
    pub fn delete_by_file(&self, file: &str) -> StoreResult<usize> {
        let mut session = self.begin_write_session();
        let deleted = session.delete_by_file(file)?;
        session.end(self.options.defer_rebuild)?;
        Ok(deleted)
    }

    /// Reads one record by id.
    pub fn get(&self, id: &str) -> StoreResult<Option<VectorRecord>> {
        let path = self.with_ids(|ids| ids.resolve(id).map(Path::to_path_buf));
        match path {
            Some(path) if path.exists() => self.store.read_at(&path).map(Some),
            // Cached index may predate another process' write
            _ => self.store.read(id),
        }
    }

    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        accuracy: AccuracyLevel,
    ) -> StoreResult<Vec<SearchResult>> {
        self.engine.search(query, k, accuracy, None)
    }

    pub fn search_filtered(
        &self,
        query: &[f32],
        k: usize,
        accuracy: AccuracyLevel,
        filter: &SearchFilter,
    ) -> StoreResult<SearchOutcome> {
        self.engine.search_detailed(query, k, accuracy, Some(filter))
    }

    pub fn search_text(
        &self,
        generator: &dyn EmbeddingGenerator,
        text: &str,
        k: usize,
        accuracy: AccuracyLevel,
    ) -> StoreResult<Vec<SearchResult>> {
        self.engine.search_text(generator, text, k, accuracy, None)
    }

    /// Distinct source files named by record payloads.
    pub fn list_files(&self) -> BTreeSet<String> {
        self.with_ids(|ids| ids.list_files(&self.store))
    }

    pub fn is_stale(&self) -> StoreResult<bool> {
        self.index.is_stale()
    }

    pub fn mark_stale(&self) -> StoreResult<()> {
        self.index.mark_stale()
    }

    /// Rebuilds the ANN index from every record.
    pub fn rebuild(&self) -> StoreResult<AnnIndexState> {
        self.index.rebuild_from_store()
    }

    pub fn health(&self) -> StoreResult<CollectionHealth> {
        let metadata = CollectionMetadata::load(&self.root)?;
        let is_stale = self.index.is_stale()?;
        let index_size = std::fs::metadata(self.root.join(ANN_INDEX_FILE))
            .map(|m| m.len())
            .ok();
        let ann = &metadata.ann_index;

        Ok(CollectionHealth {
            name: self.name.clone(),
            vector_dim: metadata.vector_dim.get(),
            record_count: self.store.count_records(),
            index_present: index_size.is_some(),
            is_stale,
            state: IndexState::from_metadata(ann),
            ann_params: metadata.ann_params,
            corrupt_records: ann.corrupt_records,
            soft_deleted_labels: ann.soft_deleted,
            index_file_size: index_size.unwrap_or(0),
            last_rebuild_timestamp: ann.last_rebuild_timestamp,
            last_marked_stale_timestamp: ann.last_marked_stale_timestamp,
        })
    }
}
