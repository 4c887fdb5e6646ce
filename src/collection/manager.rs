//! Collection lifecycle under a data directory.
//!
//! Each collection lives in `<data_dir>/<name>/` and is identified on disk by
//! its metadata document. The metadata is written last when a collection is
//! created, so a half-created directory is never reported as a collection.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::IndexCache;
use crate::collection::store::{Collection, PROJECTION_FILE};
use crate::collection::{CollectionOptions, CollectionParams};
use crate::config::Settings;
use crate::error::{ErrorContext, StoreError, StoreResult};
use crate::index::{ANN_INDEX_FILE, StalenessCoordinator};
use crate::storage::fsutil::remove_if_exists;
use crate::storage::{
    AnnIndexState, CollectionMetadata, METADATA_FILE, METADATA_VERSION, now_millis,
};
use crate::vector::{ProjectionMatrix, VectorPathEncoder};

/// Creates, opens and removes collections.
#[derive(Debug, Clone)]
pub struct CollectionManager {
    data_dir: PathBuf,
    cache: Arc<IndexCache>,
    options: CollectionOptions,
}

impl CollectionManager {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        cache: Arc<IndexCache>,
        options: CollectionOptions,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            cache,
            options,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let cache = IndexCache::new(settings.cache_ttl(), settings.cache.max_entries);
        Self::new(
            settings.resolved_data_dir(),
            Arc::new(cache),
            CollectionOptions::from_settings(settings),
        )
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn cache(&self) -> &Arc<IndexCache> {
        &self.cache
    }

    fn root_of(&self, name: &str) -> StoreResult<PathBuf> {
        validate_name(name)?;
        Ok(self.data_dir.join(name))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.root_of(name)
            .map(|root| CollectionMetadata::path(&root).is_file())
            .unwrap_or(false)
    }

    /// Creates an empty collection.
    pub fn create(&self, name: &str, params: &CollectionParams) -> StoreResult<Collection> {
        params.validate()?;
        let root = self.root_of(name)?;
        if CollectionMetadata::path(&root).exists() {
            return Err(StoreError::CollectionExists {
                name: name.to_string(),
            });
        }
        std::fs::create_dir_all(&root).write_context(&root)?;

        let matrix = ProjectionMatrix::generate(params.vector_dim, params.reduced_dim, params.seed);
        matrix.save(&root.join(PROJECTION_FILE))?;

        let metadata = CollectionMetadata {
            version: METADATA_VERSION,
            name: name.to_string(),
            vector_dim: params.vector_dim,
            reduced_dim: params.reduced_dim,
            quantization_bits: params.quantization_bits,
            depth_factor: params.depth_factor,
            max_depth: params.max_depth,
            seed: params.seed,
            created_at: now_millis(),
            ann_params: params.ann,
            ann_index: AnnIndexState::default(),
        };
        // Reject bad encoder parameters before the collection becomes visible
        VectorPathEncoder::new(Arc::new(matrix), metadata.encoder_params())?;
        metadata.save(&root)?;

        tracing::info!(
            collection = name,
            vector_dim = %params.vector_dim,
            reduced_dim = params.reduced_dim,
            "created collection"
        );
        self.open(name)
    }

    /// Opens an existing collection.
    pub fn open(&self, name: &str) -> StoreResult<Collection> {
        let root = self.root_of(name)?;
        if !CollectionMetadata::path(&root).is_file() {
            return Err(StoreError::CollectionNotFound {
                name: name.to_string(),
            });
        }
        Collection::open(name, root, Arc::clone(&self.cache), self.options.clone())
    }

    /// Removes a collection and everything in it.
    pub fn delete(&self, name: &str) -> StoreResult<()> {
        let root = self.root_of(name)?;
        if !root.exists() {
            return Err(StoreError::CollectionNotFound {
                name: name.to_string(),
            });
        }
        self.cache.invalidate_prefix(&root);
        std::fs::remove_dir_all(&root).write_context(&root)?;
        tracing::info!(collection = name, "deleted collection");
        Ok(())
    }

    /// Removes every record and the index but keeps the collection and its
    /// parameters. Returns how many records were removed.
    pub fn clear(&self, name: &str) -> StoreResult<usize> {
        let collection = self.open(name)?;
        let root = collection.root().to_path_buf();
        let store = collection.record_store();

        let coordinator = StalenessCoordinator::new(&root, self.options.lock_timeout);
        let _lock = coordinator.lock()?;

        let paths: Vec<PathBuf> = store.enumerate().collect();
        let removed = store.delete_paths(&paths)?;

        let index_path = root.join(ANN_INDEX_FILE);
        self.cache.invalidate(&index_path);
        remove_if_exists(&index_path).write_context(&index_path)?;

        let mut metadata = CollectionMetadata::load(&root)?;
        metadata.ann_index = AnnIndexState::default();
        metadata.save(&root)?;

        tracing::info!(collection = name, removed, "cleared collection");
        Ok(removed)
    }

    /// Names of every collection, sorted.
    pub fn list(&self) -> StoreResult<Vec<String>> {
        let entries = match std::fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::FileRead {
                    path: self.data_dir.clone(),
                    source,
                });
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().join(METADATA_FILE).is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        Ok(names)
    }
}

/// Collection names become directory names.
fn validate_name(name: &str) -> StoreResult<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidParameters {
            reason: format!(
                "invalid collection name '{name}': use ASCII letters, digits, '.', '_' or '-', not starting with '.'"
            ),
        })
    }
}
