//! In-memory id → record file map.
//!
//! Built from filenames alone, so construction cost depends on the number of
//! files and not on vector dimension. Never persisted; each process builds
//! its own copy when it first needs one.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::storage::record::VectorRecord;
use crate::storage::record_store::RecordStore;

#[derive(Debug, Default, Clone)]
pub struct IdIndex {
    entries: HashMap<String, PathBuf>,
    /// Lazily built `id -> payload.file_path`. Requires opening record files.
    source_files: Option<HashMap<String, String>>,
}

impl IdIndex {
    /// Builds the index by walking filenames under the store root.
    ///
    /// A missing collection directory yields an empty index.
    pub fn build(store: &RecordStore) -> Self {
        let mut entries = HashMap::new();
        for path in store.enumerate() {
            let Some(id) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(crate::storage::record::id_from_filename)
            else {
                continue;
            };
            if let Some(previous) = entries.insert(id.clone(), path) {
                tracing::warn!(
                    id = %id,
                    previous = %previous.display(),
                    "duplicate record file for id"
                );
            }
        }
        tracing::debug!(records = entries.len(), root = %store.root().display(), "built id index");
        Self {
            entries,
            source_files: None,
        }
    }

    pub fn resolve(&self, id: &str) -> Option<&Path> {
        self.entries.get(id).map(PathBuf::as_path)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn all_ids(&self) -> HashSet<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records a freshly written record.
    pub fn insert(&mut self, record: &VectorRecord, path: PathBuf) -> Option<PathBuf> {
        if let Some(sources) = self.source_files.as_mut() {
            match record.source_file() {
                Some(file) => {
                    sources.insert(record.id.clone(), file.to_string());
                }
                None => {
                    sources.remove(&record.id);
                }
            }
        }
        self.entries.insert(record.id.clone(), path)
    }

    pub fn remove(&mut self, id: &str) -> Option<PathBuf> {
        if let Some(sources) = self.source_files.as_mut() {
            sources.remove(id);
        }
        self.entries.remove(id)
    }

    /// The `id -> payload.file_path` projection, built on first call.
    ///
    /// Unreadable records are logged and left out.
    pub fn source_files(&mut self, store: &RecordStore) -> &HashMap<String, String> {
        self.source_files.get_or_insert_with(|| {
            let mut sources = HashMap::with_capacity(self.entries.len());
            for (id, path) in &self.entries {
                match store.read_at(path) {
                    Ok(record) => {
                        if let Some(file) = record.source_file() {
                            sources.insert(id.clone(), file.to_string());
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "skipping record in source file projection"),
                }
            }
            sources
        })
    }

    /// Distinct source files referenced by record payloads.
    pub fn list_files(&mut self, store: &RecordStore) -> BTreeSet<String> {
        self.source_files(store).values().cloned().collect()
    }

    /// Ids of every record whose payload names `file`.
    pub fn ids_for_file(&mut self, store: &RecordStore, file: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .source_files(store)
            .iter()
            .filter(|(_, source)| source.as_str() == file)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}
