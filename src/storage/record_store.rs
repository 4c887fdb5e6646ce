//! Record files on disk.
//!
//! Every record lives in its own JSON file under the directory its vector
//! encodes to. Writes go through temp-file-then-rename, so readers never need
//! a lock: a file is either absent or complete.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use walkdir::WalkDir;

use crate::error::{ErrorContext, StoreError, StoreResult};
use crate::storage::fsutil::{prune_empty_dirs, remove_if_exists, write_atomic};
use crate::storage::record::{
    MAX_FILENAME_BYTES, VectorRecord, id_from_filename, record_filename,
};
use crate::vector::{VectorDimension, VectorPathEncoder};

/// Outcome of a full scan over a collection's record files.
#[derive(Debug, Default)]
pub struct ScanResult {
    /// Readable records with the file they came from.
    pub records: Vec<(PathBuf, VectorRecord)>,
    /// Files that matched the record naming scheme but failed to load.
    pub corrupt: usize,
}

impl ScanResult {
    /// Total record files seen, readable or not.
    pub fn files_seen(&self) -> usize {
        self.records.len() + self.corrupt
    }
}

/// Reads and writes record files for one collection.
#[derive(Debug, Clone)]
pub struct RecordStore {
    root: PathBuf,
    encoder: Arc<VectorPathEncoder>,
    dimension: VectorDimension,
}

impl RecordStore {
    pub fn new(root: impl Into<PathBuf>, encoder: Arc<VectorPathEncoder>, dimension: VectorDimension) -> Self {
        Self {
            root: root.into(),
            encoder,
            dimension,
        }
    }

    /// Collection root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    pub fn encoder(&self) -> &VectorPathEncoder {
        &self.encoder
    }

    /// Path a record is (or would be) stored at.
    pub fn path_for(&self, record: &VectorRecord) -> StoreResult<PathBuf> {
        let dir = self.encoder.encode(&record.vector)?.join_onto(&self.root);
        Ok(dir.join(record_filename(&record.id)))
    }

    /// Writes a record atomically and returns its path.
    pub fn write(&self, record: &VectorRecord) -> StoreResult<PathBuf> {
        if record.id.is_empty() {
            return Err(StoreError::InvalidParameters {
                reason: "record id must not be empty".to_string(),
            });
        }
        self.dimension.validate_vector(&record.vector)?;

        // Writing would otherwise recreate a collection dropped under us
        if !self.root.is_dir() {
            return Err(StoreError::CollectionNotFound {
                name: self
                    .root
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            });
        }

        let filename = record_filename(&record.id);
        if filename.len() > MAX_FILENAME_BYTES {
            return Err(StoreError::InvalidParameters {
                reason: format!(
                    "record id '{}' escapes to a {}-byte filename, the limit is {MAX_FILENAME_BYTES}",
                    record.id,
                    filename.len()
                ),
            });
        }

        let path = self.path_for(record)?;
        let bytes = serde_json::to_vec(record).map_err(|e| StoreError::Serialization {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        write_atomic(&path, &bytes).write_context(&path)?;
        Ok(path)
    }

    /// Reads the record stored at `path`.
    ///
    /// Malformed content, a wrong vector length, or a filename that does not
    /// match the stored id are all reported as [`StoreError::RecordCorrupt`].
    pub fn read_at(&self, path: &Path) -> StoreResult<VectorRecord> {
        let bytes = std::fs::read(path).read_context(path)?;
        let record: VectorRecord =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::RecordCorrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if record.vector.len() != self.dimension.get() {
            return Err(StoreError::RecordCorrupt {
                path: path.to_path_buf(),
                reason: format!(
                    "vector has {} components, collection uses {}",
                    record.vector.len(),
                    self.dimension
                ),
            });
        }

        let named_id = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(id_from_filename);
        if named_id.as_deref() != Some(record.id.as_str()) {
            return Err(StoreError::RecordCorrupt {
                path: path.to_path_buf(),
                reason: format!("stored id '{}' does not match filename", record.id),
            });
        }

        Ok(record)
    }

    /// Locates a record by id with a filename walk.
    ///
    /// Callers holding an [`IdIndex`](crate::storage::IdIndex) should resolve
    /// through it instead.
    pub fn find(&self, id: &str) -> Option<PathBuf> {
        let wanted = record_filename(id);
        self.enumerate()
            .find(|path| path.file_name().and_then(|n| n.to_str()) == Some(wanted.as_str()))
    }

    /// Reads a record by id. Returns `Ok(None)` when no such record exists.
    pub fn read(&self, id: &str) -> StoreResult<Option<VectorRecord>> {
        match self.find(id) {
            Some(path) => self.read_at(&path).map(Some),
            None => Ok(None),
        }
    }

    /// Deletes every file for the given ids and returns how many were removed.
    ///
    /// Unknown ids are not an error.
    pub fn delete(&self, ids: &[&str]) -> StoreResult<usize> {
        let wanted: HashSet<String> = ids.iter().map(|id| record_filename(id)).collect();
        if wanted.is_empty() {
            return Ok(0);
        }
        let paths: Vec<PathBuf> = self
            .enumerate()
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| wanted.contains(n))
            })
            .collect();
        self.delete_paths(&paths)
    }

    /// Deletes specific record files, pruning directories left empty.
    pub fn delete_paths(&self, paths: &[PathBuf]) -> StoreResult<usize> {
        let mut removed = 0;
        for path in paths {
            if remove_if_exists(path).write_context(path)? {
                removed += 1;
                if let Some(parent) = path.parent() {
                    prune_empty_dirs(parent, &self.root);
                }
            }
        }
        Ok(removed)
    }

    /// Iterates over every record file path under the collection root.
    ///
    /// Only names the filename scheme recognizes are yielded; metadata, the
    /// index binary, lock and in-flight temp files are skipped. Unreadable
    /// directory entries are logged and skipped.
    pub fn enumerate(&self) -> impl Iterator<Item = PathBuf> + '_ {
        WalkDir::new(&self.root)
            .min_depth(1)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    if e.io_error().map(|io| io.kind()) != Some(std::io::ErrorKind::NotFound) {
                        tracing::warn!(error = %e, "skipping unreadable entry");
                    }
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .and_then(id_from_filename)
                    .is_some()
            })
            .map(walkdir::DirEntry::into_path)
    }

    /// Number of record files on disk. Reads names only.
    pub fn count_records(&self) -> usize {
        self.enumerate().count()
    }

    /// Loads every record, counting and logging the ones that fail.
    pub fn scan(&self) -> ScanResult {
        let paths: Vec<PathBuf> = self.enumerate().collect();
        self.scan_paths(paths)
    }

    /// Loads the given record files in parallel.
    pub fn scan_paths(&self, paths: Vec<PathBuf>) -> ScanResult {
        let loaded: Vec<Result<(PathBuf, VectorRecord), StoreError>> = paths
            .into_par_iter()
            .map(|path| self.read_at(&path).map(|record| (path, record)))
            .collect();

        let mut result = ScanResult::default();
        for item in loaded {
            match item {
                Ok(entry) => result.records.push(entry),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping record during scan");
                    result.corrupt += 1;
                }
            }
        }
        // Parallel collection keeps input order, but sort anyway so callers
        // get a stable order independent of directory iteration.
        result.records.sort_by(|a, b| a.1.id.cmp(&b.1.id));
        result
    }
}
