//! Process-local cache of deserialized ANN indexes.
//!
//! Owned explicitly and injected into the components that need it. Entries
//! are keyed by the index file path and carry the file signature they were
//! loaded from; a changed signature, an expired TTL or capacity pressure
//! evicts them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::RwLock;

use crate::error::StoreResult;
use crate::index::AnnIndex;

/// Size and modification time of an index file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileSignature {
    len: u64,
    modified: Option<SystemTime>,
}

impl FileSignature {
    fn of(path: &Path) -> Option<Self> {
        let metadata = std::fs::metadata(path).ok()?;
        Some(Self {
            len: metadata.len(),
            modified: metadata.modified().ok(),
        })
    }
}

#[derive(Debug)]
struct CacheEntry {
    index: Arc<AnnIndex>,
    signature: FileSignature,
    loaded_at: Instant,
}

/// TTL + max-entries cache of [`AnnIndex`] values.
#[derive(Debug)]
pub struct IndexCache {
    entries: RwLock<HashMap<PathBuf, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
}

impl IndexCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Returns the cached index for `path`, loading it when absent or out of
    /// date. `Ok(None)` means there is no index file.
    pub fn get_or_load<F>(&self, path: &Path, load: F) -> StoreResult<Option<Arc<AnnIndex>>>
    where
        F: FnOnce(&Path) -> StoreResult<Option<AnnIndex>>,
    {
        let key = canonical_key(path);
        let Some(signature) = FileSignature::of(path) else {
            self.entries.write().remove(&key);
            return Ok(None);
        };

        {
            let entries = self.entries.read();
            if let Some(entry) = entries.get(&key) {
                if entry.signature == signature && entry.loaded_at.elapsed() < self.ttl {
                    tracing::trace!(path = %path.display(), "index cache hit");
                    return Ok(Some(Arc::clone(&entry.index)));
                }
            }
        }

        let Some(index) = load(path)? else {
            self.entries.write().remove(&key);
            return Ok(None);
        };
        let index = Arc::new(index);

        let mut entries = self.entries.write();
        entries.retain(|_, entry| entry.loaded_at.elapsed() < self.ttl);
        while entries.len() >= self.max_entries {
            let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.loaded_at)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            entries.remove(&oldest);
        }
        entries.insert(
            key,
            CacheEntry {
                index: Arc::clone(&index),
                signature,
                loaded_at: Instant::now(),
            },
        );
        Ok(Some(index))
    }

    /// Stores an index the caller just persisted to `path`.
    pub fn insert(&self, path: &Path, index: Arc<AnnIndex>) {
        let Some(signature) = FileSignature::of(path) else {
            return;
        };
        let key = canonical_key(path);
        let mut entries = self.entries.write();
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.loaded_at)
                .map(|(key, _)| key.clone())
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(
            key,
            CacheEntry {
                index,
                signature,
                loaded_at: Instant::now(),
            },
        );
    }

    /// Drops the entry for `path`.
    pub fn invalidate(&self, path: &Path) {
        self.entries.write().remove(&canonical_key(path));
    }

    /// Drops every entry under `root`.
    pub fn invalidate_prefix(&self, root: &Path) {
        let root = canonical_key(root);
        self.entries.write().retain(|key, _| !key.starts_with(&root));
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for IndexCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(300), 16)
    }
}

fn canonical_key(path: &Path) -> PathBuf {
    match (path.parent(), path.file_name()) {
        (Some(dir), Some(name)) => dir
            .canonicalize()
            .map(|dir| dir.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}
