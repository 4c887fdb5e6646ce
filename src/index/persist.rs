//! The ANN index as stored on disk: an HNSW graph plus its label table.
//!
//! # Storage Format
//!
//! - Header (16 bytes): magic `SDAN`, u32 format version, u64 payload length
//! - Payload: bincode (standard config) encoding of [`AnnSnapshot`]
//!
//! Anything that does not decode cleanly is reported as
//! [`StoreError::IndexCorrupt`]; the index is derived data and callers
//! rebuild it from records instead of failing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bincode::{Decode, Encode};

use crate::error::{ErrorContext, StoreError, StoreResult};
use crate::storage::fsutil::write_atomic;
use crate::vector::{HnswGraph, HnswParams, dot, normalized};

/// File name of the index binary inside a collection root.
pub const ANN_INDEX_FILE: &str = "ann_index.bin";

/// Magic bytes to identify ANN index files.
const MAGIC_BYTES: &[u8; 4] = b"SDAN";

/// Current index file format version.
const FORMAT_VERSION: u32 = 1;

/// Size of the file header in bytes.
const HEADER_SIZE: usize = 16;

/// What a live label points at.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
struct LabelEntry {
    id: String,
    /// Record file relative to the collection root, `/`-separated.
    path: String,
}

/// Serialized form of [`AnnIndex`].
#[derive(Encode, Decode)]
struct AnnSnapshot {
    graph: HnswGraph,
    /// `labels[label]` is the record behind a label, `None` once soft-deleted.
    labels: Vec<Option<LabelEntry>>,
}

/// One scored hit from the index.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnHit {
    pub id: String,
    /// Record file relative to the collection root.
    pub path: PathBuf,
    pub label: u32,
    /// Exact cosine similarity to the query.
    pub similarity: f32,
}

/// HNSW graph with the id ↔ label mapping.
#[derive(Debug, Clone)]
pub struct AnnIndex {
    graph: HnswGraph,
    labels: Vec<Option<LabelEntry>>,
    by_id: HashMap<String, u32>,
}

impl AnnIndex {
    pub fn new(params: HnswParams, seed: u64) -> Self {
        Self {
            graph: HnswGraph::new(params, seed),
            labels: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    /// Live (searchable) entries.
    pub fn live_count(&self) -> usize {
        self.by_id.len()
    }

    /// Soft-deleted labels still allocated in the graph.
    pub fn soft_deleted(&self) -> usize {
        self.graph.deleted_count()
    }

    /// Total allocated labels.
    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn label_of(&self, id: &str) -> Option<u32> {
        self.by_id.get(id).copied()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.by_id.keys().map(String::as_str)
    }

    /// Adds a vector under `id`, soft-deleting any previous label for it.
    ///
    /// `path` is the record file relative to the collection root.
    pub fn insert(&mut self, id: &str, path: &Path, vector: &[f32]) -> u32 {
        self.remove(id);
        let label = self.graph.insert(vector);
        debug_assert_eq!(label as usize, self.labels.len());
        let path = path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        self.labels.push(Some(LabelEntry {
            id: id.to_string(),
            path,
        }));
        self.by_id.insert(id.to_string(), label);
        label
    }

    /// Soft-deletes `id`. Returns whether it was live.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(label) = self.by_id.remove(id) else {
            return false;
        };
        self.graph.mark_deleted(label);
        if let Some(slot) = self.labels.get_mut(label as usize) {
            *slot = None;
        }
        true
    }

    /// Up to `k` live hits nearest to `query`, best first.
    ///
    /// `ef` is the search beam width. Similarities are recomputed exactly
    /// against the stored unit vectors.
    pub fn search(&self, query: &[f32], k: usize, ef: usize) -> Vec<AnnHit> {
        let unit_query = normalized(query);
        let mut hits: Vec<AnnHit> = self
            .graph
            .search(query, k, ef)
            .into_iter()
            .filter_map(|neighbor| {
                let entry = self.labels.get(neighbor.label as usize)?.as_ref()?;
                let stored = self.graph.vector(neighbor.label)?;
                Some(AnnHit {
                    id: entry.id.clone(),
                    path: PathBuf::from(&entry.path),
                    label: neighbor.label,
                    similarity: dot(&unit_query, stored),
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits
    }

    /// Writes the index atomically and returns the file size in bytes.
    pub fn save(&self, path: &Path) -> StoreResult<u64> {
        let snapshot = AnnSnapshot {
            graph: self.graph.clone(),
            labels: self.labels.clone(),
        };
        let payload = bincode::encode_to_vec(&snapshot, bincode::config::standard()).map_err(
            |e| StoreError::Serialization {
                path: path.to_path_buf(),
                reason: e.to_string(),
            },
        )?;

        let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
        bytes.extend_from_slice(MAGIC_BYTES);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&payload);

        write_atomic(path, &bytes).write_context(path)?;
        Ok(bytes.len() as u64)
    }

    /// Loads an index written by [`AnnIndex::save`].
    ///
    /// Returns `Ok(None)` when no index file exists.
    pub fn load(path: &Path) -> StoreResult<Option<Self>> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::FileRead {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Self::decode(path, &bytes).map(Some)
    }

    fn decode(path: &Path, bytes: &[u8]) -> StoreResult<Self> {
        let corrupt = |reason: String| StoreError::IndexCorrupt {
            path: path.to_path_buf(),
            reason,
        };

        if bytes.len() < HEADER_SIZE {
            return Err(corrupt(format!("file is {} bytes, shorter than header", bytes.len())));
        }
        if &bytes[0..4] != MAGIC_BYTES {
            return Err(corrupt("invalid magic bytes".to_string()));
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != FORMAT_VERSION {
            return Err(corrupt(format!(
                "format version {version}, expected {FORMAT_VERSION}"
            )));
        }
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&bytes[8..16]);
        let payload_len = u64::from_le_bytes(len_bytes) as usize;
        let payload = &bytes[HEADER_SIZE..];
        if payload.len() != payload_len {
            return Err(corrupt(format!(
                "payload is {} bytes, header says {payload_len}",
                payload.len()
            )));
        }

        let (snapshot, read): (AnnSnapshot, usize) =
            bincode::decode_from_slice(payload, bincode::config::standard())
                .map_err(|e| corrupt(e.to_string()))?;
        if read != payload_len {
            return Err(corrupt("trailing bytes after snapshot".to_string()));
        }
        if snapshot.labels.len() != snapshot.graph.len() {
            return Err(corrupt(format!(
                "{} labels for {} graph nodes",
                snapshot.labels.len(),
                snapshot.graph.len()
            )));
        }

        let mut by_id = HashMap::with_capacity(snapshot.labels.len());
        for (label, entry) in snapshot.labels.iter().enumerate() {
            let Some(LabelEntry { id, .. }) = entry else {
                continue;
            };
            if snapshot.graph.is_deleted(label as u32) {
                return Err(corrupt(format!("label {label} is live but tombstoned")));
            }
            if by_id.insert(id.clone(), label as u32).is_some() {
                return Err(corrupt(format!("id '{id}' has more than one live label")));
            }
        }

        Ok(Self {
            graph: snapshot.graph,
            labels: snapshot.labels,
            by_id,
        })
    }
}
