//! Per-collection metadata document (`collection_meta.json`).
//!
//! Holds the parameters a collection was created with and the build state of
//! its ANN index. Every mutation happens under the collection lock; reads for
//! decision making do not need it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ErrorContext, StoreError, StoreResult};
use crate::storage::fsutil::write_atomic;
use crate::vector::{EncoderParams, HnswParams, QuantizationBits, VectorDimension};

/// File name of the metadata document inside a collection root.
pub const METADATA_FILE: &str = "collection_meta.json";

/// Version of the metadata format.
pub const METADATA_VERSION: u32 = 1;

/// Distance used by the ANN index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceSpace {
    #[default]
    Cosine,
}

/// ANN build parameters recorded at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnnParams {
    #[serde(rename = "M")]
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    #[serde(default)]
    pub space: DistanceSpace,
}

impl AnnParams {
    pub fn hnsw(&self) -> HnswParams {
        HnswParams {
            m: self.m,
            ef_construction: self.ef_construction,
        }
    }
}

impl Default for AnnParams {
    fn default() -> Self {
        let hnsw = HnswParams::default();
        Self {
            m: hnsw.m,
            ef_construction: hnsw.ef_construction,
            ef_search: 64,
            space: DistanceSpace::Cosine,
        }
    }
}

/// Build state of the persisted ANN index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnIndexState {
    /// Bumped on every successful persist.
    pub version: u64,
    /// Record files covered by the index, corrupt ones included.
    pub vector_count: usize,
    #[serde(default)]
    pub live_labels: usize,
    #[serde(default)]
    pub soft_deleted: usize,
    #[serde(default)]
    pub corrupt_records: usize,
    pub is_stale: bool,
    /// Set while a rebuild holds the lock; millis since epoch.
    #[serde(default)]
    pub rebuilding_since: Option<i64>,
    pub last_rebuild_timestamp: Option<i64>,
    pub last_marked_stale_timestamp: Option<i64>,
    pub file_size_bytes: u64,
}

/// Everything persisted about a collection besides its records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionMetadata {
    pub version: u32,
    pub name: String,
    pub vector_dim: VectorDimension,
    pub reduced_dim: usize,
    pub quantization_bits: QuantizationBits,
    pub depth_factor: usize,
    pub max_depth: usize,
    pub seed: u64,
    pub created_at: i64,
    pub ann_params: AnnParams,
    pub ann_index: AnnIndexState,
}

impl CollectionMetadata {
    /// Path of the metadata document under `root`.
    pub fn path(root: &Path) -> PathBuf {
        root.join(METADATA_FILE)
    }

    /// Encoder parameters this collection was created with.
    pub fn encoder_params(&self) -> EncoderParams {
        EncoderParams {
            quantization_bits: self.quantization_bits,
            depth_factor: self.depth_factor,
            max_depth: self.max_depth,
        }
    }

    /// Save metadata atomically
    pub fn save(&self, root: &Path) -> StoreResult<()> {
        let path = Self::path(root);
        let json = serde_json::to_vec_pretty(self).map_err(|e| StoreError::Serialization {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        write_atomic(&path, &json).write_context(&path)
    }

    /// Load metadata from a collection root
    pub fn load(root: &Path) -> StoreResult<Self> {
        let path = Self::path(root);
        let bytes = std::fs::read(&path).read_context(&path)?;
        let metadata: Self =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        if metadata.version != METADATA_VERSION {
            return Err(StoreError::Serialization {
                path,
                reason: format!(
                    "unsupported metadata version {} (expected {METADATA_VERSION})",
                    metadata.version
                ),
            });
        }
        Ok(metadata)
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
