//! Named collections: lifecycle management, the per-collection handle and
//! batched write sessions.

mod manager;
mod session;
mod store;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::error::{StoreError, StoreResult};
use crate::index::DEFAULT_REBUILD_THRESHOLD;
use crate::query::DEFAULT_MAX_BUCKETS;
use crate::storage::AnnParams;
use crate::vector::{QuantizationBits, VectorDimension};

pub use manager::CollectionManager;
pub use session::{SessionSummary, WriteSession};
pub use store::{Collection, CollectionHealth};

/// Parameters fixed when a collection is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionParams {
    pub vector_dim: VectorDimension,
    pub reduced_dim: usize,
    pub quantization_bits: QuantizationBits,
    pub depth_factor: usize,
    pub max_depth: usize,
    pub seed: u64,
    pub ann: AnnParams,
}

impl CollectionParams {
    /// Defaults for the given embedding dimension.
    pub fn new(vector_dim: VectorDimension) -> Self {
        Self {
            vector_dim,
            reduced_dim: 8,
            quantization_bits: QuantizationBits::Two,
            depth_factor: 2,
            max_depth: 8,
            seed: 0x5eed_cafe,
            ann: AnnParams::default(),
        }
    }

    pub fn validate(&self) -> StoreResult<()> {
        let invalid = |reason: &str| {
            Err(StoreError::InvalidParameters {
                reason: reason.to_string(),
            })
        };
        if self.reduced_dim == 0 {
            return invalid("reduced_dim must be positive");
        }
        if self.depth_factor == 0 || self.max_depth == 0 {
            return invalid("depth_factor and max_depth must be positive");
        }
        if self.ann.m < 2 {
            return invalid("ANN parameter M must be at least 2");
        }
        if self.ann.ef_construction == 0 || self.ann.ef_search == 0 {
            return invalid("ef_construction and ef_search must be positive");
        }
        Ok(())
    }
}

/// Runtime behaviour shared by every collection a manager opens.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionOptions {
    /// `None` blocks on the collection lock indefinitely.
    pub lock_timeout: Option<Duration>,
    pub rebuild_threshold: f64,
    /// Default for [`Collection::upsert`] and [`Collection::delete`].
    pub defer_rebuild: bool,
    pub max_buckets: usize,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            lock_timeout: None,
            rebuild_threshold: DEFAULT_REBUILD_THRESHOLD,
            defer_rebuild: false,
            max_buckets: DEFAULT_MAX_BUCKETS,
        }
    }
}

impl CollectionOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            lock_timeout: settings.lock_timeout(),
            rebuild_threshold: settings.staleness.rebuild_threshold,
            defer_rebuild: settings.staleness.defer_rebuild,
            max_buckets: DEFAULT_MAX_BUCKETS,
        }
    }
}
