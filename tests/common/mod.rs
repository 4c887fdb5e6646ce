#![allow(dead_code)]

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use semdex::{
    Collection, CollectionManager, CollectionOptions, CollectionParams, IndexCache,
    VectorDimension, VectorRecord,
};
use tempfile::TempDir;

pub const DIM: usize = 16;

/// A collection in its own temp data directory.
pub struct TestCollection {
    pub dir: TempDir,
    pub manager: CollectionManager,
    pub collection: Collection,
}

impl TestCollection {
    pub fn new() -> Self {
        Self::with_options(CollectionOptions::default())
    }

    pub fn with_options(options: CollectionOptions) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let manager = CollectionManager::new(
            dir.path().join("collections"),
            Arc::new(IndexCache::default()),
            options,
        );
        let collection = manager
            .create("code", &small_params(DIM))
            .expect("Failed to create collection");
        Self {
            dir,
            manager,
            collection,
        }
    }

    /// A second handle on the same directory, as another process would have.
    pub fn reopen(&self) -> Collection {
        self.manager.open("code").expect("Failed to open collection")
    }
}

/// Parameters small enough for tests; `ef_search` exceeds the corpus sizes
/// used here so ANN results equal exact ones.
pub fn small_params(dim: usize) -> CollectionParams {
    let mut params = CollectionParams::new(VectorDimension::new(dim).unwrap());
    params.reduced_dim = 6;
    params.max_depth = 4;
    params.ann.m = 8;
    params.ann.ef_construction = 64;
    params.ann.ef_search = 512;
    params
}

/// Deterministic vectors in [-1, 1).
pub struct VectorGen {
    rng: StdRng,
    dim: usize,
}

impl VectorGen {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            dim: DIM,
        }
    }

    pub fn vector(&mut self) -> Vec<f32> {
        (0..self.dim)
            .map(|_| self.rng.random_range(-1.0f32..1.0))
            .collect()
    }

    pub fn records(&mut self, prefix: &str, count: usize) -> Vec<VectorRecord> {
        (0..count)
            .map(|i| {
                VectorRecord::new(format!("{prefix}{i}"), self.vector())
                    .with_payload("file_path", format!("src/{prefix}{}.rs", i % 10))
                    .with_payload("line_start", i as i64)
            })
            .collect()
    }
}

/// Exact top-k ids by cosine similarity.
pub fn brute_force(records: &[VectorRecord], query: &[f32], k: usize) -> Vec<String> {
    let mut scored: Vec<(f32, &str)> = records
        .iter()
        .map(|r| (semdex::vector::cosine_similarity(query, &r.vector), r.id.as_str()))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    scored.into_iter().take(k).map(|(_, id)| id.to_string()).collect()
}
