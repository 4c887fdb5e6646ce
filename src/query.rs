//! Similarity search over one collection.
//!
//! The ANN index is the fast path. Whenever it cannot be trusted or loaded
//! the engine scans records directly, starting from the query's own
//! quantization bucket, so a search degrades in latency rather than failing.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingGenerator;
use crate::error::{StoreError, StoreResult};
use crate::index::{AnnIndex, AnnIndexManager};
use crate::storage::{Payload, PayloadValue, RecordStore, VectorRecord, id_from_filename};
use crate::vector::{Score, cosine_similarity, normalized};

/// Upper bound on buckets visited by a neighbourhood scan.
pub const DEFAULT_MAX_BUCKETS: usize = 1024;

/// Recall/latency trade-off for a search.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum AccuracyLevel {
    Fast,
    #[default]
    Balanced,
    High,
    /// Scan every record when the index is unavailable.
    Exhaustive,
}

impl AccuracyLevel {
    /// Rings of neighbouring buckets visited by the fallback scan.
    /// `None` means a full scan.
    pub fn ring_radius(self) -> Option<usize> {
        match self {
            Self::Fast => Some(0),
            Self::Balanced => Some(1),
            Self::High => Some(2),
            Self::Exhaustive => None,
        }
    }

    /// Multiple of `k` requested from the ANN index.
    pub fn overfetch(self) -> usize {
        match self {
            Self::Fast => 2,
            Self::Balanced => 4,
            Self::High => 8,
            Self::Exhaustive => 16,
        }
    }
}

impl fmt::Display for AccuracyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fast => "fast",
            Self::Balanced => "balanced",
            Self::High => "high",
            Self::Exhaustive => "exhaustive",
        })
    }
}

/// Exact-match payload conditions. All must hold.
///
/// A `TextList` payload value matches a `Text` condition it contains, so
/// `branches = "main"` selects records visible on `main`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilter {
    conditions: BTreeMap<String, PayloadValue>,
}

impl SearchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PayloadValue>) -> Self {
        self.conditions.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, payload: &Payload) -> bool {
        self.conditions.iter().all(|(key, expected)| {
            payload
                .get(key)
                .is_some_and(|actual| actual.matches(expected))
        })
    }
}

/// One ranked result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub score: Score,
    pub payload: Payload,
    pub path: PathBuf,
}

/// Which path produced a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    Ann,
    NeighborhoodScan,
    FullScan,
}

/// Results plus how they were obtained.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub strategy: SearchStrategy,
    /// Whether this search rebuilt a stale index first.
    pub rebuilt: bool,
}

/// Runs searches against one collection.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    store: RecordStore,
    index: AnnIndexManager,
    ef_search: usize,
    max_buckets: usize,
}

impl QueryEngine {
    pub fn new(store: RecordStore, index: AnnIndexManager, ef_search: usize) -> Self {
        Self {
            store,
            index,
            ef_search,
            max_buckets: DEFAULT_MAX_BUCKETS,
        }
    }

    #[must_use]
    pub fn with_max_buckets(mut self, max_buckets: usize) -> Self {
        self.max_buckets = max_buckets.max(1);
        self
    }

    /// Top-`k` records most similar to `query`, best first.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        accuracy: AccuracyLevel,
        filter: Option<&SearchFilter>,
    ) -> StoreResult<Vec<SearchResult>> {
        self.search_detailed(query, k, accuracy, filter)
            .map(|outcome| outcome.results)
    }

    /// Embeds `text` with `generator` and searches with the result.
    pub fn search_text(
        &self,
        generator: &dyn EmbeddingGenerator,
        text: &str,
        k: usize,
        accuracy: AccuracyLevel,
        filter: Option<&SearchFilter>,
    ) -> StoreResult<Vec<SearchResult>> {
        let query = generator.embed(text)?;
        self.search(&query, k, accuracy, filter)
    }

    /// Like [`QueryEngine::search`], also reporting the strategy used.
    ///
    /// Only an invalid query vector is an error. A stale or corrupt index is
    /// rebuilt first; if that fails, or the index is missing, records are
    /// scanned instead.
    pub fn search_detailed(
        &self,
        query: &[f32],
        k: usize,
        accuracy: AccuracyLevel,
        filter: Option<&SearchFilter>,
    ) -> StoreResult<SearchOutcome> {
        self.store.dimension().validate_vector(query)?;
        let filter = filter.filter(|f| !f.is_empty());

        if k == 0 {
            return Ok(SearchOutcome {
                results: Vec::new(),
                strategy: SearchStrategy::Ann,
                rebuilt: false,
            });
        }

        let rebuilt = match self.index.rebuild_if_stale() {
            Ok(rebuilt) => rebuilt,
            Err(e) => {
                tracing::warn!(error = %e, "index rebuild failed, scanning records");
                return self.fallback(query, k, accuracy, filter, false);
            }
        };

        let (loaded, rebuilt) = match self.index.load() {
            Err(StoreError::IndexCorrupt { path, reason }) => {
                tracing::warn!(path = %path.display(), %reason, "index corrupt, rebuilding from records");
                match self.index.rebuild_from_store().and_then(|_| self.index.load()) {
                    Ok(index) => (Ok(index), true),
                    Err(e) => (Err(e), rebuilt),
                }
            }
            other => (other, rebuilt),
        };

        match loaded {
            Ok(Some(index)) => {
                let results = self.ann_search(&index, query, k, accuracy, filter);
                Ok(SearchOutcome {
                    results,
                    strategy: SearchStrategy::Ann,
                    rebuilt,
                })
            }
            Ok(None) => self.fallback(query, k, accuracy, filter, rebuilt),
            Err(e) => {
                tracing::warn!(error = %e, "index unavailable, scanning records");
                self.fallback(query, k, accuracy, filter, rebuilt)
            }
        }
    }

    /// Over-fetches from the index, drops candidates whose record is gone or
    /// filtered out, and widens the fetch until `k` survive or the index is
    /// exhausted.
    fn ann_search(
        &self,
        index: &AnnIndex,
        query: &[f32],
        k: usize,
        accuracy: AccuracyLevel,
        filter: Option<&SearchFilter>,
    ) -> Vec<SearchResult> {
        let live = index.live_count();
        let mut fetch = k.saturating_mul(accuracy.overfetch()).min(live.max(1));

        loop {
            let ef = self.ef_search.max(fetch);
            let mut results = Vec::with_capacity(k);
            for hit in index.search(query, fetch, ef) {
                let path = self.store.root().join(&hit.path);
                let record = match self.store.read_at(&path) {
                    Ok(record) if record.id == hit.id => record,
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::debug!(id = %hit.id, error = %e, "skipping index hit");
                        continue;
                    }
                };
                if filter.is_some_and(|f| !f.matches(&record.payload)) {
                    continue;
                }
                results.push(SearchResult {
                    id: record.id,
                    score: Score::saturating(hit.similarity),
                    payload: record.payload,
                    path,
                });
                if results.len() == k {
                    break;
                }
            }

            if results.len() >= k || fetch >= live {
                return results;
            }
            fetch = fetch.saturating_mul(2).min(live);
        }
    }

    fn fallback(
        &self,
        query: &[f32],
        k: usize,
        accuracy: AccuracyLevel,
        filter: Option<&SearchFilter>,
        rebuilt: bool,
    ) -> StoreResult<SearchOutcome> {
        if let Some(radius) = accuracy.ring_radius() {
            let results = self.neighborhood_scan(query, k, radius, filter)?;
            if results.len() >= k {
                return Ok(SearchOutcome {
                    results,
                    strategy: SearchStrategy::NeighborhoodScan,
                    rebuilt,
                });
            }
            tracing::debug!(
                found = results.len(),
                k,
                "neighbourhood too sparse, scanning every record"
            );
        }
        Ok(SearchOutcome {
            results: self.full_scan(query, k, filter),
            strategy: SearchStrategy::FullScan,
            rebuilt,
        })
    }

    /// Scores records in the query's bucket and `radius` rings around it.
    fn neighborhood_scan(
        &self,
        query: &[f32],
        k: usize,
        radius: usize,
        filter: Option<&SearchFilter>,
    ) -> StoreResult<Vec<SearchResult>> {
        let buckets = self
            .store
            .encoder()
            .neighborhood(query, radius, self.max_buckets)
            .map_err(StoreError::from)?;
        let unit_query = normalized(query);

        let mut results = Vec::new();
        for bucket in &buckets {
            let dir = bucket.join_onto(self.store.root());
            let before = results.len();
            for path in record_files_in(&dir) {
                match self.store.read_at(&path) {
                    Ok(record) => {
                        if let Some(result) = score_record(&unit_query, record, path, filter) {
                            results.push(result);
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "skipping record during scan"),
                }
            }
            tracing::debug!(bucket = %bucket, matched = results.len() - before, "scanned bucket");
        }
        Ok(rank(results, k))
    }

    fn full_scan(&self, query: &[f32], k: usize, filter: Option<&SearchFilter>) -> Vec<SearchResult> {
        let unit_query = normalized(query);
        let scan = self.store.scan();
        let results = scan
            .records
            .into_iter()
            .filter_map(|(path, record)| score_record(&unit_query, record, path, filter))
            .collect();
        rank(results, k)
    }
}

fn score_record(
    unit_query: &[f32],
    record: VectorRecord,
    path: PathBuf,
    filter: Option<&SearchFilter>,
) -> Option<SearchResult> {
    if filter.is_some_and(|f| !f.matches(&record.payload)) {
        return None;
    }
    let similarity = cosine_similarity(unit_query, &record.vector);
    Some(SearchResult {
        id: record.id,
        score: Score::saturating(similarity),
        payload: record.payload,
        path,
    })
}

/// Sorts by descending score, ties by id, and keeps the first `k`.
fn rank(mut results: Vec<SearchResult>, k: usize) -> Vec<SearchResult> {
    results.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    results.truncate(k);
    results
}

/// Record files directly inside a bucket directory. Missing directories are
/// simply empty.
fn record_files_in(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .and_then(id_from_filename)
                .is_some()
        })
        .map(|entry| entry.path())
        .collect()
}
