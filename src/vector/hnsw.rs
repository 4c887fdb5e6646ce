//! Hierarchical Navigable Small World graph over cosine distance.
//!
//! Implements the algorithm from Malkov & Yashunin (2018):
//! - Level of a node drawn from `floor(-ln(u) / ln(M))`
//! - Greedy descent through upper layers, beam search at the insertion layers
//! - Neighbour selection heuristic with pruned-connection back-fill
//!
//! Nodes are addressed by dense `u32` labels. Deleting a node only flips a
//! tombstone: the node keeps routing searches but is never returned. Labels
//! are reclaimed when the graph is rebuilt from scratch.
//!
//! Levels are derived from a hash of `(seed, label)` instead of a stored RNG,
//! so a persisted graph continues to grow deterministically after reload.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::vector::similarity::{dot, normalized};

/// Construction parameters for the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct HnswParams {
    /// Maximum neighbours per node on layers above 0 (layer 0 allows `2 * m`).
    pub m: usize,
    /// Beam width while inserting.
    pub ef_construction: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
        }
    }
}

/// A search hit: node label and cosine distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub label: u32,
    pub distance: f32,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    distance: f32,
    label: u32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.label.cmp(&other.label))
    }
}

/// The full HNSW graph, including the (normalized) vectors it indexes.
#[derive(Debug, Clone, Encode, Decode)]
pub struct HnswGraph {
    params: HnswParams,
    seed: u64,
    /// Unit-length vectors, indexed by label.
    vectors: Vec<Vec<f32>>,
    /// `links[label][layer]` is the neighbour list of a node on a layer.
    links: Vec<Vec<Vec<u32>>>,
    deleted: Vec<bool>,
    deleted_count: usize,
    entry_point: Option<u32>,
    max_layer: usize,
}

impl HnswGraph {
    /// Creates an empty graph.
    pub fn new(params: HnswParams, seed: u64) -> Self {
        let params = HnswParams {
            m: params.m.max(2),
            ef_construction: params.ef_construction.max(1),
        };
        Self {
            params,
            seed,
            vectors: Vec::new(),
            links: Vec::new(),
            deleted: Vec::new(),
            deleted_count: 0,
            entry_point: None,
            max_layer: 0,
        }
    }

    /// Construction parameters.
    #[must_use]
    pub fn params(&self) -> HnswParams {
        self.params
    }

    /// Total allocated labels, tombstoned ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Labels that can still appear in results.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.vectors.len() - self.deleted_count
    }

    /// Tombstoned labels awaiting compaction.
    #[must_use]
    pub fn deleted_count(&self) -> usize {
        self.deleted_count
    }

    /// Vector dimension, if any node was inserted.
    #[must_use]
    pub fn dimension(&self) -> Option<usize> {
        self.vectors.first().map(Vec::len)
    }

    /// Whether a label is tombstoned. Unknown labels count as deleted.
    #[must_use]
    pub fn is_deleted(&self, label: u32) -> bool {
        self.deleted.get(label as usize).copied().unwrap_or(true)
    }

    /// The stored (normalized) vector for a label.
    #[must_use]
    pub fn vector(&self, label: u32) -> Option<&[f32]> {
        self.vectors.get(label as usize).map(Vec::as_slice)
    }

    /// Tombstones a label. Returns `false` if it was unknown or already deleted.
    pub fn mark_deleted(&mut self, label: u32) -> bool {
        match self.deleted.get_mut(label as usize) {
            Some(flag) if !*flag => {
                *flag = true;
                self.deleted_count += 1;
                true
            }
            _ => false,
        }
    }

    /// Inserts a vector and returns its label.
    pub fn insert(&mut self, vector: &[f32]) -> u32 {
        let label = self.vectors.len() as u32;
        let level = self.random_level(label);
        let query = normalized(vector);

        self.vectors.push(query.clone());
        self.links.push(vec![Vec::new(); level + 1]);
        self.deleted.push(false);

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(label);
            self.max_layer = level;
            return label;
        };

        let mut current = entry;
        if self.max_layer > level {
            for layer in (level + 1..=self.max_layer).rev() {
                current = self.greedy_closest(&query, current, layer);
            }
        }

        let mut entry_points = vec![current];
        for layer in (0..=level.min(self.max_layer)).rev() {
            let max_links = self.max_links(layer);
            let candidates =
                self.search_layer(&query, &entry_points, self.params.ef_construction, layer);
            let selected = self.select_neighbors(&candidates, max_links);

            self.links[label as usize][layer] = selected.clone();
            for &neighbor in &selected {
                let list = &mut self.links[neighbor as usize][layer];
                if !list.contains(&label) {
                    list.push(label);
                }
                if list.len() > max_links {
                    self.prune(neighbor, layer, max_links);
                }
            }

            entry_points = candidates.iter().map(|c| c.label).collect();
        }

        if level > self.max_layer {
            self.entry_point = Some(label);
            self.max_layer = level;
        }

        label
    }

    /// Finds the `k` closest live nodes to `query`.
    ///
    /// `ef` is the beam width at layer 0; it is raised to at least `k`.
    /// Results are sorted by ascending distance.
    pub fn search(&self, query: &[f32], k: usize, ef: usize) -> Vec<Neighbor> {
        let Some(entry) = self.entry_point else {
            return Vec::new();
        };
        if k == 0 || self.live_count() == 0 {
            return Vec::new();
        }

        let query = normalized(query);
        let mut current = entry;
        for layer in (1..=self.max_layer).rev() {
            current = self.greedy_closest(&query, current, layer);
        }

        self.search_layer(&query, &[current], ef.max(k), 0)
            .into_iter()
            .filter(|c| !self.deleted[c.label as usize])
            .take(k)
            .map(|c| Neighbor {
                label: c.label,
                distance: c.distance,
            })
            .collect()
    }

    fn max_links(&self, layer: usize) -> usize {
        if layer == 0 {
            self.params.m * 2
        } else {
            self.params.m
        }
    }

    fn distance(&self, query: &[f32], label: u32) -> f32 {
        1.0 - dot(query, &self.vectors[label as usize])
    }

    fn distance_between(&self, a: u32, b: u32) -> f32 {
        1.0 - dot(&self.vectors[a as usize], &self.vectors[b as usize])
    }

    fn neighbors(&self, label: u32, layer: usize) -> &[u32] {
        self.links[label as usize]
            .get(layer)
            .map_or(&[], Vec::as_slice)
    }

    /// Level = floor(-ln(u) / ln(M)) with u derived from (seed, label).
    fn random_level(&self, label: u32) -> usize {
        let hash = splitmix64(self.seed ^ (u64::from(label).wrapping_mul(0x9E37_79B9_7F4A_7C15)));
        // 53 random mantissa bits -> (0, 1]
        let uniform = ((hash >> 11) as f64 + 1.0) / (1u64 << 53) as f64;
        let ml = 1.0 / (self.params.m as f64).ln();
        ((-uniform.ln()) * ml).floor() as usize
    }

    fn greedy_closest(&self, query: &[f32], start: u32, layer: usize) -> u32 {
        let mut current = start;
        let mut current_distance = self.distance(query, start);
        loop {
            let mut changed = false;
            for &neighbor in self.neighbors(current, layer) {
                let d = self.distance(query, neighbor);
                if d < current_distance {
                    current = neighbor;
                    current_distance = d;
                    changed = true;
                }
            }
            if !changed {
                return current;
            }
        }
    }

    /// Beam search on one layer. Returns up to `ef` candidates sorted by
    /// ascending distance.
    fn search_layer(&self, query: &[f32], entry_points: &[u32], ef: usize, layer: usize) -> Vec<Candidate> {
        let mut visited: HashSet<u32> = HashSet::new();
        let mut frontier: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
        let mut results: BinaryHeap<Candidate> = BinaryHeap::new();

        for &ep in entry_points {
            if visited.insert(ep) {
                let candidate = Candidate {
                    distance: self.distance(query, ep),
                    label: ep,
                };
                frontier.push(Reverse(candidate));
                results.push(candidate);
            }
        }
        while results.len() > ef {
            results.pop();
        }

        while let Some(Reverse(closest)) = frontier.pop() {
            let worst = results.peek().map_or(f32::MAX, |c| c.distance);
            if results.len() >= ef && closest.distance > worst {
                break;
            }

            for &neighbor in self.neighbors(closest.label, layer) {
                if !visited.insert(neighbor) {
                    continue;
                }
                let distance = self.distance(query, neighbor);
                let worst = results.peek().map_or(f32::MAX, |c| c.distance);
                if results.len() < ef || distance < worst {
                    let candidate = Candidate {
                        distance,
                        label: neighbor,
                    };
                    frontier.push(Reverse(candidate));
                    results.push(candidate);
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        results.into_sorted_vec()
    }

    /// Neighbour selection heuristic: keep a candidate only if it is closer
    /// to the new node than to any neighbour already kept, then back-fill
    /// with the discarded ones.
    fn select_neighbors(&self, candidates: &[Candidate], max_links: usize) -> Vec<u32> {
        let mut selected: Vec<u32> = Vec::with_capacity(max_links);
        let mut discarded: Vec<u32> = Vec::new();

        for candidate in candidates {
            if selected.len() >= max_links {
                break;
            }
            let diverse = selected
                .iter()
                .all(|&kept| self.distance_between(candidate.label, kept) > candidate.distance);
            if diverse {
                selected.push(candidate.label);
            } else {
                discarded.push(candidate.label);
            }
        }

        for label in discarded {
            if selected.len() >= max_links {
                break;
            }
            selected.push(label);
        }

        selected
    }

    fn prune(&mut self, label: u32, layer: usize, max_links: usize) {
        let mut scored: Vec<Candidate> = self.links[label as usize][layer]
            .iter()
            .map(|&n| Candidate {
                distance: self.distance_between(label, n),
                label: n,
            })
            .collect();
        scored.sort();
        let kept = self.select_neighbors(&scored, max_links);
        self.links[label as usize][layer] = kept;
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}
