//! Changes accumulated by a write session, applied to the index in one go.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Ids touched since the index was last brought up to date.
///
/// Upserts carry the record file they were written to so the index update
/// never needs an id lookup.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    added: BTreeMap<String, PathBuf>,
    updated: BTreeMap<String, PathBuf>,
    deleted: BTreeSet<String>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a write. `existed` says whether the id had a record before
    /// the write.
    pub fn record_upsert(&mut self, id: &str, path: PathBuf, existed: bool) {
        if self.deleted.remove(id) || self.updated.contains_key(id) {
            self.updated.insert(id.to_string(), path);
        } else if self.added.contains_key(id) || !existed {
            self.added.insert(id.to_string(), path);
        } else {
            self.updated.insert(id.to_string(), path);
        }
    }

    /// Records a delete.
    pub fn record_delete(&mut self, id: &str) {
        self.added.remove(id);
        self.updated.remove(id);
        self.deleted.insert(id.to_string());
    }

    pub fn added(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.added.iter().map(|(id, p)| (id.as_str(), p.as_path()))
    }

    pub fn updated(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.updated.iter().map(|(id, p)| (id.as_str(), p.as_path()))
    }

    pub fn deleted(&self) -> impl Iterator<Item = &str> {
        self.deleted.iter().map(String::as_str)
    }

    /// Every upsert, added first.
    pub fn upserts(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.added().chain(self.updated())
    }

    pub fn added_count(&self) -> usize {
        self.added.len()
    }

    pub fn updated_count(&self) -> usize {
        self.updated.len()
    }

    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }

    /// Number of distinct ids touched.
    pub fn len(&self) -> usize {
        self.added.len() + self.updated.len() + self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.added.clear();
        self.updated.clear();
        self.deleted.clear();
    }
}
