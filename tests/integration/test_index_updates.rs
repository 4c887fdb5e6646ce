//! Incremental index maintenance against full rebuilds.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::common::{TestCollection, VectorGen, brute_force};
use semdex::index::{ANN_INDEX_FILE, AnnIndex};
use semdex::query::SearchStrategy;
use semdex::{
    AccuracyLevel, CollectionManager, CollectionOptions, IndexCache, SearchFilter, UpdateMode,
    VectorRecord,
};

fn top_ids(fixture: &TestCollection, query: &[f32], k: usize) -> BTreeSet<String> {
    let outcome = fixture
        .collection
        .search_filtered(query, k, AccuracyLevel::Balanced, &SearchFilter::new())
        .unwrap();
    assert_eq!(outcome.strategy, SearchStrategy::Ann);
    outcome.results.into_iter().map(|r| r.id).collect()
}

#[test]
fn test_incremental_updates_match_full_rebuild() {
    let fixture = TestCollection::new();
    let mut vectors = VectorGen::new(21);
    let mut live: BTreeMap<String, VectorRecord> = BTreeMap::new();

    let initial = vectors.records("r", 200);
    let summary = fixture.collection.upsert(&initial).unwrap();
    assert_eq!(summary.update.unwrap().mode, UpdateMode::FullRebuild);
    live.extend(initial.into_iter().map(|r| (r.id.clone(), r)));

    for round in 0..5 {
        let mut session = fixture.collection.begin_write_session();
        for record in vectors.records(&format!("n{round}_"), 10) {
            session.upsert(&record).unwrap();
            live.insert(record.id.clone(), record);
        }
        for i in 0..5 {
            let id = format!("r{}", round * 20 + i);
            let record = VectorRecord::new(id.clone(), vectors.vector());
            session.upsert(&record).unwrap();
            live.insert(id, record);
        }
        let doomed: Vec<String> = (0..5).map(|i| format!("r{}", round * 20 + 10 + i)).collect();
        let doomed_refs: Vec<&str> = doomed.iter().map(String::as_str).collect();
        assert_eq!(session.delete(&doomed_refs).unwrap(), 5);
        for id in &doomed {
            live.remove(id);
        }

        let summary = session.end(false).unwrap();
        let report = summary.update.unwrap();
        assert_eq!(report.mode, UpdateMode::Incremental);
        assert_eq!(report.state.vector_count, live.len());
    }

    let records: Vec<VectorRecord> = live.values().cloned().collect();
    let queries: Vec<Vec<f32>> = (0..10).map(|_| vectors.vector()).collect();

    let incremental: Vec<BTreeSet<String>> =
        queries.iter().map(|q| top_ids(&fixture, q, 5)).collect();

    let state = fixture.collection.rebuild().unwrap();
    assert_eq!(state.live_labels, live.len());
    assert_eq!(state.soft_deleted, 0);
    let rebuilt: Vec<BTreeSet<String>> = queries.iter().map(|q| top_ids(&fixture, q, 5)).collect();

    for (i, query) in queries.iter().enumerate() {
        let exact: BTreeSet<String> = brute_force(&records, query, 5).into_iter().collect();
        assert_eq!(incremental[i], rebuilt[i], "query {i}");
        assert_eq!(incremental[i], exact, "query {i}");
    }
}

#[test]
fn test_small_batch_on_large_collection_is_incremental() {
    let fixture = TestCollection::new();
    let mut vectors = VectorGen::new(1000);
    let base = vectors.records("r", 1000);
    fixture.collection.upsert(&base).unwrap();

    let added = vectors.records("new", 5);
    let updated: Vec<VectorRecord> = ["r10", "r20", "r30"]
        .iter()
        .map(|id| VectorRecord::new(*id, vectors.vector()))
        .collect();
    let deleted = ["r40", "r50"];

    let mut session = fixture.collection.begin_write_session();
    session.upsert_batch(&added).unwrap();
    session.upsert_batch(&updated).unwrap();
    assert_eq!(session.delete(&deleted).unwrap(), 2);
    let summary = session.end(false).unwrap();
    assert_eq!((summary.added, summary.updated, summary.deleted), (5, 3, 2));

    let report = summary.update.unwrap();
    assert_eq!(report.mode, UpdateMode::Incremental);
    assert_eq!(report.inserted, 8);
    assert_eq!(report.state.vector_count, 1003);
    assert!(!fixture.collection.is_stale().unwrap());

    for record in added.iter().chain(&updated) {
        let results = fixture
            .collection
            .search(&record.vector, 5, AccuracyLevel::Balanced)
            .unwrap();
        assert!(
            results.iter().any(|r| r.id == record.id),
            "{} missing from its own top 5",
            record.id
        );
    }

    for id in deleted {
        let gone = base.iter().find(|r| r.id == id).unwrap();
        let results = fixture
            .collection
            .search(&gone.vector, 5, AccuracyLevel::Balanced)
            .unwrap();
        assert!(results.iter().all(|r| r.id != id));
    }
}

#[test]
fn test_large_change_set_rebuilds() {
    let fixture = TestCollection::new();
    let mut vectors = VectorGen::new(4);
    fixture.collection.upsert(&vectors.records("r", 20)).unwrap();

    // 15 changes against 20 records exceeds the default threshold
    let summary = fixture.collection.upsert(&vectors.records("s", 15)).unwrap();
    let report = summary.update.unwrap();
    assert_eq!(report.mode, UpdateMode::FullRebuild);
    assert_eq!(report.state.vector_count, 35);
    assert_eq!(report.state.live_labels, 35);
}

#[test]
fn test_soft_deletes_trigger_compaction() {
    let fixture = TestCollection::new();
    let mut vectors = VectorGen::new(6);
    fixture.collection.upsert(&vectors.records("r", 40)).unwrap();

    let mut modes = Vec::new();
    for round in 0..6 {
        let ids: Vec<String> = (0..5).map(|i| format!("r{}", round * 5 + i)).collect();
        let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
        let mut session = fixture.collection.begin_write_session();
        session.delete(&ids).unwrap();
        let report = session.end(false).unwrap().update.unwrap();
        modes.push(report.mode);

        if report.mode == UpdateMode::FullRebuild {
            assert_eq!(report.state.soft_deleted, 0);
        } else {
            assert_eq!(report.state.soft_deleted, (round + 1) * 5);
        }
    }
    assert_eq!(&modes[..5], &[UpdateMode::Incremental; 5]);
    assert_eq!(modes[5], UpdateMode::FullRebuild);
}

#[test]
fn test_deleted_records_never_returned() {
    let fixture = TestCollection::new();
    let records = VectorGen::new(30).records("r", 30);
    fixture.collection.upsert(&records).unwrap();

    let target = &records[5];
    fixture.collection.delete(&[target.id.as_str()]).unwrap();

    for accuracy in [AccuracyLevel::Fast, AccuracyLevel::Exhaustive] {
        let results = fixture.collection.search(&target.vector, 30, accuracy).unwrap();
        assert_eq!(results.len(), 29);
        assert!(results.iter().all(|r| r.id != target.id));
    }

    let other = fixture.reopen();
    let results = other.search(&target.vector, 30, AccuracyLevel::High).unwrap();
    assert!(results.iter().all(|r| r.id != target.id));
}

#[test]
fn test_truncated_index_is_rebuilt_on_query() {
    let fixture = TestCollection::new();
    let records = VectorGen::new(50).records("r", 50);
    fixture.collection.upsert(&records).unwrap();

    let index_path = fixture.collection.root().join(ANN_INDEX_FILE);
    std::fs::write(&index_path, b"").unwrap();
    assert!(fixture.collection.is_stale().unwrap());

    let target = &records[17];
    let results = fixture
        .collection
        .search(&target.vector, 3, AccuracyLevel::Balanced)
        .unwrap();
    assert_eq!(results[0].id, target.id);

    assert!(!fixture.collection.is_stale().unwrap());
    let health = fixture.collection.health().unwrap();
    assert!(health.index_present);
    assert_eq!(health.record_count, 50);
    assert!(health.index_file_size > 0);
}

#[test]
fn test_garbage_index_is_rebuilt_on_query() {
    let fixture = TestCollection::new();
    let records = VectorGen::new(77).records("r", 50);
    fixture.collection.upsert(&records).unwrap();

    // Same size, unreadable content: metadata alone cannot tell
    let index_path = fixture.collection.root().join(ANN_INDEX_FILE);
    let len = std::fs::metadata(&index_path).unwrap().len() as usize;
    std::fs::write(&index_path, vec![0xAB; len]).unwrap();

    let manager = CollectionManager::new(
        fixture.manager.data_dir(),
        Arc::new(IndexCache::default()),
        CollectionOptions::default(),
    );
    let collection = manager.open("code").unwrap();
    assert!(!collection.is_stale().unwrap());

    let target = &records[3];
    let outcome = collection
        .search_filtered(&target.vector, 3, AccuracyLevel::Balanced, &SearchFilter::new())
        .unwrap();
    assert_eq!(outcome.strategy, SearchStrategy::Ann);
    assert!(outcome.rebuilt);
    assert_eq!(outcome.results[0].id, target.id);

    let repaired = AnnIndex::load(&index_path).unwrap().unwrap();
    assert_eq!(repaired.live_count(), 50);

    let outcome = collection
        .search_filtered(&target.vector, 3, AccuracyLevel::Balanced, &SearchFilter::new())
        .unwrap();
    assert_eq!(outcome.strategy, SearchStrategy::Ann);
    assert!(!outcome.rebuilt);
}

#[test]
fn test_failed_session_update_leaves_index_stale() {
    let fixture = TestCollection::new();
    let mut vectors = VectorGen::new(88);
    let records = vectors.records("r", 30);
    fixture.collection.upsert(&records).unwrap();

    // The index cannot be rewritten while a directory sits in its place
    let index_path = fixture.collection.root().join(ANN_INDEX_FILE);
    std::fs::remove_file(&index_path).unwrap();
    std::fs::create_dir(&index_path).unwrap();
    std::fs::write(index_path.join("blocker"), b"x").unwrap();

    let moved = VectorRecord::new("r7", vectors.vector());
    let mut session = fixture.collection.begin_write_session();
    session.upsert(&moved).unwrap();
    assert!(session.end(false).is_err());
    assert!(fixture.collection.is_stale().unwrap());

    std::fs::remove_dir_all(&index_path).unwrap();
    let outcome = fixture
        .collection
        .search_filtered(&moved.vector, 1, AccuracyLevel::Balanced, &SearchFilter::new())
        .unwrap();
    assert!(outcome.rebuilt);
    assert_eq!(outcome.strategy, SearchStrategy::Ann);
    assert_eq!(outcome.results[0].id, "r7");
    assert!(!fixture.collection.is_stale().unwrap());
}
