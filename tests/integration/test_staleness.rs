//! Deferred rebuilds, the stale flag and the collection lock.

use std::time::Duration;

use crate::common::{TestCollection, VectorGen};
use semdex::query::SearchStrategy;
use semdex::storage::CollectionLock;
use semdex::{AccuracyLevel, CollectionOptions, IndexState, SearchFilter, StoreError};

#[test]
fn test_deferred_session_marks_stale_and_query_rebuilds() {
    let fixture = TestCollection::new();
    let mut vectors = VectorGen::new(2);
    fixture.collection.upsert(&vectors.records("r", 40)).unwrap();
    assert!(!fixture.collection.is_stale().unwrap());

    let added = vectors.records("late", 3);
    let mut session = fixture.collection.begin_write_session();
    session.upsert_batch(&added).unwrap();
    let summary = session.end(true).unwrap();
    assert!(summary.deferred);
    assert!(summary.update.is_none());

    assert!(fixture.collection.is_stale().unwrap());
    let health = fixture.collection.health().unwrap();
    assert_eq!(health.state, IndexState::Stale);
    assert!(health.last_marked_stale_timestamp.is_some());

    let outcome = fixture
        .collection
        .search_filtered(&added[1].vector, 1, AccuracyLevel::Balanced, &SearchFilter::new())
        .unwrap();
    assert!(outcome.rebuilt);
    assert_eq!(outcome.strategy, SearchStrategy::Ann);
    assert_eq!(outcome.results[0].id, added[1].id);
    assert!(!fixture.collection.is_stale().unwrap());

    // Only the first reader rebuilds
    let outcome = fixture
        .collection
        .search_filtered(&added[1].vector, 1, AccuracyLevel::Balanced, &SearchFilter::new())
        .unwrap();
    assert!(!outcome.rebuilt);
}

#[test]
fn test_stale_survives_interleaved_writers() {
    let fixture = TestCollection::new();
    fixture
        .collection
        .upsert(&VectorGen::new(3).records("base", 20))
        .unwrap();

    std::thread::scope(|scope| {
        for worker in 0..6u64 {
            let handle = fixture.reopen();
            scope.spawn(move || {
                let records = VectorGen::new(100 + worker).records(&format!("w{worker}_"), 5);
                let mut session = handle.begin_write_session();
                session.upsert_batch(&records).unwrap();
                session.end(true).unwrap();
            });
        }
    });

    assert!(fixture.collection.is_stale().unwrap());
    assert_eq!(fixture.collection.record_store().count_records(), 50);

    fixture.collection.rebuild().unwrap();
    assert!(!fixture.collection.is_stale().unwrap());
    assert_eq!(fixture.collection.health().unwrap().state, IndexState::Fresh);
}

#[test]
fn test_dropped_session_marks_stale() {
    let fixture = TestCollection::new();
    let mut vectors = VectorGen::new(12);
    fixture.collection.upsert(&vectors.records("r", 10)).unwrap();

    {
        let mut session = fixture.collection.begin_write_session();
        session.upsert_batch(&vectors.records("s", 2)).unwrap();
    }
    assert!(fixture.collection.is_stale().unwrap());

    // Records written before the drop are still searchable
    let results = fixture
        .collection
        .search(&vectors.vector(), 12, AccuracyLevel::Balanced)
        .unwrap();
    assert_eq!(results.len(), 12);
}

#[test]
fn test_external_write_detected_by_count() {
    let fixture = TestCollection::new();
    let mut vectors = VectorGen::new(13);
    fixture.collection.upsert(&vectors.records("r", 10)).unwrap();

    // A write that never reached the index, as after a crash
    let stray = vectors.records("stray", 1).remove(0);
    fixture.collection.record_store().write(&stray).unwrap();
    assert!(fixture.collection.is_stale().unwrap());

    let results = fixture
        .collection
        .search(&stray.vector, 1, AccuracyLevel::Fast)
        .unwrap();
    assert_eq!(results[0].id, stray.id);
    assert!(!fixture.collection.is_stale().unwrap());
}

#[test]
fn test_lock_timeout_is_retryable_and_search_degrades() {
    let options = CollectionOptions {
        lock_timeout: Some(Duration::from_millis(50)),
        ..CollectionOptions::default()
    };
    let fixture = TestCollection::with_options(options);
    let mut vectors = VectorGen::new(14);
    let records = vectors.records("r", 20);
    fixture.collection.upsert(&records).unwrap();
    fixture.collection.mark_stale().unwrap();

    let held = CollectionLock::acquire(fixture.collection.root(), None).unwrap();

    let err = fixture.collection.mark_stale().unwrap_err();
    assert!(matches!(err, StoreError::LockTimeout { .. }));
    assert!(err.is_retryable());

    // The stale index cannot be rebuilt while the lock is held, so the
    // query scans records instead of failing
    let outcome = fixture
        .collection
        .search_filtered(&records[4].vector, 1, AccuracyLevel::Balanced, &SearchFilter::new())
        .unwrap();
    assert!(!outcome.rebuilt);
    assert_ne!(outcome.strategy, SearchStrategy::Ann);
    assert_eq!(outcome.results[0].id, records[4].id);
    drop(held);
}
