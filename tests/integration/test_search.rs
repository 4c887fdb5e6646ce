//! Query behaviour: ordering, filters, text queries and degenerate inputs.

use std::time::Duration;

use crate::common::{DIM, TestCollection, VectorGen, brute_force};
use semdex::storage::CollectionLock;
use semdex::{
    AccuracyLevel, CollectionOptions, EmbeddingGenerator, HashEmbeddingGenerator, SearchFilter,
    StoreError, VectorDimension, VectorRecord,
};

#[test]
fn test_empty_collection_returns_nothing() {
    let fixture = TestCollection::new();
    let query = VectorGen::new(1).vector();
    for accuracy in [AccuracyLevel::Fast, AccuracyLevel::Exhaustive] {
        assert!(fixture.collection.search(&query, 10, accuracy).unwrap().is_empty());
    }
    assert!(!fixture.collection.is_stale().unwrap());
}

#[test]
fn test_zero_k_and_wrong_dimension() {
    let fixture = TestCollection::new();
    fixture
        .collection
        .upsert(&VectorGen::new(2).records("r", 5))
        .unwrap();

    let query = VectorGen::new(3).vector();
    assert!(
        fixture
            .collection
            .search(&query, 0, AccuracyLevel::Balanced)
            .unwrap()
            .is_empty()
    );

    let err = fixture
        .collection
        .search(&query[..DIM - 2], 3, AccuracyLevel::Balanced)
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::InvalidDimension {
            expected: DIM,
            actual
        } if actual == DIM - 2
    ));

    let mut poisoned = query.clone();
    poisoned[0] = f32::NAN;
    assert!(matches!(
        fixture
            .collection
            .search(&poisoned, 3, AccuracyLevel::Balanced),
        Err(StoreError::InvalidParameters { .. })
    ));
}

#[test]
fn test_results_ranked_best_first() {
    let fixture = TestCollection::new();
    let mut vectors = VectorGen::new(31);
    let records = vectors.records("r", 120);
    fixture.collection.upsert(&records).unwrap();

    let query = vectors.vector();
    let results = fixture
        .collection
        .search(&query, 10, AccuracyLevel::High)
        .unwrap();
    assert_eq!(results.len(), 10);
    assert!(results.windows(2).all(|w| w[0].score >= w[1].score));

    let mut found: Vec<String> = results.iter().map(|r| r.id.clone()).collect();
    let mut exact = brute_force(&records, &query, 10);
    exact.sort();
    found.sort();
    assert_eq!(found, exact);
}

#[test]
fn test_filter_restricts_results() {
    let fixture = TestCollection::new();
    let mut vectors = VectorGen::new(41);
    let records: Vec<VectorRecord> = (0..40)
        .map(|i| {
            let language = if i % 4 == 0 { "python" } else { "rust" };
            VectorRecord::new(format!("r{i}"), vectors.vector())
                .with_payload("language", language)
                .with_payload("branches", vec!["main".to_string()])
        })
        .collect();
    fixture.collection.upsert(&records).unwrap();

    let filter = SearchFilter::new()
        .with("language", "python")
        .with("branches", "main");
    let outcome = fixture
        .collection
        .search_filtered(&vectors.vector(), 20, AccuracyLevel::Balanced, &filter)
        .unwrap();

    // Only ten records match, so fewer than k come back
    assert_eq!(outcome.results.len(), 10);
    assert!(
        outcome
            .results
            .iter()
            .all(|r| r.payload.get("language").and_then(|v| v.as_text()) == Some("python"))
    );
}

#[test]
fn test_text_search_with_hashing_embedder() {
    let fixture = TestCollection::new();
    let generator = HashEmbeddingGenerator::new(VectorDimension::new(DIM).unwrap());
    let texts = [
        ("parse", "fn parse_config(path: &Path) -> Config"),
        ("render", "fn render_table(rows: &[Row]) -> String"),
        ("connect", "async fn connect_database(url: &str) -> Pool"),
    ];
    let records: Vec<VectorRecord> = texts
        .iter()
        .map(|(id, text)| VectorRecord::new(*id, generator.embed(text).unwrap()))
        .collect();
    fixture.collection.upsert(&records).unwrap();

    let results = fixture
        .collection
        .search_text(&generator, "fn render_table(rows: &[Row]) -> String", 1, AccuracyLevel::Balanced)
        .unwrap();
    assert_eq!(results[0].id, "render");
}

#[test]
fn test_scan_fallback_returns_k_results() {
    let fixture = TestCollection::with_options(CollectionOptions {
        lock_timeout: Some(Duration::from_millis(20)),
        ..CollectionOptions::default()
    });
    let mut vectors = VectorGen::new(51);
    let records = vectors.records("r", 30);
    fixture.collection.upsert(&records).unwrap();
    fixture.collection.mark_stale().unwrap();
    let _held = CollectionLock::acquire(fixture.collection.root(), None).unwrap();

    let query = vectors.vector();
    let mut exact = brute_force(&records, &query, 15);
    exact.sort();
    for accuracy in [
        AccuracyLevel::Fast,
        AccuracyLevel::Balanced,
        AccuracyLevel::High,
        AccuracyLevel::Exhaustive,
    ] {
        let results = fixture.collection.search(&query, 15, accuracy).unwrap();
        assert_eq!(results.len(), 15, "{accuracy}");
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        if accuracy == AccuracyLevel::Exhaustive {
            let mut ids: Vec<String> = results.into_iter().map(|r| r.id).collect();
            ids.sort();
            assert_eq!(ids, exact);
        }
    }
}
