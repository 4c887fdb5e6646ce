//! Record placement, round trips and deletes through the collection API.

use std::sync::Arc;

use crate::common::{DIM, TestCollection, VectorGen, small_params};
use semdex::{
    CollectionManager, CollectionOptions, IndexCache, PayloadKey, PayloadValue, StoreError,
    VectorRecord,
};
use tempfile::TempDir;

#[test]
fn test_same_parameters_place_records_identically() {
    let mut vectors = VectorGen::new(11);
    let records = vectors.records("r", 40);

    let mut relative_paths = Vec::new();
    for _ in 0..2 {
        let dir = TempDir::new().unwrap();
        let manager = CollectionManager::new(
            dir.path(),
            Arc::new(IndexCache::default()),
            CollectionOptions::default(),
        );
        let collection = manager.create("code", &small_params(DIM)).unwrap();
        collection.upsert(&records).unwrap();

        let store = collection.record_store();
        let paths: Vec<_> = records
            .iter()
            .map(|r| {
                store
                    .find(&r.id)
                    .unwrap()
                    .strip_prefix(collection.root())
                    .unwrap()
                    .to_path_buf()
            })
            .collect();
        relative_paths.push(paths);
    }
    assert_eq!(relative_paths[0], relative_paths[1]);
}

#[test]
fn test_upsert_then_get_round_trips() {
    let fixture = TestCollection::new();
    let record = VectorRecord::new("src/lib.rs#parse", VectorGen::new(3).vector())
        .with_payload(PayloadKey::FilePath.as_str(), "src/lib.rs")
        .with_payload(PayloadKey::LineStart.as_str(), 12i64)
        .with_payload(
            PayloadKey::Branches.as_str(),
            vec!["main".to_string(), "dev".to_string()],
        );

    fixture.collection.upsert(std::slice::from_ref(&record)).unwrap();

    let loaded = fixture.collection.get(&record.id).unwrap().unwrap();
    assert_eq!(loaded, record);

    // Another handle sees the same record
    let other = fixture.reopen();
    assert_eq!(other.get(&record.id).unwrap().unwrap(), record);
    assert!(other.get("missing").unwrap().is_none());
}

#[test]
fn test_upsert_with_new_vector_replaces_file() {
    let fixture = TestCollection::new();
    let mut vectors = VectorGen::new(5);
    let first = VectorRecord::new("a", vectors.vector());
    let negated: Vec<f32> = first.vector.iter().map(|x| -x).collect();
    let second = VectorRecord::new("a", negated);

    fixture.collection.upsert(&[first]).unwrap();
    let summary = fixture.collection.upsert(std::slice::from_ref(&second)).unwrap();
    assert_eq!(summary.added, 0);
    assert_eq!(summary.updated, 1);

    assert_eq!(fixture.collection.record_store().count_records(), 1);
    assert_eq!(fixture.collection.get("a").unwrap().unwrap(), second);
}

#[test]
fn test_delete_is_idempotent() {
    let fixture = TestCollection::new();
    let records = VectorGen::new(8).records("r", 10);
    fixture.collection.upsert(&records).unwrap();

    assert_eq!(fixture.collection.delete(&["r1", "r2", "nope"]).unwrap(), 2);
    assert_eq!(fixture.collection.delete(&["r1", "r2"]).unwrap(), 0);
    assert_eq!(fixture.collection.record_store().count_records(), 8);
    assert!(fixture.collection.get("r1").unwrap().is_none());
}

#[test]
fn test_delete_by_file_and_list_files() {
    let fixture = TestCollection::new();
    // 30 records spread over src/r0.rs .. src/r9.rs
    let records = VectorGen::new(9).records("r", 30);
    fixture.collection.upsert(&records).unwrap();

    let files = fixture.collection.list_files();
    assert_eq!(files.len(), 10);
    assert!(files.contains("src/r3.rs"));

    assert_eq!(fixture.collection.delete_by_file("src/r3.rs").unwrap(), 3);
    assert_eq!(fixture.collection.delete_by_file("src/r3.rs").unwrap(), 0);

    let files = fixture.collection.list_files();
    assert_eq!(files.len(), 9);
    assert!(!files.contains("src/r3.rs"));
    assert_eq!(fixture.collection.record_store().count_records(), 27);
}

#[test]
fn test_invalid_records_are_rejected() {
    let fixture = TestCollection::new();

    let short = VectorRecord::new("short", vec![1.0; DIM - 1]);
    assert!(matches!(
        fixture.collection.upsert(&[short]),
        Err(StoreError::InvalidDimension { expected: DIM, .. })
    ));

    let unnamed = VectorRecord::new("", vec![1.0; DIM]);
    assert!(matches!(
        fixture.collection.upsert(&[unnamed]),
        Err(StoreError::InvalidParameters { .. })
    ));

    // JSON would store these as null and the record could never be read
    for bad in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
        let mut vector = vec![0.25; DIM];
        vector[3] = bad;
        let record = VectorRecord::new("non_finite", vector);
        assert!(matches!(
            fixture.collection.upsert(&[record]),
            Err(StoreError::InvalidParameters { .. })
        ));
    }
    assert_eq!(fixture.collection.record_store().count_records(), 0);
    assert_eq!(fixture.collection.health().unwrap().corrupt_records, 0);
}

#[test]
fn test_ids_with_path_characters_survive() {
    let fixture = TestCollection::new();
    let id = "src/a b/ü.rs#fn:main";
    let record = VectorRecord::new(id, VectorGen::new(1).vector())
        .with_payload("language", PayloadValue::from("rust"));

    fixture.collection.upsert(std::slice::from_ref(&record)).unwrap();
    let path = fixture.collection.record_store().find(id).unwrap();
    let name = path.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("record_"));
    assert!(!name.contains('/') && !name.contains(' '));
    assert_eq!(fixture.collection.get(id).unwrap().unwrap(), record);
}

#[test]
fn test_dropped_collection_is_not_recreated_by_stale_handle() {
    let fixture = TestCollection::new();
    let mut vectors = VectorGen::new(21);
    fixture.collection.upsert(&vectors.records("r", 5)).unwrap();

    fixture.manager.delete("code").unwrap();
    let root = fixture.collection.root().to_path_buf();
    assert!(!root.exists());

    assert!(matches!(
        fixture.collection.mark_stale(),
        Err(StoreError::CollectionNotFound { .. })
    ));
    assert!(matches!(
        fixture.collection.rebuild(),
        Err(StoreError::CollectionNotFound { .. })
    ));
    assert!(matches!(
        fixture.collection.upsert(&vectors.records("late", 1)),
        Err(StoreError::CollectionNotFound { .. })
    ));
    assert!(!root.exists());
    assert!(fixture.manager.list().unwrap().is_empty());
}
