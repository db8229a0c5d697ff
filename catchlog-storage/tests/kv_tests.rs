use catchlog_storage::{
    DuckDbKvStore, KeyFlagStore, KeyValueStore, MemoryKvStore, ProgressStore, StorageError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tempfile::TempDir;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Doc {
    processed: u32,
}

fn exercise(store: &dyn KeyValueStore) {
    assert_eq!(store.get("a").unwrap(), None);
    store.set("b", "2").unwrap();
    store.set("a", "1").unwrap();
    store.set("a", "one").unwrap();
    assert_eq!(store.get("a").unwrap().as_deref(), Some("one"));
    assert_eq!(store.keys().unwrap(), vec!["a".to_string(), "b".to_string()]);
    assert!(store.remove("a").unwrap());
    assert!(!store.remove("a").unwrap());
    assert_eq!(store.keys().unwrap(), vec!["b".to_string()]);
}

#[test]
fn memory_store_basics() {
    exercise(&MemoryKvStore::new());
}

#[test]
fn duckdb_store_basics() {
    exercise(&DuckDbKvStore::open_in_memory().unwrap());
}

#[test]
fn duckdb_store_persists_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("local.duckdb");
    {
        let store = DuckDbKvStore::open(&path).unwrap();
        store.set("catchlog.keyflag.u1", "1").unwrap();
    }
    let reopened = DuckDbKvStore::open(&path).unwrap();
    assert_eq!(
        reopened.get("catchlog.keyflag.u1").unwrap().as_deref(),
        Some("1")
    );
}

#[test]
fn disabled_store_reports_unavailable() {
    let store = MemoryKvStore::disabled();
    assert!(!store.is_available());
    assert!(matches!(store.set("k", "v"), Err(StorageError::Unavailable(_))));
    assert!(matches!(store.keys(), Err(StorageError::Unavailable(_))));

    store.set_available(true);
    store.set("k", "v").unwrap();
    assert_eq!(store.len(), 1);
}

#[test]
fn progress_documents_are_keyed_by_scope_and_owner() {
    let kv = Arc::new(MemoryKvStore::new());
    let progress = ProgressStore::new(kv.clone());

    progress.save("trip+fish_catch", "u1", &Doc { processed: 3 }).unwrap();
    assert!(kv.get("catchlog.migration.trip+fish_catch.u1").unwrap().is_some());

    let loaded: Option<Doc> = progress.load("trip+fish_catch", "u1").unwrap();
    assert_eq!(loaded, Some(Doc { processed: 3 }));
    let other: Option<Doc> = progress.load("trip+fish_catch", "u2").unwrap();
    assert_eq!(other, None);
}

#[test]
fn corrupt_progress_is_a_serialization_error() {
    let kv = Arc::new(MemoryKvStore::new());
    kv.set(&ProgressStore::key("trip", "u1"), "{not json").unwrap();
    let progress = ProgressStore::new(kv);
    let result: Result<Option<Doc>, _> = progress.load("trip", "u1");
    assert!(matches!(result, Err(StorageError::Serialization(_))));
}

#[test]
fn remove_all_for_owner_leaves_others() {
    let kv = Arc::new(MemoryKvStore::new());
    let progress = ProgressStore::new(kv.clone());
    progress.save("trip", "u1", &Doc { processed: 1 }).unwrap();
    progress.save("fish_catch", "u1", &Doc { processed: 2 }).unwrap();
    progress.save("trip", "u11", &Doc { processed: 9 }).unwrap();

    assert_eq!(progress.remove_all_for("u1").unwrap(), 2);
    assert_eq!(kv.keys().unwrap(), vec!["catchlog.migration.trip.u11".to_string()]);
}

#[test]
fn remove_all_for_matches_the_owner_segment_exactly() {
    let kv = Arc::new(MemoryKvStore::new());
    let progress = ProgressStore::new(kv.clone());
    progress.save("trip", "u1", &Doc { processed: 1 }).unwrap();
    progress.save("trip", "team.u1", &Doc { processed: 2 }).unwrap();

    assert_eq!(ProgressStore::owner_of("catchlog.migration.trip.team.u1"), Some("team.u1"));
    assert_eq!(progress.remove_all_for("u1").unwrap(), 1);
    let left: Option<Doc> = progress.load("trip", "team.u1").unwrap();
    assert_eq!(left, Some(Doc { processed: 2 }));

    assert_eq!(progress.remove_all_for("team.u1").unwrap(), 1);
    assert!(kv.is_empty());
}

#[test]
fn key_flag_never_holds_key_bytes() {
    let kv = Arc::new(MemoryKvStore::new());
    let flags = KeyFlagStore::new(kv.clone());
    assert!(!flags.has("u1").unwrap());
    flags.set("u1").unwrap();
    assert!(flags.has("u1").unwrap());
    assert_eq!(kv.get("catchlog.keyflag.u1").unwrap().as_deref(), Some("1"));
    assert!(flags.clear("u1").unwrap());
    assert!(!flags.has("u1").unwrap());
}
