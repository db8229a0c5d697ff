//! Shared fixtures for migration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use catchlog_crypto::{KdfParams, KeyDeriver, Salt};
use catchlog_migration::{MigrationConfig, MigrationEngine, MigrationProgress, RetryPolicy};
use catchlog_session::Session;
use catchlog_storage::{
    KeyValueStore, MemoryKvStore, MemoryRecordStore, RecordStore, StorageError, StorageResult,
    PROGRESS_PREFIX,
};
use catchlog_types::{Identity, Photo, Record, RecordType};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

pub const OWNER: &str = "u1";

pub fn salt() -> Salt {
    Salt::from_bytes(*b"catchlog-test-sa")
}

/// Record store wrapper with failure injection and an optional write gate.
pub struct FlakyStore {
    pub inner: MemoryRecordStore,
    fail_always: Mutex<HashSet<String>>,
    fail_times: Mutex<HashMap<String, u32>>,
    write_attempts: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryRecordStore::new(),
            fail_always: Mutex::new(HashSet::new()),
            fail_times: Mutex::new(HashMap::new()),
            write_attempts: AtomicUsize::new(0),
            gate: None,
        }
    }

    /// Every record write waits for a permit from `gate`.
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new()
        }
    }

    pub fn fail_always(&self, record_id: &str) {
        self.fail_always.lock().unwrap().insert(record_id.to_string());
    }

    pub fn heal(&self, record_id: &str) {
        self.fail_always.lock().unwrap().remove(record_id);
    }

    pub fn fail_times(&self, record_id: &str, times: u32) {
        self.fail_times
            .lock()
            .unwrap()
            .insert(record_id.to_string(), times);
    }

    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    pub async fn record(&self, record_type: RecordType, id: &str) -> Record {
        self.inner.read_one(record_type, id).await.unwrap().unwrap()
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn read_all(&self, record_type: RecordType, owner_id: &str) -> StorageResult<Vec<Record>> {
        self.inner.read_all(record_type, owner_id).await
    }

    async fn read_one(&self, record_type: RecordType, id: &str) -> StorageResult<Option<Record>> {
        self.inner.read_one(record_type, id).await
    }

    async fn write(&self, record: &Record) -> StorageResult<String> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.fail_always.lock().unwrap().contains(&record.id) {
            return Err(StorageError::Store(format!("backend rejected {}", record.id)));
        }
        {
            let mut transient = self.fail_times.lock().unwrap();
            if let Some(left) = transient.get_mut(&record.id)
                && *left > 0
            {
                *left -= 1;
                return Err(StorageError::Store("temporarily unavailable".into()));
            }
        }
        self.inner.write(record).await
    }

    async fn read_photo(&self, path: &str) -> StorageResult<(Vec<u8>, String)> {
        self.inner.read_photo(path).await
    }

    async fn write_photo(&self, path: &str, bytes: &[u8], content_type: &str) -> StorageResult<String> {
        self.inner.write_photo(path, bytes, content_type).await
    }

    fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }
}

/// Key-value store that keeps every progress document ever written.
pub struct RecordingKv {
    pub inner: MemoryKvStore,
    pub history: Mutex<Vec<MigrationProgress>>,
}

impl RecordingKv {
    pub fn new() -> Self {
        Self {
            inner: MemoryKvStore::new(),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn history(&self) -> Vec<MigrationProgress> {
        self.history.lock().unwrap().clone()
    }
}

impl KeyValueStore for RecordingKv {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        if key.starts_with(PROGRESS_PREFIX) {
            self.history
                .lock()
                .unwrap()
                .push(serde_json::from_str(value).unwrap());
        }
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        self.inner.remove(key)
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        self.inner.keys()
    }
}

pub struct Harness {
    pub store: Arc<FlakyStore>,
    pub kv: Arc<RecordingKv>,
    pub session: Arc<Session>,
    pub engine: MigrationEngine,
}

pub fn fast_config() -> MigrationConfig {
    MigrationConfig {
        batch_size: 2,
        max_concurrency: 2,
        batch_delay_ms: 0,
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
        },
    }
}

pub fn signed_in_session() -> Arc<Session> {
    let keys = Arc::new(KeyDeriver::new(KdfParams::fast()));
    let session = Arc::new(Session::new(keys.clone()));
    let identity = Identity::authenticated(OWNER);
    session.open(identity.clone());
    keys.derive_key(&identity, Some("hint"), &salt()).unwrap();
    session
}

pub fn harness_with(store: FlakyStore, config: MigrationConfig) -> Harness {
    let store = Arc::new(store);
    let kv = Arc::new(RecordingKv::new());
    let session = signed_in_session();
    let engine = MigrationEngine::new(store.clone(), session.clone(), kv.clone(), config);
    Harness {
        store,
        kv,
        session,
        engine,
    }
}

pub fn harness() -> Harness {
    harness_with(FlakyStore::new(), fast_config())
}

pub fn plaintext_catch(id: &str) -> Record {
    Record::new(RecordType::FishCatch, id, OWNER)
        .with_field("species", "kahawai")
        .with_field("notes", format!("caught {id} off the rocks"))
        .with_field("bait", "pilchard")
        .with_photo(Photo::inline(format!("{id}-photo"), "image/jpeg", vec![0xFF, 0xD8, 1, 2, 3]))
}

pub fn plaintext_trip(id: &str) -> Record {
    Record::new(RecordType::Trip, id, OWNER)
        .with_field("notes", "north-easterly, clear water")
        .with_field("location", "Mokohinau")
}

/// Waits until `condition` holds, yielding to the runtime in between.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..2_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}
