//! Record store abstraction over the cloud document collections.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use catchlog_types::{Record, RecordType};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

/// Document storage for records and photo blobs.
///
/// Implementations must reject a write that would change an existing
/// record's owner.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// All records of `record_type` owned by `owner_id`, ordered by id.
    async fn read_all(&self, record_type: RecordType, owner_id: &str) -> StorageResult<Vec<Record>>;

    async fn read_one(&self, record_type: RecordType, id: &str) -> StorageResult<Option<Record>>;

    /// Upserts `record` and returns its id.
    async fn write(&self, record: &Record) -> StorageResult<String>;

    /// Returns `(bytes, content_type)`.
    async fn read_photo(&self, path: &str) -> StorageResult<(Vec<u8>, String)>;

    /// Stores a blob and returns the path it was written to.
    async fn write_photo(&self, path: &str, bytes: &[u8], content_type: &str) -> StorageResult<String>;

    fn is_ready(&self) -> bool {
        true
    }
}

type Collections = HashMap<RecordType, BTreeMap<String, Record>>;

/// In-memory record store used as the local fallback and in tests.
pub struct MemoryRecordStore {
    records: RwLock<Collections>,
    photos: RwLock<HashMap<String, (Vec<u8>, String)>>,
    ready: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            photos: RwLock::new(HashMap::new()),
            ready: AtomicBool::new(true),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Inserts records directly, bypassing the owner check.
    pub async fn seed(&self, records: impl IntoIterator<Item = Record>) {
        let mut collections = self.records.write().await;
        for record in records {
            collections
                .entry(record.record_type)
                .or_default()
                .insert(record.id.clone(), record);
        }
    }

    /// Number of stored records across all collections.
    pub async fn len(&self) -> usize {
        self.records.read().await.values().map(BTreeMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn photo_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.photos.read().await.keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn read_all(&self, record_type: RecordType, owner_id: &str) -> StorageResult<Vec<Record>> {
        let collections = self.records.read().await;
        Ok(collections
            .get(&record_type)
            .map(|c| {
                c.values()
                    .filter(|r| r.owner_id == owner_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn read_one(&self, record_type: RecordType, id: &str) -> StorageResult<Option<Record>> {
        let collections = self.records.read().await;
        Ok(collections.get(&record_type).and_then(|c| c.get(id)).cloned())
    }

    async fn write(&self, record: &Record) -> StorageResult<String> {
        let mut collections = self.records.write().await;
        let collection = collections.entry(record.record_type).or_default();
        if let Some(existing) = collection.get(&record.id)
            && existing.owner_id != record.owner_id
        {
            return Err(StorageError::OwnerChanged {
                record_id: record.id.clone(),
                existing: existing.owner_id.clone(),
                claimed: record.owner_id.clone(),
            });
        }
        collection.insert(record.id.clone(), record.clone());
        debug!("Wrote {} {}", record.record_type, record.id);
        Ok(record.id.clone())
    }

    async fn read_photo(&self, path: &str) -> StorageResult<(Vec<u8>, String)> {
        self.photos
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn write_photo(&self, path: &str, bytes: &[u8], content_type: &str) -> StorageResult<String> {
        self.photos
            .write()
            .await
            .insert(path.to_string(), (bytes.to_vec(), content_type.to_string()));
        Ok(path.to_string())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}
