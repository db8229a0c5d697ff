//! In-memory cache of decrypted records.

use crate::layer::{LayerEntry, LayerKind, LayerResult, PersistenceLayer};
use async_trait::async_trait;
use catchlog_types::{Record, RecordType};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Decrypted records keyed by `cache:<owner>/<type>/<id>`.
#[derive(Clone, Default)]
pub struct RecordCache {
    entries: Arc<RwLock<BTreeMap<String, Record>>>,
}

impl RecordCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn cache_key(owner_id: &str, record_type: RecordType, id: &str) -> String {
        format!("cache:{owner_id}/{record_type}/{id}")
    }

    pub async fn insert(&self, record: Record) {
        let key = Self::cache_key(&record.owner_id, record.record_type, &record.id);
        self.entries.write().await.insert(key, record);
    }

    pub async fn get(&self, owner_id: &str, record_type: RecordType, id: &str) -> Option<Record> {
        self.entries
            .read()
            .await
            .get(&Self::cache_key(owner_id, record_type, id))
            .cloned()
    }

    pub async fn remove(&self, owner_id: &str, record_type: RecordType, id: &str) -> Option<Record> {
        self.entries
            .write()
            .await
            .remove(&Self::cache_key(owner_id, record_type, id))
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl PersistenceLayer for RecordCache {
    fn kind(&self) -> LayerKind {
        LayerKind::Cache
    }

    async fn snapshot(&self) -> LayerResult<Vec<LayerEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .map(|(key, record)| LayerEntry::owned_by(key.clone(), record.owner_id.clone()))
            .collect())
    }

    async fn purge(&self, keys: &[String]) -> LayerResult<usize> {
        let mut entries = self.entries.write().await;
        Ok(keys.iter().filter(|k| entries.remove(*k).is_some()).count())
    }
}
