use crate::layer::{LayerEntry, LayerKind, LayerResult, PersistenceLayer};
use async_trait::async_trait;
use catchlog_storage::KeyValueStore;
use std::sync::Arc;

/// Exposes the device-local key-value store to the guard.
///
/// Entries carry no owner hint; owners are inferred from the keys.
pub struct KvLayer {
    kv: Arc<dyn KeyValueStore>,
}

impl KvLayer {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }
}

#[async_trait]
impl PersistenceLayer for KvLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::LocalStorage
    }

    fn is_available(&self) -> bool {
        self.kv.is_available()
    }

    async fn snapshot(&self) -> LayerResult<Vec<LayerEntry>> {
        let keys = self.kv.keys().map_err(|e| e.to_string())?;
        Ok(keys.into_iter().map(LayerEntry::new).collect())
    }

    async fn purge(&self, keys: &[String]) -> LayerResult<usize> {
        // Attempt every key, then report the first failure.
        let mut removed = 0;
        let mut first_error = None;
        for key in keys {
            match self.kv.remove(key) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    first_error.get_or_insert_with(|| format!("{key}: {e}"));
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }
}
