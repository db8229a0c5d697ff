use crate::layer::{LayerEntry, LayerKind, LayerResult, PersistenceLayer};
use async_trait::async_trait;
use catchlog_crypto::KeyDeriver;
use std::sync::Arc;

const KEY_PREFIX: &str = "derived_key:";

/// Reports the in-memory derived key as an artifact owned by its identity.
pub struct KeyMaterialLayer {
    keys: Arc<KeyDeriver>,
}

impl KeyMaterialLayer {
    pub fn new(keys: Arc<KeyDeriver>) -> Self {
        Self { keys }
    }
}

#[async_trait]
impl PersistenceLayer for KeyMaterialLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::KeyMaterial
    }

    async fn snapshot(&self) -> LayerResult<Vec<LayerEntry>> {
        Ok(self
            .keys
            .bound_identity()
            .map(|id| vec![LayerEntry::owned_by(format!("{KEY_PREFIX}{id}"), id)])
            .unwrap_or_default())
    }

    async fn purge(&self, keys: &[String]) -> LayerResult<usize> {
        let Some(bound) = self.keys.bound_identity() else {
            return Ok(0);
        };
        let held = format!("{KEY_PREFIX}{bound}");
        if keys.iter().any(|k| *k == held) {
            self.keys.clear();
            Ok(1)
        } else {
            Ok(0)
        }
    }
}
