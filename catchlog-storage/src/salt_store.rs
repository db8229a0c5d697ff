use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use catchlog_crypto::Salt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::info;

/// Server-held KDF salts, one per account.
#[async_trait]
pub trait SaltStore: Send + Sync {
    /// Returns the account's salt, creating it on first use.
    async fn fetch_or_create(&self, identity_id: &str) -> StorageResult<Salt>;
}

pub struct MemorySaltStore {
    salts: Mutex<HashMap<String, Salt>>,
    online: AtomicBool,
}

impl MemorySaltStore {
    pub fn new() -> Self {
        Self {
            salts: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
        }
    }

    /// Simulates losing connectivity to the salt service.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Default for MemorySaltStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SaltStore for MemorySaltStore {
    async fn fetch_or_create(&self, identity_id: &str) -> StorageResult<Salt> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(StorageError::Store("salt service unreachable".to_string()));
        }
        let mut salts = self.salts.lock().await;
        let salt = *salts.entry(identity_id.to_string()).or_insert_with(|| {
            info!("Created KDF salt for {}", identity_id);
            Salt::random()
        });
        Ok(salt)
    }
}
