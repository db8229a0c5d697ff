use crate::error::{StorageError, StorageResult};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

/// Device-local string key-value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Removes `key`. Returns whether it existed.
    fn remove(&self, key: &str) -> StorageResult<bool>;

    /// All keys, sorted.
    fn keys(&self) -> StorageResult<Vec<String>>;

    /// False when storage is disabled on this device.
    fn is_available(&self) -> bool {
        true
    }
}

/// In-memory key-value store. Can be switched off to model a device with
/// storage disabled.
pub struct MemoryKvStore {
    entries: RwLock<BTreeMap<String, String>>,
    available: AtomicBool,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// A store whose every call fails with [`StorageError::Unavailable`].
    pub fn disabled() -> Self {
        let store = Self::new();
        store.set_available(false);
        store
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> StorageResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StorageError::Unavailable("local storage disabled".to_string()))
        }
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryKvStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.check()?;
        Ok(self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.check()?;
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        self.check()?;
        Ok(self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        self.check()?;
        Ok(self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect())
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}
