//! Bookkeeping documents kept in the local key-value layer.

use crate::error::StorageResult;
use crate::kv::KeyValueStore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

pub const PROGRESS_PREFIX: &str = "catchlog.migration.";
pub const KEY_FLAG_PREFIX: &str = "catchlog.keyflag.";

/// Migration progress documents, one per `(scope, owner)`.
#[derive(Clone)]
pub struct ProgressStore {
    kv: Arc<dyn KeyValueStore>,
}

impl ProgressStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub fn key(scope: &str, owner_id: &str) -> String {
        format!("{PROGRESS_PREFIX}{scope}.{owner_id}")
    }

    pub fn load<T: DeserializeOwned>(&self, scope: &str, owner_id: &str) -> StorageResult<Option<T>> {
        match self.kv.get(&Self::key(scope, owner_id))? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn save<T: Serialize>(&self, scope: &str, owner_id: &str, progress: &T) -> StorageResult<()> {
        let raw = serde_json::to_string(progress)?;
        self.kv.set(&Self::key(scope, owner_id), &raw)
    }

    pub fn remove(&self, scope: &str, owner_id: &str) -> StorageResult<bool> {
        self.kv.remove(&Self::key(scope, owner_id))
    }

    /// Removes every progress document belonging to `owner_id`.
    pub fn remove_all_for(&self, owner_id: &str) -> StorageResult<usize> {
        let mut removed = 0;
        for key in self.kv.keys()? {
            if Self::owner_of(&key) == Some(owner_id) && self.kv.remove(&key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Owner segment of a progress key. Scopes never contain `.`, so
    /// everything after the first dot past the prefix is the owner id.
    pub fn owner_of(key: &str) -> Option<&str> {
        let (_scope, owner) = key.strip_prefix(PROGRESS_PREFIX)?.split_once('.')?;
        (!owner.is_empty()).then_some(owner)
    }
}

/// "A key was derived for this owner on this device before."
///
/// Never holds key bytes.
#[derive(Clone)]
pub struct KeyFlagStore {
    kv: Arc<dyn KeyValueStore>,
}

impl KeyFlagStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub fn key(owner_id: &str) -> String {
        format!("{KEY_FLAG_PREFIX}{owner_id}")
    }

    pub fn set(&self, owner_id: &str) -> StorageResult<()> {
        self.kv.set(&Self::key(owner_id), "1")
    }

    pub fn has(&self, owner_id: &str) -> StorageResult<bool> {
        Ok(self.kv.get(&Self::key(owner_id))?.is_some())
    }

    pub fn clear(&self, owner_id: &str) -> StorageResult<bool> {
        self.kv.remove(&Self::key(owner_id))
    }
}
