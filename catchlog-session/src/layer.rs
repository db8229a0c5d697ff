//! The persistence layer abstraction swept by the session guard.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::risk::Risk;

/// Kinds of storage that can hold identity-scoped state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    LocalStorage,
    KeyMaterial,
    Cache,
    PendingWrites,
    InFlight,
    Navigation,
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerKind::LocalStorage => write!(f, "local_storage"),
            LayerKind::KeyMaterial => write!(f, "key_material"),
            LayerKind::Cache => write!(f, "cache"),
            LayerKind::PendingWrites => write!(f, "pending_writes"),
            LayerKind::InFlight => write!(f, "in_flight"),
            LayerKind::Navigation => write!(f, "navigation"),
        }
    }
}

/// One entry as reported by a layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerEntry {
    pub key: String,
    /// Owner known to the layer itself, if any.
    pub owner_hint: Option<String>,
}

impl LayerEntry {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            owner_hint: None,
        }
    }

    pub fn owned_by(key: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            owner_hint: Some(owner_id.into()),
        }
    }
}

/// A classified entry. Transient bookkeeping, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistenceArtifact {
    pub layer: LayerKind,
    pub key: String,
    pub owner_id: Option<String>,
    pub risk: Risk,
    pub timestamp: DateTime<Utc>,
}

pub type LayerResult<T> = Result<T, String>;

/// Storage that must be introspectable and purgeable on identity change.
#[async_trait]
pub trait PersistenceLayer: Send + Sync {
    fn kind(&self) -> LayerKind;

    /// False when the layer is disabled or absent on this device.
    fn is_available(&self) -> bool {
        true
    }

    /// Everything the layer currently holds.
    async fn snapshot(&self) -> LayerResult<Vec<LayerEntry>>;

    /// Removes the given keys. Returns how many were removed.
    async fn purge(&self, keys: &[String]) -> LayerResult<usize>;
}
