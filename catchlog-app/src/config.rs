//! Application configuration.

use crate::error::{AppError, AppResult};
use catchlog_crypto::KdfParams;
use catchlog_migration::MigrationConfig;
use catchlog_session::SessionConfig;
use catchlog_storage::{DuckDbKvStore, KeyValueStore, MemoryKvStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Tunables for every CatchLog crate. Missing sections take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatchlogConfig {
    pub kdf: KdfParams,
    pub migration: MigrationConfig,
    pub session: SessionConfig,
    /// DuckDB file backing the local key-value layer. In-memory when unset.
    pub local_db_path: Option<PathBuf>,
}

impl CatchlogConfig {
    /// Reads a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("{}: {e}", path.display())))?;
        let config = Self::from_json(&json)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_json(json: &str) -> AppResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| AppError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AppResult<()> {
        if self.migration.batch_size == 0 {
            return Err(AppError::Config("migration.batch_size must be at least 1".into()));
        }
        if self.migration.max_concurrency == 0 {
            return Err(AppError::Config(
                "migration.max_concurrency must be at least 1".into(),
            ));
        }
        if self.kdf.iterations == 0 || self.kdf.parallelism == 0 {
            return Err(AppError::Config(
                "kdf.iterations and kdf.parallelism must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Opens the local key-value layer this config points at.
    pub fn open_kv_store(&self) -> AppResult<Arc<dyn KeyValueStore>> {
        match &self.local_db_path {
            Some(path) => Ok(Arc::new(DuckDbKvStore::open(path)?)),
            None => Ok(Arc::new(MemoryKvStore::new())),
        }
    }
}
