//! Migration engine configuration.

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Records per batch. Progress is persisted after every batch.
    pub batch_size: usize,

    /// Records processed concurrently within a batch.
    pub max_concurrency: usize,

    /// Pause between batches (milliseconds).
    pub batch_delay_ms: u64,

    pub retry: RetryPolicy,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_concurrency: 4,
            batch_delay_ms: 0,
            retry: RetryPolicy::default(),
        }
    }
}

impl MigrationConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}
