//! Session guard configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound for a full teardown sweep (milliseconds).
    pub teardown_timeout_ms: u64,

    /// Fail writes that carry no owner instead of stamping the active identity.
    pub reject_missing_owner: bool,

    /// Keep migration progress and key-existence flags across sign-out so the
    /// same account can resume on its next sign-in.
    pub retain_migration_metadata: bool,

    /// Query parameters that carry modal or navigation state.
    pub navigation_params: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            teardown_timeout_ms: 5_000,
            reject_missing_owner: false,
            retain_migration_metadata: true,
            navigation_params: ["modal", "trip", "catch", "photo", "weather", "edit", "owner"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl SessionConfig {
    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }
}
