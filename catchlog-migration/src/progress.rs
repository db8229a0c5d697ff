//! Migration progress document.

use catchlog_types::CandidateId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    #[default]
    NotStarted,
    Running,
    Paused,
    Completed,
    Failed,
}

impl MigrationStatus {
    /// A run left off in this state continues where it stopped.
    pub fn is_resumable(&self) -> bool {
        matches!(self, MigrationStatus::Running | MigrationStatus::Paused)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, MigrationStatus::Completed | MigrationStatus::Failed)
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationStatus::NotStarted => write!(f, "not_started"),
            MigrationStatus::Running => write!(f, "running"),
            MigrationStatus::Paused => write!(f, "paused"),
            MigrationStatus::Completed => write!(f, "completed"),
            MigrationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One record's result within a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Succeeded,
    Failed(String),
    /// Not started because a pause or cancel was requested.
    Skipped,
}

/// Persisted progress for one `(scope, owner)`.
///
/// `processed_items` always equals `|succeeded_ids| + |failed_ids|` and the
/// two sets are disjoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationProgress {
    pub status: MigrationStatus,
    pub owner_id: Option<String>,
    pub total_items: usize,
    pub processed_items: usize,
    pub succeeded_ids: BTreeSet<CandidateId>,
    pub failed_ids: BTreeSet<CandidateId>,
    /// Last error message per failed id.
    #[serde(default)]
    pub errors: BTreeMap<CandidateId, String>,
    pub last_updated: DateTime<Utc>,
}

impl Default for MigrationProgress {
    fn default() -> Self {
        Self {
            status: MigrationStatus::NotStarted,
            owner_id: None,
            total_items: 0,
            processed_items: 0,
            succeeded_ids: BTreeSet::new(),
            failed_ids: BTreeSet::new(),
            errors: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }
}

impl MigrationProgress {
    pub fn fresh(owner_id: &str, total_items: usize) -> Self {
        Self {
            status: MigrationStatus::Running,
            owner_id: Some(owner_id.to_string()),
            total_items,
            ..Self::default()
        }
    }

    /// Whether `id` already has an outcome.
    pub fn is_settled(&self, id: &CandidateId) -> bool {
        self.succeeded_ids.contains(id) || self.failed_ids.contains(id)
    }

    /// Applies one outcome. A previously failed id that now succeeds moves
    /// sets without changing `processed_items`.
    pub fn record(&mut self, id: &CandidateId, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Succeeded => {
                self.errors.remove(id);
                if self.failed_ids.remove(id) {
                    self.succeeded_ids.insert(id.clone());
                } else if self.succeeded_ids.insert(id.clone()) {
                    self.processed_items += 1;
                }
            }
            ItemOutcome::Failed(reason) => {
                self.errors.insert(id.clone(), reason.clone());
                if !self.succeeded_ids.contains(id) && self.failed_ids.insert(id.clone()) {
                    self.processed_items += 1;
                }
            }
            ItemOutcome::Skipped => return,
        }
        self.last_updated = Utc::now();
    }

    pub fn is_consistent(&self) -> bool {
        self.processed_items == self.succeeded_ids.len() + self.failed_ids.len()
            && self.succeeded_ids.is_disjoint(&self.failed_ids)
    }

    /// Completion ratio in `[0.0, 1.0]`.
    pub fn fraction(&self) -> f64 {
        if self.total_items == 0 {
            1.0
        } else {
            (self.processed_items as f64 / self.total_items as f64).min(1.0)
        }
    }

    pub fn touch(&mut self, status: MigrationStatus) {
        self.status = status;
        self.last_updated = Utc::now();
    }
}
