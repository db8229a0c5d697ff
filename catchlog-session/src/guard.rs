//! Session isolation guard.
//!
//! Two duties:
//!
//! 1. **Ownership validation.** Every storage operation passes through
//!    [`SessionGuard::validate_write`] (or [`SessionGuard::validate_guest_write`]
//!    for guest sessions). Writes without an authenticated identity, or whose
//!    declared owner is someone else, are rejected.
//! 2. **Exhaustive teardown.** [`SessionGuard::end_session`] sweeps every
//!    registered [`PersistenceLayer`], revokes the key, re-snapshots and
//!    reports anything still reachable that belongs to someone other than the
//!    incoming identity.

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::layer::{LayerEntry, LayerKind, PersistenceArtifact, PersistenceLayer};
use crate::operation::OperationKind;
use crate::risk::{Risk, RiskTable};
use crate::session::Session;
use catchlog_storage::{KEY_FLAG_PREFIX, PROGRESS_PREFIX};
use catchlog_types::Identity;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

const OWNER_FIELDS: [&str; 2] = ["ownerId", "owner_id"];
const GUEST_FIELD: &str = "guestSessionId";

/// Per-layer result of a sweep.
#[derive(Debug, Clone, Serialize)]
pub struct LayerOutcome {
    pub layer: LayerKind,
    pub removed: usize,
    pub error: Option<String>,
}

/// Result of [`SessionGuard::end_session`] or [`SessionGuard::hard_reset`].
#[derive(Debug, Clone, Serialize)]
pub struct TeardownReport {
    /// True only when no disallowed artifact survived.
    pub success: bool,
    pub previous_identity: Option<String>,
    pub new_identity: Option<String>,
    pub layers: Vec<LayerOutcome>,
    /// Layers that were unavailable and therefore not swept.
    pub skipped_layers: Vec<LayerKind>,
    pub failures: Vec<String>,
    /// Artifacts that appeared between `start_session` and teardown.
    pub created_during_session: Vec<PersistenceArtifact>,
    /// Surviving artifacts owned by someone other than the new identity.
    pub leaked: Vec<PersistenceArtifact>,
    /// Surviving artifacts that are allowed to stay.
    pub retained: Vec<PersistenceArtifact>,
    /// Highest risk among leaked artifacts.
    pub residual_risk: Option<Risk>,
    pub timed_out: bool,
    pub elapsed_ms: u64,
}

impl TeardownReport {
    fn new(previous: Option<&Identity>, new: Option<&Identity>) -> Self {
        Self {
            success: false,
            previous_identity: previous.map(|i| i.id().to_string()),
            new_identity: new.map(|i| i.id().to_string()),
            layers: Vec::new(),
            skipped_layers: Vec::new(),
            failures: Vec::new(),
            created_during_session: Vec::new(),
            leaked: Vec::new(),
            retained: Vec::new(),
            residual_risk: None,
            timed_out: false,
            elapsed_ms: 0,
        }
    }

    /// True when the caller should escalate to a hard reset.
    pub fn needs_hard_reset(&self) -> bool {
        !self.success
    }
}

type ArtifactKey = (LayerKind, String);

/// Guards storage access and session transitions.
pub struct SessionGuard {
    session: Arc<Session>,
    layers: Vec<Arc<dyn PersistenceLayer>>,
    risk: RiskTable,
    config: SessionConfig,
    known_identities: RwLock<BTreeSet<String>>,
    baseline: Mutex<Option<HashSet<ArtifactKey>>>,
}

impl SessionGuard {
    pub fn new(session: Arc<Session>, config: SessionConfig) -> Self {
        Self {
            session,
            layers: Vec::new(),
            risk: RiskTable::default(),
            config,
            known_identities: RwLock::new(BTreeSet::new()),
            baseline: Mutex::new(None),
        }
    }

    pub fn with_layer(mut self, layer: Arc<dyn PersistenceLayer>) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn with_risk_table(mut self, risk: RiskTable) -> Self {
        self.risk = risk;
        self
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn risk_table(&self) -> &RiskTable {
        &self.risk
    }

    /// Registers an identity id so its appearance inside keys can be recognized.
    pub fn remember_identity(&self, identity_id: &str) {
        self.known_identities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity_id.to_string());
    }

    // ── Ownership validation ────────────────────────────────────────

    /// Checks `operation` against the authenticated identity.
    ///
    /// Reads always pass. Writes need an authenticated identity; a declared
    /// owner must match it, and a missing owner is stamped (or rejected when
    /// `reject_missing_owner` is set).
    pub fn validate_write(
        &self,
        active_identity_id: Option<&str>,
        operation: &str,
        payload: &mut Value,
    ) -> SessionResult<OperationKind> {
        let kind = OperationKind::classify(operation);
        if kind.is_read() {
            return Ok(kind);
        }

        let Some(active) = active_identity_id else {
            return Err(self.violation(SessionError::UnauthenticatedWrite {
                operation: operation.to_string(),
            }));
        };

        let Some(obj) = payload.as_object_mut() else {
            return Err(self.violation(SessionError::MissingOwner {
                operation: operation.to_string(),
            }));
        };

        let mut declared = false;
        for field in OWNER_FIELDS {
            match obj.get(field) {
                None | Some(Value::Null) => {}
                Some(Value::String(claimed)) if claimed == active => declared = true,
                Some(other) => {
                    let claimed = other.as_str().map(String::from).unwrap_or_else(|| other.to_string());
                    return Err(self.violation(SessionError::OwnershipMismatch {
                        operation: operation.to_string(),
                        active: active.to_string(),
                        claimed,
                    }));
                }
            }
        }

        if !declared {
            if self.config.reject_missing_owner {
                return Err(self.violation(SessionError::MissingOwner {
                    operation: operation.to_string(),
                }));
            }
            debug!("Stamping owner {} on '{}'", active, operation);
            obj.insert(OWNER_FIELDS[0].to_string(), Value::String(active.to_string()));
        }
        Ok(kind)
    }

    /// Guest variant of [`validate_write`](Self::validate_write): the payload is
    /// tagged with the guest session id and may not claim an account owner.
    pub fn validate_guest_write(
        &self,
        guest: &Identity,
        operation: &str,
        payload: &mut Value,
    ) -> SessionResult<OperationKind> {
        let kind = OperationKind::classify(operation);
        if kind.is_read() {
            return Ok(kind);
        }
        if !guest.is_guest() {
            return Err(self.violation(SessionError::GuestWriteRejected(format!(
                "'{operation}' routed as guest write for {guest}"
            ))));
        }
        let Some(obj) = payload.as_object_mut() else {
            return Err(self.violation(SessionError::GuestWriteRejected(format!(
                "'{operation}' payload is not an object"
            ))));
        };
        if OWNER_FIELDS.iter().any(|f| obj.get(*f).is_some_and(|v| !v.is_null())) {
            return Err(self.violation(SessionError::GuestWriteRejected(format!(
                "'{operation}' declares an account owner"
            ))));
        }
        if let Some(existing) = obj.get(GUEST_FIELD).and_then(Value::as_str)
            && existing != guest.id()
        {
            return Err(self.violation(SessionError::GuestWriteRejected(format!(
                "'{operation}' belongs to another guest session"
            ))));
        }
        obj.insert(GUEST_FIELD.to_string(), Value::String(guest.id().to_string()));
        Ok(kind)
    }

    /// Validates against whatever identity the session currently holds.
    pub fn check(&self, operation: &str, payload: &mut Value) -> SessionResult<OperationKind> {
        match self.session.active() {
            Some(identity) if identity.is_guest() => {
                self.validate_guest_write(&identity, operation, payload)
            }
            Some(identity) => self.validate_write(Some(identity.id()), operation, payload),
            None => self.validate_write(None, operation, payload),
        }
    }

    fn violation(&self, err: SessionError) -> SessionError {
        warn!(target: "catchlog::security", "Rejected storage operation: {}", err);
        err
    }

    // ── Session lifecycle ───────────────────────────────────────────

    /// Opens `identity` and records the baseline snapshot of every layer.
    pub async fn start_session(&self, identity: Identity) -> usize {
        self.remember_identity(identity.id());
        self.session.open(identity);
        let (artifacts, _, _) = self.snapshot_all().await;
        let baseline: HashSet<ArtifactKey> = artifacts
            .iter()
            .map(|a| (a.layer, a.key.clone()))
            .collect();
        let count = baseline.len();
        *self.baseline.lock().await = Some(baseline);
        debug!("Session baseline holds {} artifacts", count);
        count
    }

    /// Tears down the active session and opens `new_identity`.
    ///
    /// Every layer is attempted even when another fails. The whole sweep is
    /// bounded by the configured teardown timeout.
    pub async fn end_session(&self, new_identity: Identity) -> TeardownReport {
        let started = Instant::now();
        self.remember_identity(new_identity.id());
        let previous = self.session.active();
        let mut report = TeardownReport::new(previous.as_ref(), Some(&new_identity));

        let swept = tokio::time::timeout(
            self.config.teardown_timeout(),
            self.sweep(Some(&new_identity), false, &mut report),
        )
        .await;

        // Key revocation does not depend on the sweep finishing.
        self.session.close();
        self.session.open(new_identity.clone());

        if swept.is_err() {
            self.mark_timed_out(&mut report);
        } else {
            self.verify(Some(&new_identity), false, &mut report).await;
        }
        self.baseline.lock().await.take();
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        self.log_report(&report);
        report
    }

    /// Clears every layer unconditionally, including retained metadata, and
    /// leaves no identity active.
    pub async fn hard_reset(&self) -> TeardownReport {
        let started = Instant::now();
        let previous = self.session.active();
        let mut report = TeardownReport::new(previous.as_ref(), None);

        let swept = tokio::time::timeout(
            self.config.teardown_timeout(),
            self.sweep(None, true, &mut report),
        )
        .await;
        self.session.close();

        if swept.is_err() {
            self.mark_timed_out(&mut report);
        } else {
            self.verify(None, true, &mut report).await;
        }
        self.baseline.lock().await.take();
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        warn!(target: "catchlog::security", "Hard reset performed (success: {})", report.success);
        report
    }

    /// Current classified artifacts across all available layers.
    pub async fn artifacts(&self) -> Vec<PersistenceArtifact> {
        self.snapshot_all().await.0
    }

    async fn sweep(&self, successor: Option<&Identity>, purge_everything: bool, report: &mut TeardownReport) {
        let baseline = self.baseline.lock().await.clone();
        for layer in &self.layers {
            let kind = layer.kind();
            if !layer.is_available() {
                debug!("Skipping unavailable {} layer", kind);
                report.skipped_layers.push(kind);
                continue;
            }
            let entries = match layer.snapshot().await {
                Ok(entries) => entries,
                Err(e) => {
                    report.failures.push(format!("{kind}: snapshot failed: {e}"));
                    report.layers.push(LayerOutcome {
                        layer: kind,
                        removed: 0,
                        error: Some(e),
                    });
                    continue;
                }
            };

            let mut doomed = Vec::new();
            for entry in &entries {
                let artifact = self.classify(kind, entry);
                if baseline
                    .as_ref()
                    .is_some_and(|b| !b.contains(&(kind, artifact.key.clone())))
                {
                    report.created_during_session.push(artifact.clone());
                }
                if purge_everything || !self.may_survive(&artifact, successor) {
                    doomed.push(entry.key.clone());
                }
            }

            let outcome = if doomed.is_empty() {
                LayerOutcome {
                    layer: kind,
                    removed: 0,
                    error: None,
                }
            } else {
                match layer.purge(&doomed).await {
                    Ok(removed) => LayerOutcome {
                        layer: kind,
                        removed,
                        error: None,
                    },
                    Err(e) => {
                        warn!("Sweep of {} layer failed: {}", kind, e);
                        report.failures.push(format!("{kind}: {e}"));
                        LayerOutcome {
                            layer: kind,
                            removed: 0,
                            error: Some(e),
                        }
                    }
                }
            };
            report.layers.push(outcome);
        }
    }

    async fn verify(&self, successor: Option<&Identity>, strict: bool, report: &mut TeardownReport) {
        let (survivors, unavailable, failures) = self.snapshot_all().await;
        report.failures.extend(failures);
        for kind in unavailable {
            if !report.skipped_layers.contains(&kind) {
                report.skipped_layers.push(kind);
            }
        }
        for artifact in survivors {
            let allowed = !strict && self.may_survive(&artifact, successor);
            if allowed {
                report.retained.push(artifact);
            } else {
                report.leaked.push(artifact);
            }
        }
        report.residual_risk = report.leaked.iter().map(|a| a.risk).max();
        report.success = report.leaked.is_empty() && !report.timed_out;
    }

    fn mark_timed_out(&self, report: &mut TeardownReport) {
        report.timed_out = true;
        report.success = false;
        report.residual_risk = Some(Risk::Critical);
        report.failures.push(format!(
            "teardown exceeded {}ms",
            self.config.teardown_timeout_ms
        ));
    }

    /// Snapshots every available layer. Returns artifacts, unavailable
    /// layer kinds and snapshot failures.
    async fn snapshot_all(&self) -> (Vec<PersistenceArtifact>, Vec<LayerKind>, Vec<String>) {
        let mut artifacts = Vec::new();
        let mut unavailable = Vec::new();
        let mut failures = Vec::new();
        for layer in &self.layers {
            let kind = layer.kind();
            if !layer.is_available() {
                unavailable.push(kind);
                continue;
            }
            match layer.snapshot().await {
                Ok(entries) => artifacts.extend(entries.iter().map(|e| self.classify(kind, e))),
                Err(e) => failures.push(format!("{kind}: snapshot failed: {e}")),
            }
        }
        (artifacts, unavailable, failures)
    }

    fn classify(&self, layer: LayerKind, entry: &LayerEntry) -> PersistenceArtifact {
        let owner_id = entry
            .owner_hint
            .clone()
            .or_else(|| self.infer_owner(&entry.key));
        let risk = match layer {
            LayerKind::KeyMaterial => Risk::Critical,
            _ => self.risk.classify(&entry.key),
        };
        PersistenceArtifact {
            layer,
            key: entry.key.clone(),
            owner_id,
            risk,
            timestamp: Utc::now(),
        }
    }

    /// Longest known identity id embedded in `key` at token boundaries.
    fn infer_owner(&self, key: &str) -> Option<String> {
        let known = self
            .known_identities
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        known
            .iter()
            .filter(|id| embeds_id(key, id))
            .max_by_key(|id| id.len())
            .cloned()
    }

    fn is_exempt(&self, artifact: &PersistenceArtifact) -> bool {
        self.config.retain_migration_metadata
            && artifact.layer == LayerKind::LocalStorage
            && (artifact.key.starts_with(PROGRESS_PREFIX) || artifact.key.starts_with(KEY_FLAG_PREFIX))
    }

    /// Data owned by the successor survives. Migration metadata of the
    /// previous owner survives only a switch to guest, so that owner can
    /// sign back in and resume; any other authenticated successor gets a
    /// clean slate.
    fn may_survive(&self, artifact: &PersistenceArtifact, successor: Option<&Identity>) -> bool {
        let Some(successor) = successor else {
            return false;
        };
        if artifact.owner_id.as_deref() == Some(successor.id()) {
            return true;
        }
        successor.is_guest() && self.is_exempt(artifact)
    }

    fn log_report(&self, report: &TeardownReport) {
        if report.success {
            info!(
                "Session teardown complete: {} -> {} ({} retained, {}ms)",
                report.previous_identity.as_deref().unwrap_or("none"),
                report.new_identity.as_deref().unwrap_or("none"),
                report.retained.len(),
                report.elapsed_ms
            );
        } else {
            for artifact in &report.leaked {
                error!(
                    target: "catchlog::security",
                    "Leakage path: {} '{}' (owner {:?}, risk {})",
                    artifact.layer, artifact.key, artifact.owner_id, artifact.risk
                );
            }
            error!(
                target: "catchlog::security",
                "Session teardown incomplete: {} leaked, residual risk {:?}, timed out {}",
                report.leaked.len(),
                report.residual_risk,
                report.timed_out
            );
        }
    }
}

fn embeds_id(key: &str, id: &str) -> bool {
    if id.is_empty() {
        return false;
    }
    key.match_indices(id).any(|(start, _)| {
        let before = key[..start].chars().next_back();
        let after = key[start + id.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}
