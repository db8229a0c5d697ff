//! Identity lifecycle driver.
//!
//! Owns the session context, the teardown guard and the migration engine, and
//! sequences them on every identity change: pause the migration, tear the
//! old identity down, derive the new key, announce the change, resume.
//!
//! `DataReady` is published for other subscribers only. The migration is
//! started here directly, after the announcement, in the same transition.

use crate::config::CatchlogConfig;
use crate::error::{AppError, AppResult};
use catchlog_crypto::KeyDeriver;
use catchlog_migration::{MigrationEngine, MigrationError, MigrationProgress, MigrationResult};
use catchlog_session::layers::{
    InFlightRegistry, KeyMaterialLayer, KvLayer, NavigationState, PendingWriteQueue, RecordCache,
};
use catchlog_session::{IdentityEvents, OperationKind, Session, SessionGuard, TeardownReport};
use catchlog_storage::{KeyFlagStore, KeyValueStore, RecordStore, SaltStore};
use catchlog_types::Identity;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type MigrationHandle = JoinHandle<MigrationResult<MigrationProgress>>;

/// Client-side state registered with the teardown guard.
#[derive(Clone)]
pub struct AppLayers {
    pub cache: RecordCache,
    pub pending: PendingWriteQueue,
    pub tasks: InFlightRegistry,
    pub navigation: NavigationState,
}

#[derive(Debug)]
pub struct SignInOutcome {
    pub identity: Identity,
    pub key_fingerprint: Option<String>,
    /// A key had been derived for this account on this device before.
    pub key_known_on_device: bool,
    /// Teardown of the identity that was active before, if any.
    pub teardown: Option<TeardownReport>,
    pub migration_started: bool,
}

#[derive(Debug)]
pub struct SignOutOutcome {
    pub identity: Identity,
    pub teardown: TeardownReport,
    /// Present when the regular teardown left something behind.
    pub hard_reset: Option<TeardownReport>,
}

impl SignOutOutcome {
    /// Whether the device ended up free of the previous identity's state.
    pub fn is_clean(&self) -> bool {
        match &self.hard_reset {
            Some(report) => report.success,
            None => self.teardown.success,
        }
    }
}

pub struct IdentityController {
    session: Arc<Session>,
    guard: Arc<SessionGuard>,
    engine: MigrationEngine,
    salts: Arc<dyn SaltStore>,
    key_flags: KeyFlagStore,
    events: IdentityEvents,
    layers: AppLayers,
    migration: Mutex<Option<MigrationHandle>>,
    watcher: JoinHandle<()>,
    /// Serializes identity transitions.
    transition: Mutex<()>,
}

impl IdentityController {
    /// Wires every component together. Must be called inside a tokio
    /// runtime: the migration engine's identity watcher is spawned here.
    pub fn new(
        config: &CatchlogConfig,
        store: Arc<dyn RecordStore>,
        salts: Arc<dyn SaltStore>,
        kv: Arc<dyn KeyValueStore>,
    ) -> Self {
        let keys = Arc::new(KeyDeriver::new(config.kdf.clone()));
        let session = Arc::new(Session::new(keys.clone()));
        let layers = AppLayers {
            cache: RecordCache::new(),
            pending: PendingWriteQueue::new(),
            tasks: InFlightRegistry::new(),
            navigation: NavigationState::new("/", config.session.navigation_params.clone()),
        };

        let guard = SessionGuard::new(session.clone(), config.session.clone())
            .with_layer(Arc::new(KvLayer::new(kv.clone())))
            .with_layer(Arc::new(KeyMaterialLayer::new(keys)))
            .with_layer(Arc::new(layers.cache.clone()))
            .with_layer(Arc::new(layers.pending.clone()))
            .with_layer(Arc::new(layers.tasks.clone()))
            .with_layer(Arc::new(layers.navigation.clone()));

        let engine = MigrationEngine::new(store, session.clone(), kv.clone(), config.migration.clone());
        let events = IdentityEvents::new();
        let watcher = engine.watch_identity(&events);

        Self {
            session,
            guard: Arc::new(guard),
            engine,
            salts,
            key_flags: KeyFlagStore::new(kv),
            events,
            layers,
            migration: Mutex::new(None),
            watcher,
            transition: Mutex::new(()),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn guard(&self) -> &Arc<SessionGuard> {
        &self.guard
    }

    pub fn engine(&self) -> &MigrationEngine {
        &self.engine
    }

    pub fn events(&self) -> &IdentityEvents {
        &self.events
    }

    pub fn layers(&self) -> &AppLayers {
        &self.layers
    }

    pub fn active(&self) -> Option<Identity> {
        self.session.active()
    }

    // ── Transitions ─────────────────────────────────────────────────

    /// Signs `account_id` in.
    ///
    /// Any other active identity is torn down first. When the previous
    /// identity was a different account its migration progress is dropped
    /// too. On key derivation failure the device falls back to a fresh guest
    /// session and the error is returned.
    pub async fn sign_in(&self, account_id: &str, secret_hint: &str) -> AppResult<SignInOutcome> {
        let _transition = self.transition.lock().await;
        let identity = Identity::authenticated(account_id);
        let previous = self.session.active();
        let key_known_on_device = self.key_known_on_device(&identity);

        let teardown = match &previous {
            Some(prev) if *prev == identity => None,
            Some(prev) => {
                self.stop_migration().await;
                let report = self.teardown_to(identity.clone()).await;
                if prev.is_authenticated() {
                    self.engine.clear_progress(prev.id())?;
                }
                Some(report)
            }
            None => None,
        };

        if let Err(err) = self.establish_key(&identity, secret_hint).await {
            warn!("Sign-in for {} failed: {}", account_id, err);
            let guest = Identity::guest();
            self.teardown_to(guest.clone()).await;
            self.guard.start_session(guest.clone()).await;
            self.events.identity_changed(previous, Some(guest.clone()));
            self.events.data_ready(&guest);
            return Err(err);
        }

        self.guard.start_session(identity.clone()).await;
        if let Err(e) = self.key_flags.set(identity.id()) {
            warn!("Could not record key flag for {}: {}", identity.id(), e);
        }

        if previous.as_ref() != Some(&identity) {
            self.events.identity_changed(previous, Some(identity.clone()));
        }
        self.events.data_ready(&identity);

        let migration_started = self.resume_migration().await;
        info!("Signed in as {}", identity.id());

        Ok(SignInOutcome {
            key_fingerprint: self.session.keys().fingerprint(),
            identity,
            key_known_on_device,
            teardown,
            migration_started,
        })
    }

    /// Ends the active session and continues as a fresh guest.
    ///
    /// Migration progress of the signed-out account is kept so a later
    /// sign-in resumes it.
    pub async fn sign_out(&self) -> AppResult<SignOutOutcome> {
        let _transition = self.transition.lock().await;
        self.sign_out_locked(false).await
    }

    /// Like [`sign_out`](Self::sign_out) but always ends with a hard reset.
    pub async fn force_sign_out(&self, reason: &AppError) -> AppResult<SignOutOutcome> {
        let _transition = self.transition.lock().await;
        warn!(target: "catchlog::security", "Forcing sign-out: {}", reason);
        self.sign_out_locked(true).await
    }

    /// Starts a guest session if no identity is active. An authenticated
    /// session is signed out first.
    pub async fn continue_as_guest(&self) -> AppResult<Identity> {
        match self.session.active() {
            Some(active) if active.is_guest() => Ok(active),
            Some(_) => Ok(self.sign_out().await?.identity),
            None => {
                let _transition = self.transition.lock().await;
                let guest = Identity::guest();
                self.guard.start_session(guest.clone()).await;
                self.events.identity_changed(None, Some(guest.clone()));
                self.events.data_ready(&guest);
                Ok(guest)
            }
        }
    }

    // ── Writes ──────────────────────────────────────────────────────

    /// Validates a storage operation for the active identity.
    ///
    /// A security violation signs the user out before the error is returned.
    pub async fn guarded_write(&self, operation: &str, payload: &mut Value) -> AppResult<OperationKind> {
        match self.guard.check(operation, payload) {
            Ok(kind) => Ok(kind),
            Err(e) => {
                let err = AppError::from(e);
                self.escalate(&err).await;
                Err(err)
            }
        }
    }

    /// Signs out when `err` is a security violation. Returns whether it did.
    pub async fn escalate(&self, err: &AppError) -> bool {
        if !err.is_security_violation() {
            return false;
        }
        if let Err(e) = self.force_sign_out(err).await {
            error!("Forced sign-out failed: {}", e);
        }
        true
    }

    // ── Migration ───────────────────────────────────────────────────

    /// Waits for the background migration started at sign-in, if any.
    pub async fn wait_for_migration(&self) -> AppResult<Option<MigrationProgress>> {
        let handle = self.migration.lock().await.take();
        match handle {
            Some(handle) => {
                let progress = handle.await.map_err(MigrationError::from)??;
                Ok(Some(progress))
            }
            None => Ok(None),
        }
    }

    async fn resume_migration(&self) -> bool {
        if self.engine.is_migration_running() {
            debug!("Migration already running, not starting another");
            return false;
        }
        match self.engine.start_background() {
            Ok(handle) => {
                *self.migration.lock().await = Some(handle);
                true
            }
            Err(e) => {
                warn!("Migration not started: {}", e);
                false
            }
        }
    }

    /// Pauses the running migration and waits until it has persisted its
    /// progress.
    async fn stop_migration(&self) {
        self.engine.pause();
        let handle = self.migration.lock().await.take();
        if let Some(handle) = handle {
            match handle.await {
                Ok(Ok(progress)) => debug!(
                    "Migration stopped at {} of {} ({})",
                    progress.processed_items, progress.total_items, progress.status
                ),
                Ok(Err(e)) => warn!("Migration ended with error: {}", e),
                Err(e) => warn!("Migration task failed: {}", e),
            }
        }
    }

    // ── Internals ───────────────────────────────────────────────────

    fn key_known_on_device(&self, identity: &Identity) -> bool {
        match self.key_flags.has(identity.id()) {
            Ok(true) => {
                debug!("Key for {} was derived on this device before", identity.id());
                true
            }
            Ok(false) => {
                info!("First key derivation for {} on this device", identity.id());
                false
            }
            Err(e) => {
                warn!("Could not read key flag for {}: {}", identity.id(), e);
                false
            }
        }
    }

    async fn establish_key(&self, identity: &Identity, secret_hint: &str) -> AppResult<()> {
        if self.session.is_ready_for(identity.id()) {
            return Ok(());
        }
        let salt = self.salts.fetch_or_create(identity.id()).await?;
        self.session.keys().derive_key(identity, Some(secret_hint), &salt)?;
        Ok(())
    }

    async fn teardown_to(&self, next: Identity) -> TeardownReport {
        let report = self.guard.end_session(next.clone()).await;
        if report.needs_hard_reset() {
            error!(
                "Teardown left {} artifacts behind (residual risk {:?})",
                report.leaked.len(),
                report.residual_risk
            );
        }
        report
    }

    async fn sign_out_locked(&self, force: bool) -> AppResult<SignOutOutcome> {
        let previous = self.session.active();
        self.stop_migration().await;

        let guest = Identity::guest();
        let teardown = self.teardown_to(guest.clone()).await;

        let hard_reset = if force || teardown.needs_hard_reset() {
            let report = self.guard.hard_reset().await;
            if !report.success {
                error!(target: "catchlog::security", "Hard reset left {} artifacts", report.leaked.len());
            }
            Some(report)
        } else {
            None
        };

        // Fresh baseline for the guest session.
        self.guard.start_session(guest.clone()).await;
        self.events.identity_changed(previous.clone(), Some(guest.clone()));
        self.events.data_ready(&guest);

        info!(
            "Signed out {}",
            previous.as_ref().map(Identity::id).unwrap_or("no identity")
        );
        Ok(SignOutOutcome {
            identity: guest,
            teardown,
            hard_reset,
        })
    }
}

impl Drop for IdentityController {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}
