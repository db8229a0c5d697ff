//! The background encryption migration.
//!
//! Walks every record of the signed-in owner, finds records that still hold
//! plaintext sensitive fields or unencrypted photos, and rewrites them as
//! ciphertext. Work happens in batches; progress is persisted after each
//! batch so a pause, sign-out or crash resumes where it stopped.
//!
//! At most one run exists per engine. The check happens synchronously, before
//! any await, so two racing `start` calls cannot both pass it.

use crate::config::MigrationConfig;
use crate::error::{MigrationError, MigrationResult};
use crate::progress::{ItemOutcome, MigrationProgress, MigrationStatus};
use crate::scheduler::{Scheduler, TokioScheduler};
use catchlog_crypto::{DerivedKey, FieldCodec, FieldPolicy, PhotoCodec};
use catchlog_session::{IdentityEvents, Session};
use catchlog_storage::{KeyValueStore, ProgressStore, RecordStore};
use catchlog_types::{CandidateId, IdentityEvent, PhotoStorage, Record, RecordType};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const ENCRYPTED_PHOTO_SUFFIX: &str = ".enc";
const ENVELOPE_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    Full,
    RetryFailed { photos_only: bool },
}

struct EngineInner {
    store: Arc<dyn RecordStore>,
    session: Arc<Session>,
    progress_store: ProgressStore,
    fields: FieldCodec,
    photos: PhotoCodec,
    scheduler: Arc<dyn Scheduler>,
    config: MigrationConfig,
    record_types: Vec<RecordType>,
    running: AtomicBool,
    pause_requested: AtomicBool,
    cancel_requested: AtomicBool,
    /// Owner of the current run, set while `running` is true.
    run_owner: Mutex<Option<String>>,
    progress: Mutex<MigrationProgress>,
}

/// Resets the run flags when a run ends, however it ends.
struct RunGuard {
    inner: Arc<EngineInner>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.inner.set_run_owner(None);
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.pause_requested.store(false, Ordering::SeqCst);
        self.inner.cancel_requested.store(false, Ordering::SeqCst);
    }
}

/// Resumable, idempotent field and photo encryption job.
#[derive(Clone)]
pub struct MigrationEngine {
    inner: Arc<EngineInner>,
}

impl MigrationEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        session: Arc<Session>,
        kv: Arc<dyn KeyValueStore>,
        config: MigrationConfig,
    ) -> Self {
        Self::with_parts(
            store,
            session,
            kv,
            config,
            FieldPolicy::default(),
            Arc::new(TokioScheduler),
            RecordType::ALL.to_vec(),
        )
    }

    pub fn with_parts(
        store: Arc<dyn RecordStore>,
        session: Arc<Session>,
        kv: Arc<dyn KeyValueStore>,
        config: MigrationConfig,
        policy: FieldPolicy,
        scheduler: Arc<dyn Scheduler>,
        mut record_types: Vec<RecordType>,
    ) -> Self {
        record_types.sort();
        record_types.dedup();
        Self {
            inner: Arc::new(EngineInner {
                store,
                session,
                progress_store: ProgressStore::new(kv),
                fields: FieldCodec::new(policy),
                photos: PhotoCodec,
                scheduler,
                config,
                record_types,
                running: AtomicBool::new(false),
                pause_requested: AtomicBool::new(false),
                cancel_requested: AtomicBool::new(false),
                run_owner: Mutex::new(None),
                progress: Mutex::new(MigrationProgress::default()),
            }),
        }
    }

    /// Progress document scope: the record types joined by `+`.
    pub fn scope(&self) -> String {
        self.inner.scope()
    }

    /// Records of the signed-in owner that still need encryption, in
    /// record type order then id order. Does not modify anything.
    pub async fn detect(&self) -> MigrationResult<Vec<CandidateId>> {
        let owner = self.inner.ready_owner()?;
        self.inner.detect(&owner).await
    }

    /// Runs the migration to the end (or until paused or cancelled).
    pub async fn start(&self) -> MigrationResult<MigrationProgress> {
        let (guard, owner) = self.begin()?;
        let result = self.inner.run(&owner, RunMode::Full).await;
        drop(guard);
        result
    }

    /// Same checks as [`start`](Self::start), then runs on the tokio runtime.
    pub fn start_background(&self) -> MigrationResult<JoinHandle<MigrationResult<MigrationProgress>>> {
        let (guard, owner) = self.begin()?;
        let inner = self.inner.clone();
        Ok(tokio::spawn(async move {
            let result = inner.run(&owner, RunMode::Full).await;
            drop(guard);
            result
        }))
    }

    /// Re-attempts every failed record.
    pub async fn retry_failed(&self) -> MigrationResult<MigrationProgress> {
        let (guard, owner) = self.begin()?;
        let result = self
            .inner
            .run(&owner, RunMode::RetryFailed { photos_only: false })
            .await;
        drop(guard);
        result
    }

    /// Re-attempts failed records that still carry unencrypted photos.
    pub async fn retry_failed_photos(&self) -> MigrationResult<MigrationProgress> {
        let (guard, owner) = self.begin()?;
        let result = self
            .inner
            .run(&owner, RunMode::RetryFailed { photos_only: true })
            .await;
        drop(guard);
        result
    }

    /// Stops scheduling new items. In-flight items finish; the run ends Paused.
    /// Returns false when nothing was running.
    pub fn pause(&self) -> bool {
        if !self.is_migration_running() {
            return false;
        }
        info!("Migration pause requested");
        self.inner.pause_requested.store(true, Ordering::SeqCst);
        true
    }

    /// Stops and resets to NotStarted, removing persisted progress. Records
    /// already encrypted stay encrypted.
    pub fn cancel(&self) -> MigrationResult<()> {
        if self.is_migration_running() {
            info!("Migration cancel requested");
            self.inner.cancel_requested.store(true, Ordering::SeqCst);
            return Ok(());
        }
        let owner = self
            .inner
            .snapshot()
            .owner_id
            .or_else(|| self.inner.session.authenticated_id());
        if let Some(owner) = owner {
            self.inner.progress_store.remove(&self.scope(), &owner)?;
        }
        self.inner.replace(MigrationProgress::default());
        Ok(())
    }

    pub fn get_progress(&self) -> MigrationProgress {
        self.inner.snapshot()
    }

    /// Loads the signed-in owner's persisted progress into memory.
    pub fn load_progress(&self) -> MigrationResult<MigrationProgress> {
        let owner = self
            .inner
            .session
            .authenticated_id()
            .ok_or_else(|| MigrationError::ServiceNotReady("no authenticated session".into()))?;
        let progress = self.inner.load_persisted(&owner).unwrap_or_default();
        if !self.is_migration_running() {
            self.inner.replace(progress.clone());
        }
        Ok(progress)
    }

    pub fn is_migration_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// A pause was requested and the run has not stopped yet.
    pub fn is_pausing(&self) -> bool {
        self.is_migration_running() && self.inner.pause_requested.load(Ordering::SeqCst)
    }

    /// Removes persisted progress for `owner_id`.
    pub fn clear_progress(&self, owner_id: &str) -> MigrationResult<()> {
        if self.is_migration_running() {
            return Err(MigrationError::AlreadyRunning);
        }
        self.inner.progress_store.remove_all_for(owner_id)?;
        if self.inner.snapshot().owner_id.as_deref() == Some(owner_id) {
            self.inner.replace(MigrationProgress::default());
        }
        debug!("Cleared migration progress for {}", owner_id);
        Ok(())
    }

    /// Owner the current run encrypts for.
    pub fn running_for(&self) -> Option<String> {
        self.inner.run_owner()
    }

    /// Pauses a running migration once the active identity is no longer the
    /// run's owner.
    ///
    /// The session is consulted rather than the event payload, so a change
    /// event that arrives after the same owner signed back in leaves the
    /// resumed run alone.
    pub fn watch_identity(&self, events: &IdentityEvents) -> JoinHandle<()> {
        let mut rx = events.subscribe();
        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(IdentityEvent::Changed { previous, new }) if previous != new => {
                        engine.pause_if_owner_left();
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Identity watcher lagged by {} events", skipped);
                        engine.pause_if_owner_left();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    fn pause_if_owner_left(&self) {
        let Some(owner) = self.running_for() else {
            return;
        };
        if self.inner.session.authenticated_id().as_deref() != Some(owner.as_str()) && self.pause() {
            info!("Identity changed, migration for {} paused", owner);
        }
    }

    /// Synchronous part of every entry point: claim the run flag, then check
    /// readiness. The guard releases the flag on every early return.
    fn begin(&self) -> MigrationResult<(RunGuard, String)> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(MigrationError::AlreadyRunning);
        }
        self.inner.pause_requested.store(false, Ordering::SeqCst);
        self.inner.cancel_requested.store(false, Ordering::SeqCst);
        let guard = RunGuard {
            inner: self.inner.clone(),
        };
        let owner = self.inner.ready_owner()?;
        self.inner.set_run_owner(Some(owner.clone()));
        Ok((guard, owner))
    }
}

impl EngineInner {
    fn scope(&self) -> String {
        self.record_types
            .iter()
            .map(RecordType::as_str)
            .collect::<Vec<_>>()
            .join("+")
    }

    fn ready_owner(&self) -> MigrationResult<String> {
        let owner = self
            .session
            .authenticated_id()
            .ok_or_else(|| MigrationError::ServiceNotReady("no authenticated session".into()))?;
        if !self.session.is_ready_for(&owner) {
            return Err(MigrationError::ServiceNotReady("encryption key not ready".into()));
        }
        if !self.store.is_ready() {
            return Err(MigrationError::ServiceNotReady("record store not ready".into()));
        }
        Ok(owner)
    }

    fn run_owner(&self) -> Option<String> {
        self.run_owner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_run_owner(&self, owner: Option<String>) {
        *self.run_owner.lock().unwrap_or_else(PoisonError::into_inner) = owner;
    }

    fn snapshot(&self) -> MigrationProgress {
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace(&self, progress: MigrationProgress) {
        *self.progress.lock().unwrap_or_else(PoisonError::into_inner) = progress;
    }

    fn load_persisted(&self, owner: &str) -> Option<MigrationProgress> {
        match self.progress_store.load::<MigrationProgress>(&self.scope(), owner) {
            Ok(progress) => progress,
            Err(e) => {
                warn!("Ignoring unreadable migration progress for {}: {}", owner, e);
                None
            }
        }
    }

    fn persist(&self, owner: &str, progress: &MigrationProgress) -> catchlog_storage::StorageResult<()> {
        self.progress_store.save(&self.scope(), owner, progress)
    }

    fn persist_final(&self, owner: &str, progress: &MigrationProgress) {
        if let Err(e) = self.persist(owner, progress) {
            warn!("Failed to persist final migration progress: {}", e);
        }
    }

    async fn detect(&self, owner: &str) -> MigrationResult<Vec<CandidateId>> {
        let mut candidates = Vec::new();
        for record_type in &self.record_types {
            let records = self.store.read_all(*record_type, owner).await?;
            candidates.extend(
                records
                    .iter()
                    .filter(|r| self.needs_migration(r))
                    .map(Record::candidate_id),
            );
        }
        candidates.sort();
        Ok(candidates)
    }

    fn needs_migration(&self, record: &Record) -> bool {
        self.fields.needs_encryption(record) || self.photos.needs_encryption(record)
    }

    async fn run(&self, owner: &str, mode: RunMode) -> MigrationResult<MigrationProgress> {
        let persisted = self.load_persisted(owner);
        let (mut progress, work) = match mode {
            RunMode::Full => {
                let candidates = self.detect(owner).await?;
                let progress = match persisted {
                    Some(p) if p.status.is_resumable() => {
                        info!(
                            "Resuming migration for {} at {}/{}",
                            owner, p.processed_items, p.total_items
                        );
                        p
                    }
                    _ => MigrationProgress::fresh(owner, 0),
                };
                let work: Vec<CandidateId> = candidates
                    .into_iter()
                    .filter(|id| !progress.is_settled(id))
                    .collect();
                let mut progress = progress;
                progress.total_items = progress.processed_items + work.len();
                (progress, work)
            }
            RunMode::RetryFailed { photos_only } => {
                let progress = persisted
                    .or_else(|| {
                        let current = self.snapshot();
                        (current.owner_id.as_deref() == Some(owner)).then_some(current)
                    })
                    .unwrap_or_default();
                // Unfinished runs still have unvisited records; resume them instead.
                if !progress.status.is_finished() {
                    return Err(MigrationError::NotRetryable(progress.status));
                }
                let mut work = Vec::new();
                for id in &progress.failed_ids {
                    if photos_only && !self.has_unencrypted_photos(id).await {
                        continue;
                    }
                    work.push(id.clone());
                }
                (progress, work)
            }
        };

        progress.owner_id = Some(owner.to_string());
        progress.touch(MigrationStatus::Running);
        self.persist(owner, &progress)?;
        self.replace(progress.clone());
        info!("Migration started for {}: {} items to process ({:?})", owner, work.len(), mode);

        let stopped = self.process(owner, &work).await;

        let mut progress = self.snapshot();
        match stopped {
            Some(Stop::Cancel) => {
                if let Err(e) = self.progress_store.remove(&self.scope(), owner) {
                    warn!("Failed to remove cancelled migration progress: {}", e);
                }
                progress = MigrationProgress::default();
                info!("Migration cancelled for {}", owner);
            }
            Some(Stop::Pause) => {
                progress.touch(MigrationStatus::Paused);
                self.persist_final(owner, &progress);
                info!(
                    "Migration paused for {} at {}/{}",
                    owner, progress.processed_items, progress.total_items
                );
            }
            None => {
                let status = if progress.failed_ids.is_empty() {
                    MigrationStatus::Completed
                } else {
                    MigrationStatus::Failed
                };
                progress.touch(status);
                self.persist_final(owner, &progress);
                info!(
                    "Migration {} for {}: {} succeeded, {} failed",
                    status,
                    owner,
                    progress.succeeded_ids.len(),
                    progress.failed_ids.len()
                );
            }
        }
        self.replace(progress.clone());
        Ok(progress)
    }

    fn stop_requested(&self) -> Option<Stop> {
        if self.cancel_requested.load(Ordering::SeqCst) {
            Some(Stop::Cancel)
        } else if self.pause_requested.load(Ordering::SeqCst) {
            Some(Stop::Pause)
        } else {
            None
        }
    }

    async fn process(&self, owner: &str, work: &[CandidateId]) -> Option<Stop> {
        let batch_size = self.config.batch_size.max(1);
        let concurrency = self.config.max_concurrency.max(1);

        for (n, batch) in work.chunks(batch_size).enumerate() {
            if let Some(stop) = self.stop_requested() {
                return Some(stop);
            }

            let outcomes: Vec<(CandidateId, ItemOutcome)> = stream::iter(batch.iter().cloned())
                .map(|id| async move {
                    let outcome = self.process_item(owner, &id).await;
                    (id, outcome)
                })
                .buffered(concurrency)
                .collect()
                .await;

            // Writes for this batch are done; apply and persist in one step.
            let snapshot = {
                let mut progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
                for (id, outcome) in &outcomes {
                    if let ItemOutcome::Failed(reason) = outcome {
                        warn!("Migration of {} failed: {}", id, reason);
                    }
                    progress.record(id, outcome);
                }
                progress.last_updated = Utc::now();
                progress.clone()
            };
            if let Err(e) = self.persist(owner, &snapshot) {
                warn!("Failed to persist migration progress ({}), pausing", e);
                self.pause_requested.store(true, Ordering::SeqCst);
                return Some(Stop::Pause);
            }
            debug!(
                "Batch {} done: {}/{} processed",
                n + 1,
                snapshot.processed_items,
                snapshot.total_items
            );

            self.scheduler.between_batches(self.config.batch_delay()).await;
        }
        self.stop_requested()
    }

    async fn process_item(&self, owner: &str, id: &CandidateId) -> ItemOutcome {
        if self.stop_requested().is_some() {
            return ItemOutcome::Skipped;
        }
        // Losing the key mid-run means the session ended under us.
        let key = match self.session.keys().key_for(owner) {
            Ok(key) => key,
            Err(e) => {
                warn!("Key unavailable during migration ({}), pausing", e);
                self.pause_requested.store(true, Ordering::SeqCst);
                return ItemOutcome::Skipped;
            }
        };
        match self.migrate_record(&key, owner, id).await {
            Ok(()) => ItemOutcome::Succeeded,
            Err(e) => ItemOutcome::Failed(e.to_string()),
        }
    }

    async fn migrate_record(&self, key: &DerivedKey, owner: &str, id: &CandidateId) -> MigrationResult<()> {
        let Some(record) = self.store.read_one(id.record_type, &id.record_id).await? else {
            debug!("{} vanished before migration, nothing to do", id);
            return Ok(());
        };
        if record.owner_id != owner {
            return Err(MigrationError::ForeignRecord(id.to_string()));
        }
        if !self.needs_migration(&record) {
            return Ok(());
        }

        let mut updated = record.clone();
        updated.photos = Vec::with_capacity(record.photos.len());
        for photo in &record.photos {
            let migrated = match &photo.storage {
                PhotoStorage::Inline { .. } => self.photos.encrypt_inline(key, owner, photo)?,
                PhotoStorage::OutOfLine { path } => {
                    let (bytes, _content_type) = self.store.read_photo(path).await?;
                    if let Some(expected) = &photo.content_hash {
                        PhotoCodec::verify_content(&bytes, expected)?;
                    }
                    let envelope = self
                        .photos
                        .encrypt(key, owner, &photo.id, &bytes, &photo.mime_type)?;
                    let body = serde_json::to_vec(&envelope)
                        .map_err(catchlog_storage::StorageError::from)?;
                    let enc_path = format!("{path}{ENCRYPTED_PHOTO_SUFFIX}");
                    let stored = self
                        .with_retry("photo upload", || {
                            self.store.write_photo(&enc_path, &body, ENVELOPE_CONTENT_TYPE)
                        })
                        .await?;
                    PhotoCodec::attach_out_of_line(photo, &stored, &envelope)
                }
                PhotoStorage::InlineEncrypted { .. } | PhotoStorage::OutOfLineEncrypted { .. } => photo.clone(),
            };
            updated.photos.push(migrated);
        }

        let mut updated = self.fields.encrypt_fields(key, &updated)?;
        updated.updated_at = Utc::now();
        self.with_retry("record write", || self.store.write(&updated)).await?;
        debug!("Encrypted {}", id);
        Ok(())
    }

    async fn with_retry<T, F, Fut>(&self, what: &str, op: F) -> MigrationResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = catchlog_storage::StorageResult<T>>,
    {
        Ok(self.config.retry.run(self.scheduler.as_ref(), what, op).await?)
    }

    async fn has_unencrypted_photos(&self, id: &CandidateId) -> bool {
        matches!(
            self.store.read_one(id.record_type, &id.record_id).await,
            Ok(Some(record)) if record.has_unencrypted_photos()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Pause,
    Cancel,
}
