mod common;

use catchlog_crypto::{FieldCodec, PhotoCodec};
use catchlog_migration::{MigrationError, MigrationProgress, MigrationStatus};
use catchlog_storage::{ProgressStore, RecordStore};
use catchlog_types::{CandidateId, CipherEnvelope, Photo, PhotoEnvelope, PhotoStorage, Record, RecordType};
use common::*;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tokio::sync::Semaphore;

fn catch_id(id: &str) -> CandidateId {
    CandidateId::new(RecordType::FishCatch, id)
}

fn encrypted(h: &Harness, record: &Record) -> Record {
    let key = h.session.key().unwrap();
    let mut out = FieldCodec::default().encrypt_fields(&key, record).unwrap();
    out.photos = record
        .photos
        .iter()
        .map(|p| PhotoCodec.encrypt_inline(&key, OWNER, p).unwrap())
        .collect();
    out
}

// ── Scenario: three fish catches ──

#[tokio::test]
async fn three_fish_catches_two_plaintext_one_encrypted() {
    let h = harness();
    let done = encrypted(&h, &plaintext_catch("c3"));
    h.store
        .inner
        .seed([plaintext_catch("c1"), plaintext_catch("c2"), done.clone()])
        .await;

    let detected = h.engine.detect().await.unwrap();
    assert_eq!(detected, vec![catch_id("c1"), catch_id("c2")]);

    let progress = h.engine.start().await.unwrap();
    assert_eq!(progress.status, MigrationStatus::Completed);
    assert_eq!(progress.processed_items, 2);
    assert_eq!(progress.succeeded_ids.len(), 2);
    assert!(progress.failed_ids.is_empty());

    // The already encrypted record was never rewritten.
    assert_eq!(h.store.record(RecordType::FishCatch, "c3").await, done);
    assert_eq!(h.store.write_attempts(), 2);

    let key = h.session.key().unwrap();
    for id in ["c1", "c2"] {
        let stored = h.store.record(RecordType::FishCatch, id).await;
        assert!(CipherEnvelope::is_envelope(&stored.fields["notes"]));
        assert!(CipherEnvelope::is_envelope(&stored.fields["bait"]));
        assert_eq!(stored.fields["species"], "kahawai");
        assert!(stored.photos.iter().all(Photo::is_encrypted));

        let plain = FieldCodec::default().decrypt_fields(&key, &stored).unwrap();
        assert_eq!(plain.fields, plaintext_catch(id).fields);
        assert_eq!(
            PhotoCodec.read_inline(&key, OWNER, &stored.photos[0]).unwrap(),
            vec![0xFF, 0xD8, 1, 2, 3]
        );
    }
}

#[tokio::test]
async fn detect_orders_by_type_then_id_and_does_not_mutate() {
    let h = harness();
    let weather = Record::new(RecordType::WeatherLog, "w1", OWNER).with_field("observations", "swell 1.5m");
    h.store
        .inner
        .seed([
            plaintext_catch("c9"),
            weather.clone(),
            plaintext_trip("t2"),
            plaintext_trip("t1"),
            plaintext_catch("c1"),
            Record::new(RecordType::Trip, "t3", OWNER).with_field("date", "2026-01-02"),
            plaintext_catch("c10"),
        ])
        .await;
    // Someone else's plaintext is not ours to migrate.
    h.store
        .inner
        .seed([Record::new(RecordType::Trip, "t0", "u2").with_field("notes", "not yours")])
        .await;

    let first = h.engine.detect().await.unwrap();
    let second = h.engine.detect().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(
        first.iter().map(ToString::to_string).collect::<Vec<_>>(),
        vec![
            "trip/t1",
            "trip/t2",
            "weather_log/w1",
            "fish_catch/c1",
            "fish_catch/c10",
            "fish_catch/c9",
        ]
    );
    assert_eq!(h.store.write_attempts(), 0);
    assert_eq!(h.store.record(RecordType::WeatherLog, "w1").await, weather);
}

#[tokio::test]
async fn detect_requires_a_ready_service() {
    let h = harness();
    h.store.inner.set_ready(false);
    assert!(matches!(h.engine.detect().await, Err(MigrationError::ServiceNotReady(_))));
    assert!(matches!(h.engine.start().await, Err(MigrationError::ServiceNotReady(_))));
    assert!(!h.engine.is_migration_running());

    h.store.inner.set_ready(true);
    h.session.keys().clear();
    assert!(matches!(h.engine.detect().await, Err(MigrationError::ServiceNotReady(_))));

    h.session.close();
    assert!(matches!(h.engine.start().await, Err(MigrationError::ServiceNotReady(_))));
}

// ── Concurrency ──

#[tokio::test]
async fn two_immediate_starts_yield_one_run() {
    let h = harness();
    h.store.inner.seed([plaintext_catch("c1"), plaintext_catch("c2")]).await;

    let (a, b) = tokio::join!(h.engine.start(), h.engine.start());
    let results = [a, b];
    let ran = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(MigrationError::AlreadyRunning)))
        .count();
    assert_eq!((ran, rejected), (1, 1));
    assert_eq!(h.store.write_attempts(), 2);
}

#[tokio::test]
async fn background_run_blocks_other_entry_points() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness_with(FlakyStore::gated(gate.clone()), fast_config());
    h.store.inner.seed([plaintext_catch("c1")]).await;

    let handle = h.engine.start_background().unwrap();
    assert!(h.engine.is_migration_running());
    assert!(matches!(h.engine.start().await, Err(MigrationError::AlreadyRunning)));
    assert!(matches!(h.engine.retry_failed().await, Err(MigrationError::AlreadyRunning)));
    assert!(matches!(h.engine.start_background(), Err(MigrationError::AlreadyRunning)));
    assert!(matches!(h.engine.clear_progress(OWNER), Err(MigrationError::AlreadyRunning)));

    gate.add_permits(10);
    let progress = handle.await.unwrap().unwrap();
    assert_eq!(progress.status, MigrationStatus::Completed);
    assert!(!h.engine.is_migration_running());
}

// ── Progress ──

#[tokio::test]
async fn progress_is_monotonic_and_consistent_at_every_persist() {
    let h = harness();
    h.store.fail_always("c3");
    h.store
        .inner
        .seed((1..=7).map(|i| plaintext_catch(&format!("c{i}"))))
        .await;

    let progress = h.engine.start().await.unwrap();
    assert_eq!(progress.processed_items, 7);

    let history = h.kv.history();
    // Initial document, one per batch of two, and the final one.
    assert_eq!(history.len(), 1 + 4 + 1);
    let mut last = 0;
    for snapshot in &history {
        assert!(snapshot.is_consistent(), "{snapshot:?}");
        assert!(snapshot.processed_items >= last);
        last = snapshot.processed_items;
    }
}

#[tokio::test]
async fn partial_failure_is_isolated() {
    let h = harness();
    for id in ["c2", "c4"] {
        h.store.fail_always(id);
    }
    h.store
        .inner
        .seed((1..=5).map(|i| plaintext_catch(&format!("c{i}"))))
        .await;

    let progress = h.engine.start().await.unwrap();
    assert_eq!(progress.status, MigrationStatus::Failed);
    assert_eq!(progress.processed_items, 5);
    assert_eq!(progress.failed_ids.len(), 2);
    assert_eq!(progress.succeeded_ids.len(), 3);
    assert!(progress.failed_ids.contains(&catch_id("c2")));
    assert!(progress.errors[&catch_id("c4")].contains("backend rejected"));

    // Failed records stay plaintext, the rest are encrypted.
    let c2 = h.store.record(RecordType::FishCatch, "c2").await;
    assert_eq!(c2.fields, plaintext_catch("c2").fields);
    let c5 = h.store.record(RecordType::FishCatch, "c5").await;
    assert!(CipherEnvelope::is_envelope(&c5.fields["notes"]));
}

#[tokio::test]
async fn transient_store_errors_are_retried() {
    let h = harness();
    h.store.fail_times("c1", 2);
    h.store.inner.seed([plaintext_catch("c1")]).await;

    let progress = h.engine.start().await.unwrap();
    assert_eq!(progress.status, MigrationStatus::Completed);
    assert_eq!(h.store.write_attempts(), 3);
}

#[tokio::test]
async fn retries_are_bounded() {
    let h = harness();
    h.store.fail_times("c1", 5);
    h.store.inner.seed([plaintext_catch("c1")]).await;

    let progress = h.engine.start().await.unwrap();
    assert_eq!(progress.status, MigrationStatus::Failed);
    assert_eq!(h.store.write_attempts(), 3);
}

#[tokio::test]
async fn rerun_after_completion_is_a_no_op() {
    let h = harness();
    h.store.inner.seed([plaintext_catch("c1"), plaintext_trip("t1")]).await;

    h.engine.start().await.unwrap();
    let attempts = h.store.write_attempts();

    let again = h.engine.start().await.unwrap();
    assert_eq!(again.status, MigrationStatus::Completed);
    assert_eq!(again.total_items, 0);
    assert_eq!(h.store.write_attempts(), attempts);
    assert!(h.engine.detect().await.unwrap().is_empty());
}

// ── Retry ──

#[tokio::test]
async fn retry_failed_moves_successes_without_recounting() {
    let h = harness();
    h.store.fail_always("c1");
    h.store.fail_always("c2");
    h.store
        .inner
        .seed([plaintext_catch("c1"), plaintext_catch("c2"), plaintext_catch("c3")])
        .await;

    let first = h.engine.start().await.unwrap();
    assert_eq!(first.failed_ids.len(), 2);

    h.store.heal("c1");
    let retried = h.engine.retry_failed().await.unwrap();
    assert_eq!(retried.processed_items, 3);
    assert_eq!(retried.failed_ids.iter().cloned().collect::<Vec<_>>(), vec![catch_id("c2")]);
    assert_eq!(retried.succeeded_ids.len(), 2);
    assert_eq!(retried.status, MigrationStatus::Failed);
    assert!(retried.is_consistent());

    h.store.heal("c2");
    let finished = h.engine.retry_failed().await.unwrap();
    assert_eq!(finished.status, MigrationStatus::Completed);
    assert_eq!(finished.processed_items, 3);
    assert!(finished.errors.is_empty());
}

#[tokio::test]
async fn retry_is_refused_while_a_run_is_paused() {
    // c1 burns three attempts, then c2 blocks on the gate.
    let gate = Arc::new(Semaphore::new(3));
    let h = harness_with(FlakyStore::gated(gate.clone()), one_at_a_time());
    h.store.fail_always("c1");
    h.store
        .inner
        .seed([plaintext_catch("c1"), plaintext_catch("c2"), plaintext_catch("c3")])
        .await;

    let handle = h.engine.start_background().unwrap();
    let store = h.store.clone();
    wait_until(|| store.write_attempts() == 4).await;
    assert!(h.engine.pause());
    gate.add_permits(100);
    let paused = handle.await.unwrap().unwrap();
    assert_eq!(paused.status, MigrationStatus::Paused);
    assert_eq!(paused.processed_items, 2);

    h.store.heal("c1");
    let attempts = h.store.write_attempts();
    assert!(matches!(
        h.engine.retry_failed().await,
        Err(MigrationError::NotRetryable(MigrationStatus::Paused))
    ));
    assert!(matches!(
        h.engine.retry_failed_photos().await,
        Err(MigrationError::NotRetryable(MigrationStatus::Paused))
    ));
    assert_eq!(h.store.write_attempts(), attempts);

    let persisted: MigrationProgress = ProgressStore::new(h.kv.clone())
        .load(&h.engine.scope(), OWNER)
        .unwrap()
        .unwrap();
    assert_eq!(persisted.status, MigrationStatus::Paused);
    assert_eq!(persisted.processed_items, 2);
    let c3 = h.store.record(RecordType::FishCatch, "c3").await;
    assert_eq!(c3.fields, plaintext_catch("c3").fields);

    // Resuming finishes c3; only then does the retry pick up c1.
    let resumed = h.engine.start().await.unwrap();
    assert_eq!(resumed.status, MigrationStatus::Failed);
    assert_eq!(resumed.processed_items, 3);
    let retried = h.engine.retry_failed().await.unwrap();
    assert_eq!(retried.status, MigrationStatus::Completed);
    assert_eq!(retried.processed_items, 3);
    assert!(h.engine.detect().await.unwrap().is_empty());
}

#[tokio::test]
async fn retry_without_a_previous_run_is_refused() {
    let h = harness();
    h.store.inner.seed([plaintext_catch("c1")]).await;

    assert!(matches!(
        h.engine.retry_failed().await,
        Err(MigrationError::NotRetryable(MigrationStatus::NotStarted))
    ));
    assert_eq!(h.store.write_attempts(), 0);
    assert!(h.kv.history().is_empty());
}

#[tokio::test]
async fn retry_failed_photos_only_touches_records_with_unencrypted_photos() {
    let h = harness();
    let missing_blob = Record::new(RecordType::FishCatch, "c1", OWNER)
        .with_field("notes", "photo upload pending")
        .with_photo(Photo::out_of_line("p1", "image/png", 6, "photos/u1/p1.png"));
    let no_photo = Record::new(RecordType::Trip, "t1", OWNER).with_field("notes", "no photos");
    h.store.fail_always("t1");
    h.store.inner.seed([missing_blob, no_photo]).await;

    let first = h.engine.start().await.unwrap();
    assert_eq!(first.failed_ids.len(), 2);

    h.store.heal("t1");
    h.store
        .inner
        .write_photo("photos/u1/p1.png", b"pixels", "image/png")
        .await
        .unwrap();
    let attempts = h.store.write_attempts();

    let retried = h.engine.retry_failed_photos().await.unwrap();
    assert_eq!(
        retried.failed_ids.iter().cloned().collect::<Vec<_>>(),
        vec![CandidateId::new(RecordType::Trip, "t1")]
    );
    assert!(retried.succeeded_ids.contains(&catch_id("c1")));
    assert_eq!(h.store.write_attempts(), attempts + 1);
}

// ── Out-of-line photos ──

#[tokio::test]
async fn out_of_line_photo_is_encrypted_beside_the_original() {
    let h = harness();
    let bytes = b"\x89PNG fake image".to_vec();
    let mut photo = Photo::out_of_line("p1", "image/png", bytes.len() as u64, "photos/u1/p1.png");
    photo.content_hash = Some(PhotoCodec::content_hash(&bytes));
    h.store
        .inner
        .write_photo("photos/u1/p1.png", &bytes, "image/png")
        .await
        .unwrap();
    h.store
        .inner
        .seed([Record::new(RecordType::FishCatch, "c1", OWNER).with_photo(photo)])
        .await;

    let progress = h.engine.start().await.unwrap();
    assert_eq!(progress.status, MigrationStatus::Completed);

    let stored = h.store.record(RecordType::FishCatch, "c1").await;
    let PhotoStorage::OutOfLineEncrypted { path, meta } = &stored.photos[0].storage else {
        panic!("photo not encrypted: {:?}", stored.photos[0]);
    };
    assert_eq!(path, "photos/u1/p1.png.enc");
    assert_eq!(meta.original_size, bytes.len() as u64);

    let (body, content_type) = h.store.read_photo(path).await.unwrap();
    assert_eq!(content_type, "application/json");
    let envelope: PhotoEnvelope = serde_json::from_slice(&body).unwrap();
    let key = h.session.key().unwrap();
    assert_eq!(PhotoCodec.decrypt(&key, OWNER, "p1", &envelope).unwrap(), bytes);
}

#[tokio::test]
async fn corrupted_photo_blob_fails_only_that_record() {
    let h = harness();
    let mut photo = Photo::out_of_line("p1", "image/png", 6, "photos/u1/p1.png");
    photo.content_hash = Some(PhotoCodec::content_hash(b"pixels"));
    h.store
        .inner
        .write_photo("photos/u1/p1.png", b"pixelz", "image/png")
        .await
        .unwrap();
    let original = Record::new(RecordType::FishCatch, "c1", OWNER).with_photo(photo);
    h.store.inner.seed([original.clone(), plaintext_catch("c2")]).await;

    let progress = h.engine.start().await.unwrap();
    assert_eq!(progress.failed_ids.iter().cloned().collect::<Vec<_>>(), vec![catch_id("c1")]);
    assert!(progress.errors[&catch_id("c1")].contains("content hash mismatch"));
    assert_eq!(h.store.record(RecordType::FishCatch, "c1").await, original);
}

#[tokio::test]
async fn corrupted_inline_photo_fails_only_that_record() {
    let h = harness();
    let mut photo = Photo::inline("p1", "image/jpeg", b"pixelz".to_vec());
    photo.content_hash = Some(PhotoCodec::content_hash(b"pixels"));
    let original = Record::new(RecordType::FishCatch, "c1", OWNER).with_photo(photo);
    h.store.inner.seed([original.clone(), plaintext_catch("c2")]).await;

    let progress = h.engine.start().await.unwrap();
    assert_eq!(progress.failed_ids.iter().cloned().collect::<Vec<_>>(), vec![catch_id("c1")]);
    assert!(progress.errors[&catch_id("c1")].contains("content hash mismatch"));
    assert_eq!(h.store.record(RecordType::FishCatch, "c1").await, original);
}

// ── Pause / cancel / resume ──

fn one_at_a_time() -> catchlog_migration::MigrationConfig {
    catchlog_migration::MigrationConfig {
        batch_size: 1,
        max_concurrency: 1,
        ..fast_config()
    }
}

#[tokio::test]
async fn pause_lets_in_flight_item_finish_then_resume_continues() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness_with(FlakyStore::gated(gate.clone()), one_at_a_time());
    h.store
        .inner
        .seed([plaintext_catch("c1"), plaintext_catch("c2"), plaintext_catch("c3")])
        .await;

    let handle = h.engine.start_background().unwrap();
    let store = h.store.clone();
    wait_until(|| store.write_attempts() == 1).await;
    assert!(h.engine.pause());
    gate.add_permits(100);

    let paused = handle.await.unwrap().unwrap();
    assert_eq!(paused.status, MigrationStatus::Paused);
    assert_eq!(paused.processed_items, 1);
    assert_eq!(paused.total_items, 3);

    let persisted: MigrationProgress = ProgressStore::new(h.kv.clone())
        .load(&h.engine.scope(), OWNER)
        .unwrap()
        .unwrap();
    assert_eq!(persisted.status, MigrationStatus::Paused);

    let resumed = h.engine.start().await.unwrap();
    assert_eq!(resumed.status, MigrationStatus::Completed);
    assert_eq!(resumed.processed_items, 3);
    assert_eq!(resumed.total_items, 3);
    assert_eq!(h.store.write_attempts(), 3);
}

#[tokio::test]
async fn unwritable_progress_refuses_to_start() {
    let h = harness();
    h.store.inner.seed([plaintext_catch("c1")]).await;
    h.kv.inner.set_available(false);

    assert!(matches!(h.engine.start().await, Err(MigrationError::Storage(_))));
    assert_eq!(h.store.write_attempts(), 0);

    h.kv.inner.set_available(true);
    let progress = h.engine.start().await.unwrap();
    assert_eq!(progress.status, MigrationStatus::Completed);
    assert_eq!(progress.processed_items, 1);
}

#[tokio::test]
async fn losing_progress_storage_mid_run_pauses() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness_with(FlakyStore::gated(gate.clone()), one_at_a_time());
    h.store
        .inner
        .seed([plaintext_catch("c1"), plaintext_catch("c2"), plaintext_catch("c3")])
        .await;

    let handle = h.engine.start_background().unwrap();
    let store = h.store.clone();
    wait_until(|| store.write_attempts() == 1).await;
    h.kv.inner.set_available(false);
    gate.add_permits(100);

    let paused = handle.await.unwrap().unwrap();
    assert_eq!(paused.status, MigrationStatus::Paused);
    assert_eq!(paused.processed_items, 1);
    assert_eq!(h.store.write_attempts(), 1);
    let c2 = h.store.record(RecordType::FishCatch, "c2").await;
    assert_eq!(c2.fields, plaintext_catch("c2").fields);

    h.kv.inner.set_available(true);
    let resumed = h.engine.start().await.unwrap();
    assert_eq!(resumed.status, MigrationStatus::Completed);
    assert!(h.engine.detect().await.unwrap().is_empty());
}

#[tokio::test]
async fn cancel_resets_but_keeps_encrypted_records() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness_with(FlakyStore::gated(gate.clone()), one_at_a_time());
    h.store
        .inner
        .seed([plaintext_catch("c1"), plaintext_catch("c2")])
        .await;

    let handle = h.engine.start_background().unwrap();
    let store = h.store.clone();
    wait_until(|| store.write_attempts() == 1).await;
    h.engine.cancel().unwrap();
    gate.add_permits(100);

    let cancelled = handle.await.unwrap().unwrap();
    assert_eq!(cancelled.status, MigrationStatus::NotStarted);
    assert_eq!(h.engine.get_progress().status, MigrationStatus::NotStarted);
    let persisted: Option<MigrationProgress> = ProgressStore::new(h.kv.clone())
        .load(&h.engine.scope(), OWNER)
        .unwrap();
    assert!(persisted.is_none());

    let c1 = h.store.record(RecordType::FishCatch, "c1").await;
    assert!(CipherEnvelope::is_envelope(&c1.fields["notes"]));
    assert_eq!(h.engine.detect().await.unwrap(), vec![catch_id("c2")]);
}

#[tokio::test]
async fn cancel_when_idle_clears_persisted_progress() {
    let h = harness();
    h.store.fail_always("c1");
    h.store.inner.seed([plaintext_catch("c1")]).await;
    h.engine.start().await.unwrap();

    h.engine.cancel().unwrap();
    let progress = h.engine.get_progress();
    assert_eq!(progress.status, MigrationStatus::NotStarted);
    assert_eq!(progress.processed_items, 0);
    assert!(progress.failed_ids.is_empty());
    assert!(h.kv.inner.is_empty());
}

#[tokio::test]
async fn stale_running_progress_resumes_instead_of_restarting() {
    let h = harness();
    h.store
        .inner
        .seed([plaintext_catch("c1"), plaintext_catch("c2")])
        .await;

    // A previous process died after settling c1.
    let mut stale = MigrationProgress::fresh(OWNER, 2);
    stale.record(&catch_id("c1"), &catchlog_migration::ItemOutcome::Succeeded);
    ProgressStore::new(h.kv.clone())
        .save(&h.engine.scope(), OWNER, &stale)
        .unwrap();

    let progress = h.engine.start().await.unwrap();
    assert_eq!(progress.status, MigrationStatus::Completed);
    assert_eq!(progress.processed_items, 2);
    assert_eq!(h.store.write_attempts(), 1);
}

#[tokio::test]
async fn losing_the_key_mid_run_pauses() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness_with(FlakyStore::gated(gate.clone()), one_at_a_time());
    h.store
        .inner
        .seed([plaintext_catch("c1"), plaintext_catch("c2")])
        .await;

    let handle = h.engine.start_background().unwrap();
    let store = h.store.clone();
    wait_until(|| store.write_attempts() == 1).await;
    h.session.keys().clear();
    gate.add_permits(100);

    let progress = handle.await.unwrap().unwrap();
    assert_eq!(progress.status, MigrationStatus::Paused);
    assert_eq!(progress.processed_items, 1);
}

#[tokio::test]
async fn identity_change_pauses_running_migration() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness_with(FlakyStore::gated(gate.clone()), one_at_a_time());
    h.store
        .inner
        .seed([plaintext_catch("c1"), plaintext_catch("c2")])
        .await;
    let events = catchlog_session::IdentityEvents::new();
    let watcher = h.engine.watch_identity(&events);

    let handle = h.engine.start_background().unwrap();
    let store = h.store.clone();
    wait_until(|| store.write_attempts() == 1).await;
    let guest = catchlog_types::Identity::guest();
    let previous = h.session.open(guest.clone());
    events.identity_changed(previous, Some(guest));
    let engine = h.engine.clone();
    wait_until(|| engine.is_pausing()).await;
    gate.add_permits(100);

    let progress = handle.await.unwrap().unwrap();
    assert_eq!(progress.status, MigrationStatus::Paused);
    watcher.abort();
}

#[tokio::test]
async fn stale_identity_event_leaves_owner_run_alone() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness_with(FlakyStore::gated(gate.clone()), one_at_a_time());
    h.store
        .inner
        .seed([plaintext_catch("c1"), plaintext_catch("c2")])
        .await;
    let events = catchlog_session::IdentityEvents::new();
    let watcher = h.engine.watch_identity(&events);

    let handle = h.engine.start_background().unwrap();
    assert_eq!(h.engine.running_for().as_deref(), Some(OWNER));
    let store = h.store.clone();
    wait_until(|| store.write_attempts() == 1).await;

    // Announced late: the owner is still the active identity.
    events.identity_changed(Some(catchlog_types::Identity::guest()), h.session.active());
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(!h.engine.is_pausing());
    gate.add_permits(100);

    let progress = handle.await.unwrap().unwrap();
    assert_eq!(progress.status, MigrationStatus::Completed);
    assert_eq!(h.engine.running_for(), None);
    watcher.abort();
}
