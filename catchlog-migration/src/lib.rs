//! Background encryption migration for CatchLog.
//!
//! [`MigrationEngine`] turns plaintext sensitive fields and photos of the
//! signed-in owner into ciphertext at rest. It is resumable (progress is
//! persisted per batch in the local key-value layer), idempotent (encrypted
//! data is never touched twice) and tolerant of per-record failure.

mod config;
mod engine;
mod error;
mod progress;
mod retry;
mod scheduler;

pub use config::MigrationConfig;
pub use engine::MigrationEngine;
pub use error::{MigrationError, MigrationResult};
pub use progress::{ItemOutcome, MigrationProgress, MigrationStatus};
pub use retry::RetryPolicy;
pub use scheduler::{Scheduler, TokioScheduler};
