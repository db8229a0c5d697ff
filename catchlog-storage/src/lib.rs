//! Storage layer for CatchLog.
//!
//! Two kinds of storage sit behind traits here:
//!
//! - [`RecordStore`]: the cloud document collections (with a local
//!   fallback) holding trips, weather logs, fish catches and photo blobs.
//! - [`KeyValueStore`]: the device-local key-value layer. Only small
//!   bookkeeping documents live here (migration progress, key-existence
//!   flags), never key bytes. [`DuckDbKvStore`] persists it on disk.
//!
//! # Layout of the local key-value layer
//!
//! - `catchlog.migration.<scope>.<owner>`: one migration progress document
//! - `catchlog.keyflag.<owner>`: "a key was derived for this owner before"

mod duckdb_kv;
mod error;
mod kv;
mod progress_store;
mod record_store;
mod salt_store;

pub use duckdb_kv::DuckDbKvStore;
pub use error::{StorageError, StorageResult};
pub use kv::{KeyValueStore, MemoryKvStore};
pub use progress_store::{KeyFlagStore, ProgressStore, KEY_FLAG_PREFIX, PROGRESS_PREFIX};
pub use record_store::{MemoryRecordStore, RecordStore};
pub use salt_store::{MemorySaltStore, SaltStore};

/// Open a DuckDB connection with stale WAL recovery and resource limits.
///
/// If the initial open fails and a `.wal` file exists alongside the database,
/// it is removed and the open is retried once.
pub fn open_duckdb_with_wal_recovery(
    path: &std::path::Path,
    memory_limit: &str,
    threads: u32,
) -> StorageResult<duckdb::Connection> {
    let conn = match duckdb::Connection::open(path) {
        Ok(c) => c,
        Err(first_err) => {
            let wal_path = path.with_extension(
                path.extension()
                    .map(|ext| format!("{}.wal", ext.to_string_lossy()))
                    .unwrap_or_else(|| "wal".to_string()),
            );
            if wal_path.exists() {
                tracing::warn!(
                    "DuckDB open failed, removing stale WAL and retrying: {}",
                    wal_path.display()
                );
                if std::fs::remove_file(&wal_path).is_ok() {
                    let c = duckdb::Connection::open(path)?;
                    apply_resource_limits(&c, memory_limit, threads)?;
                    return Ok(c);
                }
            }
            return Err(first_err.into());
        }
    };
    apply_resource_limits(&conn, memory_limit, threads)?;
    Ok(conn)
}

fn apply_resource_limits(
    conn: &duckdb::Connection,
    memory_limit: &str,
    threads: u32,
) -> StorageResult<()> {
    conn.execute_batch(&format!(
        "PRAGMA memory_limit='{}'; PRAGMA threads={};",
        memory_limit, threads
    ))?;
    Ok(())
}
