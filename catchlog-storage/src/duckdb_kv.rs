//! DuckDB-backed local key-value layer.

use crate::error::{StorageError, StorageResult};
use crate::kv::KeyValueStore;
use chrono::Utc;
use duckdb::{params, Connection, OptionalExt};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub struct DuckDbKvStore {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbKvStore {
    /// Open a key-value store backed by a DuckDB file.
    pub fn open(db_path: &Path) -> StorageResult<Self> {
        let conn = crate::open_duckdb_with_wal_recovery(db_path, "64MB", 1)?;
        Self::open_with_conn(Arc::new(Mutex::new(conn)))
    }

    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::open_with_conn(Arc::new(Mutex::new(conn)))
    }

    /// Open with an existing shared connection.
    pub fn open_with_conn(conn: Arc<Mutex<Connection>>) -> StorageResult<Self> {
        let store = Self { conn };
        store.ensure_tables()?;
        Ok(store)
    }

    fn ensure_tables(&self) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS local_kv (
                key VARCHAR PRIMARY KEY,
                value VARCHAR NOT NULL,
                modified_at BIGINT NOT NULL
            );",
        )?;
        Ok(())
    }

    fn lock(&self) -> StorageResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Store(e.to_string()))
    }
}

impl KeyValueStore for DuckDbKvStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM local_kv WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let now = Utc::now().timestamp_millis();
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO local_kv (key, value, modified_at) VALUES (?, ?, ?)",
            params![key, value, now],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        let conn = self.lock()?;
        let affected = conn.execute("DELETE FROM local_kv WHERE key = ?", params![key])?;
        Ok(affected > 0)
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key FROM local_kv ORDER BY key")?;
        let keys: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(keys)
    }
}
