//! Buffered record writes awaiting flush to the record store.
//!
//! Writes made while offline or in quick succession queue here and are
//! flushed on an interval determined by connectivity:
//! - **Online**: 5s intervals or 16KB threshold
//! - **Offline**: held until connectivity returns, capped at 256KB
//! - **Empty queue**: never flushed

use crate::layer::{LayerEntry, LayerKind, LayerResult, PersistenceLayer};
use async_trait::async_trait;
use catchlog_types::RecordType;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    Online,
    Offline,
}

/// One queued write.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub owner_id: String,
    pub record_type: RecordType,
    pub record_id: String,
    pub payload: Value,
}

impl PendingWrite {
    fn key(&self, seq: u64) -> String {
        format!(
            "pending:{}/{}/{}#{}",
            self.owner_id, self.record_type, self.record_id, seq
        )
    }
}

const ONLINE_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const ONLINE_SIZE_THRESHOLD: usize = 16 * 1024; // 16KB
const OFFLINE_SIZE_CAP: usize = 256 * 1024; // 256KB

struct QueueState {
    pending: Vec<(u64, PendingWrite)>,
    pending_size: usize,
    next_seq: u64,
    flush_mode: FlushMode,
    last_flush: Instant,
}

/// Shared queue of writes not yet acknowledged by the store.
#[derive(Clone)]
pub struct PendingWriteQueue {
    state: Arc<Mutex<QueueState>>,
}

impl PendingWriteQueue {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                pending: Vec::new(),
                pending_size: 0,
                next_seq: 0,
                flush_mode: FlushMode::Online,
                last_flush: Instant::now(),
            })),
        }
    }

    pub async fn push(&self, write: PendingWrite) {
        let size = serde_json::to_vec(&write.payload)
            .map(|v| v.len())
            .unwrap_or(128);
        let mut state = self.state.lock().await;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.pending_size += size;
        state.pending.push((seq, write));
    }

    /// Returns true if the queue should flush now.
    pub async fn should_flush(&self) -> bool {
        let state = self.state.lock().await;
        if state.pending.is_empty() {
            return false;
        }
        match state.flush_mode {
            FlushMode::Online => {
                state.last_flush.elapsed() >= ONLINE_FLUSH_INTERVAL
                    || state.pending_size > ONLINE_SIZE_THRESHOLD
            }
            // Nowhere to flush to; the cap only signals the caller to persist locally.
            FlushMode::Offline => state.pending_size > OFFLINE_SIZE_CAP,
        }
    }

    pub async fn set_online(&self, online: bool) {
        self.state.lock().await.flush_mode = if online {
            FlushMode::Online
        } else {
            FlushMode::Offline
        };
    }

    pub async fn flush_mode(&self) -> FlushMode {
        self.state.lock().await.flush_mode
    }

    /// Takes all pending writes, resetting the buffer.
    pub async fn take_pending(&self) -> Vec<PendingWrite> {
        let mut state = self.state.lock().await;
        state.last_flush = Instant::now();
        state.pending_size = 0;
        std::mem::take(&mut state.pending)
            .into_iter()
            .map(|(_, w)| w)
            .collect()
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Estimated buffer size in bytes.
    pub async fn buffer_size(&self) -> usize {
        self.state.lock().await.pending_size
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.pending.is_empty()
    }
}

impl Default for PendingWriteQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceLayer for PendingWriteQueue {
    fn kind(&self) -> LayerKind {
        LayerKind::PendingWrites
    }

    async fn snapshot(&self) -> LayerResult<Vec<LayerEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .pending
            .iter()
            .map(|(seq, w)| LayerEntry::owned_by(w.key(*seq), w.owner_id.clone()))
            .collect())
    }

    async fn purge(&self, keys: &[String]) -> LayerResult<usize> {
        let mut state = self.state.lock().await;
        let before = state.pending.len();
        state.pending.retain(|(seq, w)| !keys.contains(&w.key(*seq)));
        let removed = before - state.pending.len();
        state.pending_size = state
            .pending
            .iter()
            .map(|(_, w)| serde_json::to_vec(&w.payload).map(|v| v.len()).unwrap_or(128))
            .sum();
        Ok(removed)
    }
}
