//! Registry of background tasks and timers started on behalf of an identity.

use crate::layer::{LayerEntry, LayerKind, LayerResult, PersistenceLayer};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::debug;

struct Tracked {
    owner_id: Option<String>,
    handle: AbortHandle,
}

#[derive(Clone, Default)]
pub struct InFlightRegistry {
    tasks: Arc<Mutex<BTreeMap<String, Tracked>>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks an already spawned task under `name`.
    pub fn track<T>(&self, name: impl Into<String>, owner_id: Option<&str>, handle: &JoinHandle<T>) {
        let name = name.into();
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = tasks.insert(
            name.clone(),
            Tracked {
                owner_id: owner_id.map(String::from),
                handle: handle.abort_handle(),
            },
        ) {
            debug!("Replacing tracked task {}", name);
            old.handle.abort();
        }
    }

    /// Spawns and tracks `fut`.
    pub fn spawn<F>(&self, name: impl Into<String>, owner_id: Option<&str>, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let handle = tokio::spawn(fut);
        self.track(name, owner_id, &handle);
        handle
    }

    /// Runs `fut` after `delay` unless aborted first.
    pub fn schedule_after<F>(
        &self,
        name: impl Into<String>,
        owner_id: Option<&str>,
        delay: Duration,
        fut: F,
    ) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.spawn(name, owner_id, async move {
            tokio::time::sleep(delay).await;
            fut.await
        })
    }

    /// Number of tracked tasks still running.
    pub fn active_count(&self) -> usize {
        self.prune();
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn prune(&self) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, t| !t.handle.is_finished());
    }
}

#[async_trait]
impl PersistenceLayer for InFlightRegistry {
    fn kind(&self) -> LayerKind {
        LayerKind::InFlight
    }

    async fn snapshot(&self) -> LayerResult<Vec<LayerEntry>> {
        self.prune();
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(tasks
            .iter()
            .map(|(name, t)| LayerEntry {
                key: format!("task:{name}"),
                owner_hint: t.owner_id.clone(),
            })
            .collect())
    }

    async fn purge(&self, keys: &[String]) -> LayerResult<usize> {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let mut aborted = 0;
        for key in keys {
            let Some(name) = key.strip_prefix("task:") else {
                continue;
            };
            if let Some(t) = tasks.remove(name) {
                t.handle.abort();
                aborted += 1;
            }
        }
        Ok(aborted)
    }
}
