//! Typed identity event bus.

use catchlog_types::{Identity, IdentityEvent};
use tokio::sync::broadcast;
use tracing::debug;

const DEFAULT_CAPACITY: usize = 64;

/// Publish/subscribe channel for identity transitions.
#[derive(Clone)]
pub struct IdentityEvents {
    tx: broadcast::Sender<IdentityEvent>,
}

impl IdentityEvents {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IdentityEvent> {
        self.tx.subscribe()
    }

    /// Returns the number of subscribers that received the event.
    pub fn publish(&self, event: IdentityEvent) -> usize {
        debug!("Identity event: {:?}", event);
        self.tx.send(event).unwrap_or(0)
    }

    pub fn identity_changed(&self, previous: Option<Identity>, new: Option<Identity>) -> usize {
        self.publish(IdentityEvent::Changed { previous, new })
    }

    pub fn data_ready(&self, identity: &Identity) -> usize {
        self.publish(IdentityEvent::DataReady {
            owner_id: identity.id().to_string(),
            is_guest: identity.is_guest(),
        })
    }
}

impl Default for IdentityEvents {
    fn default() -> Self {
        Self::new()
    }
}
