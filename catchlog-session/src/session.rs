//! The active identity and its key, passed explicitly to components.

use catchlog_crypto::{CryptoError, CryptoResult, DerivedKey, KeyDeriver};
use crate::error::{SessionError, SessionResult};
use catchlog_types::Identity;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// Holds exactly one active identity and the key deriver bound to it.
pub struct Session {
    active: RwLock<Option<Identity>>,
    keys: Arc<KeyDeriver>,
}

impl Session {
    pub fn new(keys: Arc<KeyDeriver>) -> Self {
        Self {
            active: RwLock::new(None),
            keys,
        }
    }

    /// Makes `identity` active and returns the previous one.
    ///
    /// A key bound to any other identity is revoked first.
    pub fn open(&self, identity: Identity) -> Option<Identity> {
        if let Some(bound) = self.keys.bound_identity()
            && bound != identity.id()
        {
            self.keys.clear();
        }
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        info!("Session opened for {}", identity);
        active.replace(identity)
    }

    /// Ends the active session and revokes the key.
    pub fn close(&self) -> Option<Identity> {
        self.keys.clear();
        let previous = self
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(ref id) = previous {
            info!("Session closed for {}", id);
        }
        previous
    }

    pub fn active(&self) -> Option<Identity> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Id of the active identity when it is authenticated.
    pub fn authenticated_id(&self) -> Option<String> {
        self.active()
            .filter(Identity::is_authenticated)
            .map(|i| i.id().to_string())
    }

    /// The active identity, which must be authenticated.
    pub fn require_authenticated(&self) -> SessionResult<Identity> {
        self.active()
            .filter(Identity::is_authenticated)
            .ok_or(SessionError::NoActiveSession)
    }

    pub fn keys(&self) -> &Arc<KeyDeriver> {
        &self.keys
    }

    /// The active identity's key.
    pub fn key(&self) -> CryptoResult<Arc<DerivedKey>> {
        let owner = self.authenticated_id().ok_or(CryptoError::NotReady)?;
        self.keys.key_for(&owner)
    }

    /// Authenticated session with a key and the given owner.
    pub fn is_ready_for(&self, owner_id: &str) -> bool {
        self.authenticated_id().as_deref() == Some(owner_id) && self.keys.key_for(owner_id).is_ok()
    }
}
