//! Per-user key lifecycle.
//!
//! Holds at most one derived key, bound to exactly one authenticated
//! identity. The key is created on sign-in (after the salt is fetched) and
//! destroyed on sign-out or identity switch, before any other key is derived.

use crate::error::{CryptoError, CryptoResult};
use crate::key::{derive_key, DerivedKey, KdfParams, Salt};
use catchlog_types::Identity;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

struct BoundKey {
    identity_id: String,
    key: Arc<DerivedKey>,
}

/// Derives and holds the active identity's encryption key.
pub struct KeyDeriver {
    params: KdfParams,
    slot: RwLock<Option<BoundKey>>,
}

impl KeyDeriver {
    pub fn new(params: KdfParams) -> Self {
        Self {
            params,
            slot: RwLock::new(None),
        }
    }

    /// Derives the key for `identity` and keeps it in memory.
    ///
    /// Secret material is `identity_id || 0x00 || secret_hint`. Guests and
    /// missing hints fail with [`CryptoError::KeyDerivation`]; so does an
    /// attempt to derive while another identity's key is still held.
    pub fn derive_key(
        &self,
        identity: &Identity,
        secret_hint: Option<&str>,
        salt: &Salt,
    ) -> CryptoResult<()> {
        if identity.is_guest() {
            return Err(CryptoError::KeyDerivation(
                "guest identities have no encryption key".to_string(),
            ));
        }
        let hint = secret_hint
            .filter(|h| !h.is_empty())
            .ok_or_else(|| {
                CryptoError::KeyDerivation(format!(
                    "secret material unavailable for {}",
                    identity.id()
                ))
            })?;

        if let Some(bound) = self.bound_identity() {
            if bound != identity.id() {
                return Err(CryptoError::KeyDerivation(format!(
                    "key for {bound} must be cleared before deriving for {}",
                    identity.id()
                )));
            }
        }

        let mut secret = Vec::with_capacity(identity.id().len() + 1 + hint.len());
        secret.extend_from_slice(identity.id().as_bytes());
        secret.push(0);
        secret.extend_from_slice(hint.as_bytes());

        let derived = derive_key(&secret, salt, &self.params);
        zeroize::Zeroize::zeroize(&mut secret);
        let key = derived?;

        info!(
            "derived encryption key for {} (fingerprint {})",
            identity.id(),
            key.fingerprint()
        );

        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(BoundKey {
            identity_id: identity.id().to_string(),
            key: Arc::new(key),
        });
        Ok(())
    }

    /// Discards the in-memory key. The bytes are zeroized once the last
    /// in-flight user drops its handle.
    pub fn clear(&self) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(bound) = slot.take() {
            debug!("cleared encryption key for {}", bound.identity_id);
        }
    }

    pub fn is_ready(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// The identity the held key belongs to.
    pub fn bound_identity(&self) -> Option<String> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|b| b.identity_id.clone())
    }

    pub fn fingerprint(&self) -> Option<String> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|b| b.key.fingerprint())
    }

    /// Returns the key for records owned by `owner_id`.
    ///
    /// Fails with [`CryptoError::OwnerMismatch`] when the key belongs to a
    /// different identity.
    pub fn key_for(&self, owner_id: &str) -> CryptoResult<Arc<DerivedKey>> {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        let bound = slot.as_ref().ok_or(CryptoError::NotReady)?;
        if bound.identity_id != owner_id {
            return Err(CryptoError::OwnerMismatch {
                bound: bound.identity_id.clone(),
                requested: owner_id.to_string(),
            });
        }
        Ok(Arc::clone(&bound.key))
    }
}

impl Default for KeyDeriver {
    fn default() -> Self {
        Self::new(KdfParams::default())
    }
}
