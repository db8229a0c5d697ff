//! Key material and Argon2id derivation.

use crate::error::{CryptoError, CryptoResult};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of a derived key in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Size of a KDF salt in bytes.
pub const SALT_SIZE: usize = 16;

/// A 256-bit symmetric key. Zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Short non-reversible identifier for logs and equality checks.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.bytes);
        hex::encode(&digest[..8])
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKey")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// Device-independent KDF salt, held server-side per account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    pub fn random() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != SALT_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: SALT_SIZE,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; SALT_SIZE];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }
}

/// Argon2id cost parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Minimal cost parameters for tests.
    pub fn fast() -> Self {
        Self {
            memory_kib: 256,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// Derives a key from secret material with Argon2id.
pub fn derive_key(secret: &[u8], salt: &Salt, params: &KdfParams) -> CryptoResult<DerivedKey> {
    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::KeyDerivation(format!("invalid KDF params: {e}")))?;

    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);
    let mut out = [0u8; KEY_SIZE];
    argon
        .hash_password_into(secret, salt.as_bytes(), &mut out)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let key = DerivedKey::from_bytes(out);
    out.zeroize();
    Ok(key)
}
