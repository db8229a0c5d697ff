//! Photo blob encryption.
//!
//! Content hashes are computed on the plaintext before encryption, so a
//! corrupted or swapped blob is caught even when the AEAD tag checks out
//! (e.g. an envelope copied between two photos of the same owner).

use crate::cipher::{open, photo_aad, seal};
use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use catchlog_types::{Photo, PhotoEnvelope, PhotoStorage, Record};
use sha2::{Digest, Sha256};

/// Encrypts and decrypts photo payloads.
#[derive(Clone, Copy, Debug, Default)]
pub struct PhotoCodec;

impl PhotoCodec {
    /// Hex SHA-256 of `bytes`.
    pub fn content_hash(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    /// Checks `bytes` against an expected content hash.
    pub fn verify_content(bytes: &[u8], expected: &str) -> CryptoResult<()> {
        let actual = Self::content_hash(bytes);
        if actual != expected {
            return Err(CryptoError::Integrity {
                expected: expected.to_string(),
                actual,
            });
        }
        Ok(())
    }

    /// True when any photo of `record` is still plaintext.
    pub fn needs_encryption(&self, record: &Record) -> bool {
        record.has_unencrypted_photos()
    }

    pub fn encrypt(
        &self,
        key: &DerivedKey,
        owner_id: &str,
        photo_id: &str,
        bytes: &[u8],
        mime_type: &str,
    ) -> CryptoResult<PhotoEnvelope> {
        let content_hash = Self::content_hash(bytes);
        let cipher = seal(key, bytes, &photo_aad(owner_id, photo_id))?;
        Ok(PhotoEnvelope {
            cipher,
            original_mime: mime_type.to_string(),
            original_size: bytes.len() as u64,
            content_hash,
        })
    }

    /// Decrypts and verifies the plaintext against the envelope's content hash.
    pub fn decrypt(
        &self,
        key: &DerivedKey,
        owner_id: &str,
        photo_id: &str,
        envelope: &PhotoEnvelope,
    ) -> CryptoResult<Vec<u8>> {
        let bytes = open(key, &envelope.cipher, &photo_aad(owner_id, photo_id))?;
        Self::verify_content(&bytes, &envelope.content_hash)?;
        if bytes.len() as u64 != envelope.original_size {
            return Err(CryptoError::Integrity {
                expected: format!("{} bytes", envelope.original_size),
                actual: format!("{} bytes", bytes.len()),
            });
        }
        Ok(bytes)
    }

    /// Encrypts an inline photo in place. Already-encrypted photos and
    /// out-of-line photos are returned unchanged.
    ///
    /// A recorded content hash must match the inline bytes; a mismatch fails
    /// with [`CryptoError::Integrity`] instead of sealing corrupted data.
    pub fn encrypt_inline(&self, key: &DerivedKey, owner_id: &str, photo: &Photo) -> CryptoResult<Photo> {
        let PhotoStorage::Inline { data } = &photo.storage else {
            return Ok(photo.clone());
        };
        if let Some(expected) = &photo.content_hash {
            Self::verify_content(data, expected)?;
        }
        let envelope = self.encrypt(key, owner_id, &photo.id, data, &photo.mime_type)?;
        Ok(Photo {
            content_hash: Some(envelope.content_hash.clone()),
            storage: PhotoStorage::InlineEncrypted { envelope },
            ..photo.clone()
        })
    }

    /// Points `photo` at an out-of-line envelope written to `path`.
    pub fn attach_out_of_line(photo: &Photo, path: &str, envelope: &PhotoEnvelope) -> Photo {
        Photo {
            content_hash: Some(envelope.content_hash.clone()),
            storage: PhotoStorage::OutOfLineEncrypted {
                path: path.to_string(),
                meta: envelope.meta(),
            },
            ..photo.clone()
        }
    }

    /// Decrypts an inline encrypted photo, or returns plaintext inline bytes.
    pub fn read_inline(&self, key: &DerivedKey, owner_id: &str, photo: &Photo) -> CryptoResult<Vec<u8>> {
        match &photo.storage {
            PhotoStorage::Inline { data } => Ok(data.clone()),
            PhotoStorage::InlineEncrypted { envelope } => {
                self.decrypt(key, owner_id, &photo.id, envelope)
            }
            _ => Err(CryptoError::InvalidEnvelope(format!(
                "photo {} is stored out of line",
                photo.id
            ))),
        }
    }
}
