//! ChaCha20-Poly1305 sealing into the envelope wire format.

use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use catchlog_types::{AUTH_TAG_SIZE, CipherEnvelope, ENVELOPE_VERSION, IV_SIZE, RecordType};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

/// Nonce (IV) size in bytes.
pub const NONCE_SIZE: usize = IV_SIZE;

/// Poly1305 tag size in bytes.
pub const TAG_SIZE: usize = AUTH_TAG_SIZE;

/// Associated data binding a field ciphertext to its owner, record and field.
pub fn field_aad(owner_id: &str, record_type: RecordType, record_id: &str, field: &str) -> Vec<u8> {
    format!("catchlog/v{ENVELOPE_VERSION}/field/{owner_id}/{record_type}/{record_id}/{field}")
        .into_bytes()
}

/// Associated data binding a photo ciphertext to its owner and photo id.
pub fn photo_aad(owner_id: &str, photo_id: &str) -> Vec<u8> {
    format!("catchlog/v{ENVELOPE_VERSION}/photo/{owner_id}/{photo_id}").into_bytes()
}

/// Encrypts `plaintext` under `key`, splitting the tag out into the envelope.
pub fn seal(key: &DerivedKey, plaintext: &[u8], aad: &[u8]) -> CryptoResult<CipherEnvelope> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);

    let mut sealed = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let tag = sealed.split_off(sealed.len() - TAG_SIZE);

    Ok(CipherEnvelope {
        iv: STANDARD.encode(nonce),
        ciphertext: STANDARD.encode(&sealed),
        auth_tag: STANDARD.encode(&tag),
        version: ENVELOPE_VERSION,
    })
}

/// Decrypts an envelope. Fails on a wrong key, wrong associated data or tampering.
pub fn open(key: &DerivedKey, envelope: &CipherEnvelope, aad: &[u8]) -> CryptoResult<Vec<u8>> {
    if envelope.version != ENVELOPE_VERSION {
        return Err(CryptoError::InvalidEnvelope(format!(
            "unsupported envelope version {}",
            envelope.version
        )));
    }

    let iv = decode_part("iv", &envelope.iv)?;
    let mut sealed = decode_part("ciphertext", &envelope.ciphertext)?;
    let tag = decode_part("authTag", &envelope.auth_tag)?;

    if iv.len() != NONCE_SIZE {
        return Err(CryptoError::InvalidEnvelope(format!(
            "iv must be {NONCE_SIZE} bytes, got {}",
            iv.len()
        )));
    }
    if tag.len() != TAG_SIZE {
        return Err(CryptoError::InvalidEnvelope(format!(
            "authTag must be {TAG_SIZE} bytes, got {}",
            tag.len()
        )));
    }
    sealed.extend_from_slice(&tag);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .decrypt(Nonce::from_slice(&iv), Payload { msg: &sealed, aad })
        .map_err(|_| {
            CryptoError::Decryption("authentication failed (wrong key or tampered data)".to_string())
        })
}

fn decode_part(name: &str, value: &str) -> CryptoResult<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|e| CryptoError::InvalidEnvelope(format!("{name} is not valid base64: {e}")))
}
