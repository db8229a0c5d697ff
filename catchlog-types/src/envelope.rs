//! Ciphertext envelope wire format.
//!
//! A field envelope replaces a plaintext JSON value at rest:
//! `{ "iv", "ciphertext", "authTag", "version" }` with base64 strings.
//! Photo envelopes add the original mime type, size and a SHA-256 content
//! hash of the plaintext so corruption is detectable on its own.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

/// Decoded IV length in bytes.
pub const IV_SIZE: usize = 12;

/// Decoded authentication tag length in bytes.
pub const AUTH_TAG_SIZE: usize = 16;

const ENVELOPE_KEYS: [&str; 4] = ["iv", "ciphertext", "authTag", "version"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CipherEnvelope {
    pub iv: String,
    pub ciphertext: String,
    pub auth_tag: String,
    pub version: u8,
}

impl CipherEnvelope {
    /// Parses an envelope out of a stored field value.
    ///
    /// Only an object with exactly the four envelope keys qualifies, and its
    /// parts must decode: base64 throughout, a 12-byte IV, a 16-byte tag and
    /// a non-zero version. A user value that merely has the same key names
    /// is still plaintext.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if obj.len() != ENVELOPE_KEYS.len() || !ENVELOPE_KEYS.iter().all(|k| obj.contains_key(*k)) {
            return None;
        }
        let envelope: Self = serde_json::from_value(value.clone()).ok()?;
        envelope.is_well_formed().then_some(envelope)
    }

    fn is_well_formed(&self) -> bool {
        let decoded_len = |part: &str| STANDARD.decode(part).ok().map(|b| b.len());
        self.version >= 1
            && decoded_len(&self.iv) == Some(IV_SIZE)
            && decoded_len(&self.auth_tag) == Some(AUTH_TAG_SIZE)
            && decoded_len(&self.ciphertext).is_some()
    }

    pub fn is_envelope(value: &Value) -> bool {
        Self::from_value(value).is_some()
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "iv": self.iv,
            "ciphertext": self.ciphertext,
            "authTag": self.auth_tag,
            "version": self.version,
        })
    }
}

/// Encrypted photo payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoEnvelope {
    #[serde(flatten)]
    pub cipher: CipherEnvelope,
    pub original_mime: String,
    pub original_size: u64,
    pub content_hash: String,
}

impl PhotoEnvelope {
    /// Metadata kept on the record when the envelope itself lives out of line.
    pub fn meta(&self) -> PhotoEnvelopeMeta {
        PhotoEnvelopeMeta {
            version: self.cipher.version,
            original_mime: self.original_mime.clone(),
            original_size: self.original_size,
            content_hash: self.content_hash.clone(),
        }
    }
}

/// Decryption metadata for an out-of-line encrypted photo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoEnvelopeMeta {
    pub version: u8,
    pub original_mime: String,
    pub original_size: u64,
    pub content_hash: String,
}
