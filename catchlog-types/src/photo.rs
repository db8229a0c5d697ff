use crate::envelope::{PhotoEnvelope, PhotoEnvelopeMeta};
use serde::{Deserialize, Serialize};

/// A photo attached to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Photo {
    pub id: String,
    pub mime_type: String,
    pub original_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub storage: PhotoStorage,
}

/// Where the photo bytes live, and whether they are encrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PhotoStorage {
    /// Small plaintext photo embedded in the record.
    Inline {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    /// Plaintext photo referenced by blob path.
    OutOfLine { path: String },
    /// Encrypted photo embedded in the record.
    InlineEncrypted { envelope: PhotoEnvelope },
    /// Encrypted photo envelope stored at `path`.
    OutOfLineEncrypted {
        path: String,
        meta: PhotoEnvelopeMeta,
    },
}

impl Photo {
    pub fn inline(id: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            mime_type: mime_type.into(),
            original_size: data.len() as u64,
            content_hash: None,
            storage: PhotoStorage::Inline { data },
        }
    }

    pub fn out_of_line(
        id: impl Into<String>,
        mime_type: impl Into<String>,
        size: u64,
        path: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            mime_type: mime_type.into(),
            original_size: size,
            content_hash: None,
            storage: PhotoStorage::OutOfLine { path: path.into() },
        }
    }

    /// A photo counts as encrypted once decryption metadata is attached.
    pub fn is_encrypted(&self) -> bool {
        matches!(
            self.storage,
            PhotoStorage::InlineEncrypted { .. } | PhotoStorage::OutOfLineEncrypted { .. }
        )
    }

    pub fn is_inline(&self) -> bool {
        matches!(
            self.storage,
            PhotoStorage::Inline { .. } | PhotoStorage::InlineEncrypted { .. }
        )
    }
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
