//! Encryption of the sensitive fields of a record.
//!
//! Which fields are sensitive is decided per record type by a
//! [`FieldPolicy`]. Configured fields are replaced by a ciphertext envelope
//! of their JSON-serialized value; every other field passes through. The
//! codec is pure: no I/O and no key lookup.

use crate::cipher::{field_aad, open, seal};
use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use catchlog_types::{CipherEnvelope, Record, RecordType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Sensitive field names per record type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPolicy {
    fields: BTreeMap<RecordType, Vec<String>>,
}

impl Default for FieldPolicy {
    fn default() -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(
            RecordType::Trip,
            vec!["notes", "location", "companions", "water_body"],
        );
        fields.insert(RecordType::WeatherLog, vec!["notes", "location", "observations"]);
        fields.insert(RecordType::FishCatch, vec!["notes", "location", "gear", "bait"]);
        Self {
            fields: fields
                .into_iter()
                .map(|(k, v)| (k, v.into_iter().map(String::from).collect()))
                .collect(),
        }
    }
}

impl FieldPolicy {
    /// A policy with no sensitive fields configured.
    pub fn empty() -> Self {
        Self {
            fields: BTreeMap::new(),
        }
    }

    pub fn with_fields(mut self, record_type: RecordType, fields: &[&str]) -> Self {
        self.fields
            .insert(record_type, fields.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn fields_for(&self, record_type: RecordType) -> &[String] {
        self.fields
            .get(&record_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Encrypts and decrypts configured record fields.
#[derive(Clone, Debug, Default)]
pub struct FieldCodec {
    policy: FieldPolicy,
}

impl FieldCodec {
    pub fn new(policy: FieldPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &FieldPolicy {
        &self.policy
    }

    /// True when at least one configured field still holds plaintext.
    pub fn needs_encryption(&self, record: &Record) -> bool {
        self.policy
            .fields_for(record.record_type)
            .iter()
            .any(|name| match record.fields.get(name) {
                None | Some(Value::Null) => false,
                Some(v) => !CipherEnvelope::is_envelope(v),
            })
    }

    /// Returns a copy of `record` with every plaintext configured field sealed.
    ///
    /// Fields that are already envelopes are left untouched, so calling this
    /// twice is a no-op the second time.
    pub fn encrypt_fields(&self, key: &DerivedKey, record: &Record) -> CryptoResult<Record> {
        let mut out = record.clone();
        for name in self.policy.fields_for(record.record_type) {
            let Some(value) = record.fields.get(name) else {
                continue;
            };
            if value.is_null() || CipherEnvelope::is_envelope(value) {
                continue;
            }
            let plaintext = serde_json::to_vec(value)?;
            let aad = field_aad(&record.owner_id, record.record_type, &record.id, name);
            let envelope = seal(key, &plaintext, &aad)?;
            out.fields.insert(name.clone(), envelope.to_value());
        }
        Ok(out)
    }

    /// Exact inverse of [`encrypt_fields`](Self::encrypt_fields).
    ///
    /// Fails on the first field that does not authenticate.
    pub fn decrypt_fields(&self, key: &DerivedKey, record: &Record) -> CryptoResult<Record> {
        let mut out = record.clone();
        for name in self.policy.fields_for(record.record_type) {
            let Some(envelope) = record.fields.get(name).and_then(CipherEnvelope::from_value)
            else {
                continue;
            };
            let value = self.open_field(key, record, name, &envelope)?;
            out.fields.insert(name.clone(), value);
        }
        Ok(out)
    }

    /// Decrypts what it can. Undecryptable fields stay as envelopes and are
    /// returned by name so the caller can mark just that record degraded.
    pub fn decrypt_fields_lossy(&self, key: &DerivedKey, record: &Record) -> (Record, Vec<String>) {
        let mut out = record.clone();
        let mut failed = Vec::new();
        for name in self.policy.fields_for(record.record_type) {
            let Some(envelope) = record.fields.get(name).and_then(CipherEnvelope::from_value)
            else {
                continue;
            };
            match self.open_field(key, record, name, &envelope) {
                Ok(value) => {
                    out.fields.insert(name.clone(), value);
                }
                Err(e) => {
                    tracing::warn!(
                        "field {name} of {} could not be decrypted: {e}",
                        record.candidate_id()
                    );
                    failed.push(name.clone());
                }
            }
        }
        (out, failed)
    }

    /// Number of configured fields currently holding envelopes.
    pub fn encrypted_field_count(&self, record: &Record) -> usize {
        self.policy
            .fields_for(record.record_type)
            .iter()
            .filter(|name| {
                record
                    .fields
                    .get(*name)
                    .is_some_and(CipherEnvelope::is_envelope)
            })
            .count()
    }

    fn open_field(
        &self,
        key: &DerivedKey,
        record: &Record,
        name: &str,
        envelope: &CipherEnvelope,
    ) -> CryptoResult<Value> {
        let aad = field_aad(&record.owner_id, record.record_type, &record.id, name);
        let plaintext = open(key, envelope, &aad)?;
        serde_json::from_slice(&plaintext).map_err(|e| {
            CryptoError::Decryption(format!("field {name} decrypted to invalid JSON: {e}"))
        })
    }
}
