//! Encryption layer for CatchLog.
//!
//! Provides client-side encryption of record fields and photo blobs using:
//! - Argon2id for deterministic per-user key derivation
//! - ChaCha20-Poly1305 for authenticated encryption
//! - Zeroization of key material on drop
//!
//! # Architecture
//!
//! A single per-user key is derived from the account id, a secret hint and
//! a device-independent salt. Because derivation is deterministic, every
//! device the user signs in on converges on the same key without any key
//! exchange.
//!
//! Every ciphertext carries associated data binding it to its owner,
//! record and field, so an envelope copied onto another record (or read
//! with another user's key) fails authentication instead of decrypting.

mod cipher;
mod error;
pub mod field_codec;
mod key;
pub mod key_deriver;
pub mod photo_codec;

pub use cipher::{field_aad, open, photo_aad, seal, NONCE_SIZE, TAG_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use field_codec::{FieldCodec, FieldPolicy};
pub use key::{derive_key, DerivedKey, KdfParams, Salt, KEY_SIZE, SALT_SIZE};
pub use key_deriver::KeyDeriver;
pub use photo_codec::PhotoCodec;
