//! Shared domain types for CatchLog.
//!
//! Everything here is plain data: identities, records and their photo
//! attachments, the ciphertext envelope wire format, and the identity
//! lifecycle events. No I/O and no key material lives in this crate.

mod envelope;
mod event;
mod identity;
mod photo;
mod record;

pub use envelope::{
    CipherEnvelope, PhotoEnvelope, PhotoEnvelopeMeta, AUTH_TAG_SIZE, ENVELOPE_VERSION, IV_SIZE,
};
pub use event::IdentityEvent;
pub use identity::{Identity, IdentityMode, GUEST_ID_PREFIX};
pub use photo::{Photo, PhotoStorage};
pub use record::{CandidateId, ParseCandidateIdError, Record, RecordType};
