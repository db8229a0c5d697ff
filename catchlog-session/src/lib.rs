//! Session context and isolation guard for CatchLog.
//!
//! - [`Session`]: the single active identity and its key deriver.
//! - [`IdentityEvents`]: typed broadcast of identity transitions.
//! - [`SessionGuard`]: ownership validation on every storage operation and
//!   exhaustive, verified teardown of every [`PersistenceLayer`] when the
//!   identity changes.

mod config;
mod error;
mod events;
mod guard;
mod layer;
pub mod layers;
mod operation;
mod risk;
mod session;

pub use config::SessionConfig;
pub use error::{SessionError, SessionResult};
pub use events::IdentityEvents;
pub use guard::{LayerOutcome, SessionGuard, TeardownReport};
pub use layer::{LayerEntry, LayerKind, LayerResult, PersistenceArtifact, PersistenceLayer};
pub use operation::OperationKind;
pub use risk::{Risk, RiskRule, RiskTable};
pub use session::Session;
