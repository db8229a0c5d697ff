use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix that namespaces guest session ids away from account ids.
pub const GUEST_ID_PREFIX: &str = "guest:";

/// Whether an identity is an ephemeral guest or a signed-in account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMode {
    Guest,
    Authenticated,
}

impl fmt::Display for IdentityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityMode::Guest => write!(f, "guest"),
            IdentityMode::Authenticated => write!(f, "authenticated"),
        }
    }
}

/// The active user context.
///
/// Authenticated ids are stable account ids handed out by the identity
/// provider. Guest ids are generated per device session and always carry
/// the [`GUEST_ID_PREFIX`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    id: String,
    mode: IdentityMode,
}

impl Identity {
    pub fn authenticated(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            mode: IdentityMode::Authenticated,
        }
    }

    /// Creates a fresh ephemeral guest identity.
    pub fn guest() -> Self {
        Self {
            id: format!("{GUEST_ID_PREFIX}{}", uuid::Uuid::new_v4()),
            mode: IdentityMode::Guest,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mode(&self) -> IdentityMode {
        self.mode
    }

    pub fn is_guest(&self) -> bool {
        self.mode == IdentityMode::Guest
    }

    pub fn is_authenticated(&self) -> bool {
        self.mode == IdentityMode::Authenticated
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.mode)
    }
}
