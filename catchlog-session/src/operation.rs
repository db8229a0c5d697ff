use std::fmt;

/// Read/write classification of a named storage operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Read,
    Write,
}

const READ_PREFIXES: &[&str] = &[
    "get", "list", "read", "fetch", "load", "search", "count", "find", "query", "view",
];

impl OperationKind {
    /// Classifies by name prefix. Anything not recognizably a read is a write.
    pub fn classify(operation: &str) -> Self {
        let name = operation.trim().to_ascii_lowercase();
        if READ_PREFIXES.iter().any(|p| name.starts_with(p)) {
            OperationKind::Read
        } else {
            OperationKind::Write
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, OperationKind::Read)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Read => write!(f, "read"),
            OperationKind::Write => write!(f, "write"),
        }
    }
}
