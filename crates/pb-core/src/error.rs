//! Error type shared by node construction and the pathname operations.

/// Structural failures raised by the rule tree.
///
/// Every variant is fatal to the operation that raised it; callers must
/// surface it rather than continue with a partially-applied edit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("node not found: `{key}`")]
    NotFound { key: String },
    #[error("cannot {operation} on `{key}`: not a group")]
    InvalidOperation { key: String, operation: &'static str },
    #[error("node has no identifying field (name, url or word)")]
    MissingKey,
    #[error("{kind} node is missing required field `{field}`")]
    MissingField { kind: &'static str, field: &'static str },
    #[error("duplicate sibling key `{key}`")]
    DuplicateKey { key: String },
    #[error("root violation: {0}")]
    RootViolation(&'static str),
    #[error("invalid time `{value}`: expected HH:MM")]
    InvalidTime { value: String },
}
