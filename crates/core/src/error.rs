//! Identifier error model.

use thiserror::Error;

/// Failure to build an identifier from untrusted input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The identifier was empty or whitespace only.
    #[error("{0} must not be empty")]
    Empty(&'static str),

    /// The identifier contained characters that are not allowed.
    #[error("invalid {kind}: {reason}")]
    Malformed { kind: &'static str, reason: String },
}

impl IdError {
    pub fn malformed(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            kind,
            reason: reason.into(),
        }
    }
}
