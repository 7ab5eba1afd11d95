//! Error types for identifier parsing.

use thiserror::Error;

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The identifier string is empty.
    #[error("{kind} cannot be empty")]
    Empty { kind: &'static str },

    /// The identifier is not a valid UUID.
    #[error("invalid {kind} '{value}': {message}")]
    InvalidUuid {
        kind: &'static str,
        value: String,
        message: String,
    },
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty { .. })
    }

    /// The kind of identifier that failed to parse.
    pub fn kind(&self) -> &'static str {
        match self {
            IdError::Empty { kind } | IdError::InvalidUuid { kind, .. } => kind,
        }
    }
}
