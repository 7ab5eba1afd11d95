//! Error types for payload encoding and decoding.

use thiserror::Error;

/// Errors that can occur when decoding a payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The payload is not valid YAML.
    #[error("payload is not valid YAML: {0}")]
    Syntax(String),

    /// The payload is valid YAML but not a mapping.
    #[error("payload must be a mapping")]
    NotAMapping,

    /// The payload has no top-level key.
    #[error("payload is empty")]
    Empty,

    /// The top-level key does not name a known command.
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// The payload has more than one top-level key.
    #[error("payload must have exactly one top-level key, found: {}", .0.join(", "))]
    UnexpectedKeys(Vec<String>),

    /// The payload names a different command than the frame carrying it.
    #[error("expected '{expected}' payload, found '{found}'")]
    KindMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// A required field is absent.
    #[error("{section}: missing required field '{field}'")]
    MissingField {
        section: &'static str,
        field: &'static str,
    },

    /// A field is present but malformed, or an unknown field is present.
    #[error("{section}: {message}")]
    InvalidField {
        section: &'static str,
        message: String,
    },
}

impl DecodeError {
    /// Returns true when the payload was structurally sound but its
    /// command section was corrupt or incomplete.
    ///
    /// The remaining errors mean the payload as a whole is corrupt.
    pub fn is_invalid_data(&self) -> bool {
        matches!(
            self,
            DecodeError::MissingField { .. } | DecodeError::InvalidField { .. }
        )
    }
}

impl From<serde_yaml::Error> for DecodeError {
    fn from(err: serde_yaml::Error) -> Self {
        DecodeError::Syntax(err.to_string())
    }
}

/// Errors that can occur when encoding a payload.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Serialization error.
    #[error("failed to serialize payload: {0}")]
    Serialization(#[from] serde_yaml::Error),
}
