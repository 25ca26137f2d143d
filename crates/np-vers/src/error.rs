//! Error types for version parsing and patch identifiers.

use thiserror::Error;

/// Errors from parsing version strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersError {
    #[error("unparseable version: {0:?}")]
    Unparseable(String),

    #[error("version component out of range in {0:?}")]
    OutOfRange(String),
}

/// Errors from composing or decomposing patch identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchIdError {
    #[error("malformed patch identifier: {0:?}")]
    Malformed(String),

    #[error("unknown driver kind: {0:?}")]
    UnknownKind(String),

    #[error("invalid driver name: {0:?}")]
    InvalidName(String),

    #[error("empty range [{start}, {end})")]
    EmptyRange { start: String, end: String },

    #[error(transparent)]
    Version(#[from] VersError),
}
