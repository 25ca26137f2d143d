//! Error types for the build backend.

use thiserror::Error;

/// Errors that keep a build from producing a verdict at all.
///
/// A compile failure is not an error: it is a verdict with `ok == false`.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to export source at {commit}: {reason}")]
    Export { commit: String, reason: String },

    #[error("failed to start {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("empty command template")]
    EmptyTemplate,
}

/// Result type for build operations.
pub type BuildResult<T> = Result<T, BuildError>;

/// Errors from the verification cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid cache entry {path}: {reason}")]
    InvalidEntry { path: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
