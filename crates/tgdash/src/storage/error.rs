//! Storage error types.

use thiserror::Error;

/// Result type for key-value storage operations.
pub type KvResult<T> = Result<T, KvError>;

/// Errors that can occur during key-value storage operations.
#[derive(Debug, Error)]
pub enum KvError {
    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Key contains characters that cannot be mapped to storage.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Storage backend error.
    #[error("backend error: {0}")]
    Backend(String),
}
