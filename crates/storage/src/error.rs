//! Storage error types.

use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object already exists: {0}")]
    AlreadyExists(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("remote store returned {status} for {key}")]
    UnexpectedStatus { status: u16, key: String },

    #[error("remote store error: {0}")]
    Remote(String),

    #[error("upload not confirmed for {key}: {reason}")]
    NotConfirmed { key: String, reason: String },

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no remote store configured")]
    NoRemote,
}

impl StorageError {
    /// Whether the error means the object is absent, as opposed to the
    /// backend failing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
