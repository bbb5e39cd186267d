//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("invalid content id: {0}")]
    InvalidContentId(String),

    #[error("invalid alias id: {0}")]
    InvalidAliasId(String),

    #[error("invalid filename: {0}")]
    InvalidFilename(String),

    #[error("invalid staging id: {0}")]
    InvalidStagingId(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
