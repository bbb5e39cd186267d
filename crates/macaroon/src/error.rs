//! Macaroon error types.

use thiserror::Error;

/// Macaroon errors.
#[derive(Debug, Error)]
pub enum MacaroonError {
    #[error("invalid encoding: {0}")]
    Encoding(String),

    #[error("cannot mint macaroon: {0}")]
    Mint(String),

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("caveat not satisfied: {0}")]
    UnsatisfiedCaveat(String),
}

/// Result type for macaroon operations.
pub type MacaroonResult<T> = std::result::Result<T, MacaroonError>;
