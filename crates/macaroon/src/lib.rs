//! Macaroons for delegating read access to restricted content.
//!
//! This crate provides:
//! - Minting and verification on top of the `macaroon` crate
//! - Tokens in the binary V2 format, base64url encoded
//! - Parsing of the caveats librarian understands

pub mod caveat;
pub mod error;
pub mod token;

pub use caveat::Caveat;
pub use error::{MacaroonError, MacaroonResult};
pub use token::Macaroon;
