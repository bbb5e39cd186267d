//! Core domain types and shared logic for the librarian.
//!
//! This crate defines the vocabulary shared by the storage, metadata and
//! server crates:
//! - Content and alias identifiers
//! - The md5/sha1/sha256 digest triple and its incremental accumulator
//! - Access namespaces
//! - Application configuration

pub mod config;
pub mod digest;
pub mod error;
pub mod ids;
pub mod namespace;

pub use digest::{ContentDigests, DigestAccumulator, Sha1Hex};
pub use error::{Error, Result};
pub use ids::{AliasId, ContentId, StagingId, validate_filename};
pub use namespace::Namespace;

/// Default maximum upload size: 4 GiB
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Read chunk size used when streaming content: 64 KiB
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;
