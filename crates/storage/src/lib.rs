//! Object storage tiers for librarian.
//!
//! This crate provides:
//! - A local filesystem store that also holds the upload staging area
//! - An HTTP/1.1 client for the remote store with an explicit connection pool
//! - A router that serves reads from either tier and migrates content between them

pub mod backends;
pub mod error;
pub mod key;
pub mod pool;
pub mod router;
pub mod stream;
pub mod traits;

pub use backends::{
    filesystem::{FilesystemBackend, StagedFile},
    remote::RemoteBackend,
};
pub use error::{StorageError, StorageResult};
pub use key::{STAGING_DIR, content_key, staging_key};
pub use pool::{ConnectionPool, Lease, PoolStats, PooledConnection, Release};
pub use router::{Location, MigrationOutcome, StorageRouter};
pub use stream::{BlobStream, Tier};
pub use traits::{ByteStream, ObjectMeta, ObjectStore, StreamingUpload};

use librarian_core::config::StorageConfig;
use std::sync::Arc;

/// Build the storage router from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<StorageRouter>> {
    config.validate().map_err(StorageError::Config)?;

    let local = Arc::new(FilesystemBackend::new(&config.local_path).await?);
    let remote = match &config.remote {
        Some(remote) => {
            let backend: Arc<dyn ObjectStore> = Arc::new(RemoteBackend::new(remote)?);
            Some(backend)
        }
        None => None,
    };

    Ok(Arc::new(StorageRouter::new(local, remote)))
}
