//! Two-tier routing: new content lands on the local store, cold content is
//! moved to the remote store, and reads find it wherever it currently lives.

use crate::backends::filesystem::FilesystemBackend;
use crate::error::{StorageError, StorageResult};
use crate::key::content_key;
use crate::pool::PoolStats;
use crate::stream::{BlobStream, Tier};
use crate::traits::{ObjectStore, StreamingUpload};
use bytes::Bytes;
use dashmap::DashSet;
use futures::StreamExt;
use librarian_core::{ContentDigests, ContentId};
use std::path::Path;
use std::sync::Arc;
use tracing::instrument;

/// Where a piece of content currently lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Location {
    Local,
    Remote,
    Missing,
}

/// Result of one migration attempt that did not fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Copied, confirmed, and removed locally.
    Migrated { bytes: u64 },
    /// No local copy to move.
    NotLocal,
    /// Another migration of the same content is running.
    InProgress,
}

/// Routes content between the local and remote tiers.
pub struct StorageRouter {
    local: Arc<FilesystemBackend>,
    remote: Option<Arc<dyn ObjectStore>>,
    migrating: DashSet<ContentId>,
}

/// Marks a content id as being migrated until dropped.
struct MigratingGuard<'a> {
    set: &'a DashSet<ContentId>,
    id: ContentId,
}

impl Drop for MigratingGuard<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.id);
    }
}

impl StorageRouter {
    pub fn new(local: Arc<FilesystemBackend>, remote: Option<Arc<dyn ObjectStore>>) -> Self {
        Self {
            local,
            remote,
            migrating: DashSet::new(),
        }
    }

    pub fn local(&self) -> &Arc<FilesystemBackend> {
        &self.local
    }

    pub fn remote(&self) -> Option<&Arc<dyn ObjectStore>> {
        self.remote.as_ref()
    }

    /// Link a finished staging file into the local tier under `id`.
    /// Fails with `AlreadyExists` rather than replace stored content. The
    /// staging file itself is left for the caller to remove.
    pub async fn place(&self, staging: &Path, id: ContentId) -> StorageResult<()> {
        self.local.place_staged(staging, &content_key(id)).await
    }

    /// Remove a locally placed object whose ledger commit did not happen.
    pub async fn discard_local(&self, id: ContentId) -> StorageResult<()> {
        match self.local.delete(&content_key(id)).await {
            Ok(()) | Err(StorageError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Open content for reading. The local tier is tried first; a local miss
    /// falls through to the remote tier, which covers content that was
    /// migrated between a caller's lookup and this call.
    #[instrument(skip(self), fields(content_id = %id))]
    pub async fn open(&self, id: ContentId) -> StorageResult<BlobStream> {
        let key = content_key(id);
        match self.local.get_stream(&key).await {
            Ok(inner) => return Ok(BlobStream::new(inner, Tier::Local)),
            Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let remote = self
            .remote
            .as_ref()
            .ok_or_else(|| StorageError::NotFound(key.clone()))?;
        let inner = remote.get_stream(&key).await?;
        tracing::debug!(backend = remote.backend_name(), "local miss, serving from remote tier");
        Ok(BlobStream::new(inner, Tier::Remote))
    }

    /// Where the content currently lives.
    pub async fn locate(&self, id: ContentId) -> StorageResult<Location> {
        let key = content_key(id);
        if self.local.exists(&key).await? {
            return Ok(Location::Local);
        }
        if let Some(remote) = &self.remote
            && remote.exists(&key).await?
        {
            return Ok(Location::Remote);
        }
        Ok(Location::Missing)
    }

    /// Copy content to the remote tier and, once the remote copy is
    /// confirmed, delete the local one.
    ///
    /// Confirmation needs the store's ETag to match the md5 of the bytes
    /// sent, those bytes to match the recorded md5, and a remote HEAD to
    /// report the recorded size. Any failure leaves the local copy in place.
    #[instrument(skip(self, digests), fields(content_id = %id))]
    pub async fn migrate(
        &self,
        id: ContentId,
        size: u64,
        digests: &ContentDigests,
    ) -> StorageResult<MigrationOutcome> {
        let remote = self.remote.as_ref().ok_or(StorageError::NoRemote)?;
        if !self.migrating.insert(id) {
            return Ok(MigrationOutcome::InProgress);
        }
        let _guard = MigratingGuard {
            set: &self.migrating,
            id,
        };

        let key = content_key(id);
        let local_meta = match self.local.head(&key).await {
            Ok(meta) => meta,
            Err(StorageError::NotFound(_)) => return Ok(MigrationOutcome::NotLocal),
            Err(e) => return Err(e),
        };
        if local_meta.size != size {
            return Err(StorageError::NotConfirmed {
                key,
                reason: format!("local copy is {} bytes, ledger says {size}", local_meta.size),
            });
        }

        let sent_md5 = copy_to_remote(&self.local, remote.as_ref(), &key).await?;
        let expected_md5 = digests.md5_hex();
        if sent_md5 != expected_md5 {
            // The local bytes are not what was stored. Take the bad remote
            // copy back out and leave the local one for inspection.
            if let Err(e) = remote.delete(&key).await {
                tracing::warn!(error = %e, "failed to remove unconfirmed remote copy");
            }
            return Err(StorageError::NotConfirmed {
                key,
                reason: format!("local md5 {sent_md5} differs from recorded {expected_md5}"),
            });
        }

        let remote_meta = remote.head(&key).await?;
        if remote_meta.size != size {
            return Err(StorageError::NotConfirmed {
                key,
                reason: format!("remote reports {} bytes, expected {size}", remote_meta.size),
            });
        }

        self.local.delete(&key).await?;
        tracing::info!(bytes = size, "migrated content to remote tier");
        Ok(MigrationOutcome::Migrated { bytes: size })
    }

    /// Whether a migration of `id` is running.
    pub fn is_migrating(&self, id: ContentId) -> bool {
        self.migrating.contains(&id)
    }

    /// Counters of the remote tier's connection pool.
    pub fn remote_pool_stats(&self) -> Option<PoolStats> {
        self.remote.as_ref().and_then(|r| r.pool_stats())
    }

    pub async fn health_check(&self) -> StorageResult<()> {
        self.local.health_check().await?;
        if let Some(remote) = &self.remote {
            remote.health_check().await?;
        }
        Ok(())
    }
}

/// Stream a local object to the remote store. Returns the hex md5 of the
/// bytes sent.
async fn copy_to_remote(
    local: &FilesystemBackend,
    remote: &dyn ObjectStore,
    key: &str,
) -> StorageResult<String> {
    let mut source = local.get_stream(key).await?;
    let mut upload = remote.put_stream(key).await?;
    let mut md5 = md5::Context::new();

    while let Some(chunk) = source.next().await {
        let chunk: Bytes = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                abort_upload(upload).await;
                return Err(e);
            }
        };
        md5.consume(&chunk);
        if let Err(e) = upload.write(chunk).await {
            abort_upload(upload).await;
            return Err(e);
        }
    }

    upload.finish().await?;
    Ok(format!("{:x}", md5.compute()))
}

async fn abort_upload(upload: Box<dyn StreamingUpload>) {
    if let Err(e) = upload.abort().await {
        tracing::warn!(error = %e, "failed to abort remote upload");
    }
}
