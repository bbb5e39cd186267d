//! Upload sessions.
//!
//! A session streams bytes into a private staging file on the blocking pool,
//! hashing as it goes. Nothing is visible to readers until `commit` has
//! linked the file to its content key and the ledger transaction has
//! recorded both the content row and its first alias. A session dropped
//! before commit removes its staging file from the blocking pool.

use crate::blocking::BlockingPool;
use crate::error::{LibrarianError, LibrarianResult};
use crate::metrics;
use bytes::Bytes;
use librarian_core::{
    AliasId, ContentDigests, ContentId, DigestAccumulator, Sha1Hex, StagingId, validate_filename,
};
use librarian_metadata::{ContentRepo, ContentRow, MetadataError, MetadataStore, NewAlias};
use librarian_storage::{StorageError, StorageRouter};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// How many freshly allocated ids a commit tries before giving up.
pub const MAX_ID_ATTEMPTS: u32 = 5;

/// Identifiers assigned to a committed upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct StoredFile {
    pub content_id: ContentId,
    pub alias_id: AliasId,
}

/// Open staging file plus the running digests of what was written to it.
struct StagingWriter {
    file: File,
    digests: DigestAccumulator,
}

pub struct UploadSession {
    metadata: Arc<dyn MetadataStore>,
    storage: Arc<StorageRouter>,
    blocking: BlockingPool,
    /// Set until the staging file has been removed or handed over.
    staging: Option<PathBuf>,
    /// Taken while a write is in flight; stays `None` after a failed write.
    writer: Option<StagingWriter>,
    filename: String,
    declared_size: u64,
    received: u64,
    expected_sha1: Option<Sha1Hex>,
    explicit_id: Option<ContentId>,
    restricted: bool,
}

impl UploadSession {
    /// Open a staging file for an upload of `declared_size` bytes.
    pub async fn start(
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<StorageRouter>,
        blocking: BlockingPool,
        filename: &str,
        declared_size: u64,
    ) -> LibrarianResult<Self> {
        validate_filename(filename)?;

        let path = storage.local().staging_path(StagingId::new());
        let open_path = path.clone();
        let file = blocking
            .run(move || {
                OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&open_path)
            })
            .await??;

        metrics::ACTIVE_UPLOADS.inc();
        tracing::debug!(filename, declared_size, staging = %path.display(), "upload started");

        Ok(Self {
            metadata,
            storage,
            blocking,
            staging: Some(path),
            writer: Some(StagingWriter {
                file,
                digests: DigestAccumulator::new(),
            }),
            filename: filename.to_string(),
            declared_size,
            received: 0,
            expected_sha1: None,
            explicit_id: None,
            restricted: false,
        })
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn declared_size(&self) -> u64 {
        self.declared_size
    }

    /// Bytes accepted so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Require the committed content to have this SHA-1.
    pub fn set_expected_digest(&mut self, sha1: Sha1Hex) {
        self.expected_sha1 = Some(sha1);
    }

    /// Commit under this content id instead of allocating one.
    pub fn set_explicit_content_id(&mut self, id: ContentId) {
        self.explicit_id = Some(id);
    }

    pub fn set_restricted(&mut self, restricted: bool) {
        self.restricted = restricted;
    }

    /// Append the next chunk of the body.
    ///
    /// Bytes past the declared size are refused. After any failure the
    /// session accepts no more data.
    pub async fn append(&mut self, chunk: Bytes) -> LibrarianResult<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        let total = self.received + chunk.len() as u64;
        if total > self.declared_size {
            self.writer = None;
            return Err(LibrarianError::SizeMismatch {
                declared: self.declared_size,
                actual: total,
            });
        }

        let mut writer = self.writer.take().ok_or_else(poisoned)?;
        let (writer, written) = self
            .blocking
            .run(move || {
                let result = writer.file.write_all(&chunk);
                if result.is_ok() {
                    writer.digests.update(&chunk);
                }
                (writer, result)
            })
            .await?;
        written?;

        self.writer = Some(writer);
        self.received = total;
        Ok(())
    }

    /// Verify the staged bytes and make them durable and visible.
    pub async fn commit(mut self, mimetype: &str) -> LibrarianResult<StoredFile> {
        let started = Instant::now();
        let result = self.try_commit(mimetype).await;
        match &result {
            Ok(stored) => {
                metrics::UPLOADS_COMMITTED.inc();
                metrics::BYTES_STORED.inc_by(self.declared_size);
                metrics::UPLOAD_COMMIT_DURATION.observe(started.elapsed().as_secs_f64());
                tracing::info!(
                    content_id = %stored.content_id,
                    alias_id = %stored.alias_id,
                    size = self.declared_size,
                    "upload committed"
                );
            }
            Err(e) => {
                metrics::record_upload_rejected(rejection_reason(e));
                tracing::info!(filename = %self.filename, error = %e, "upload rejected");
            }
        }
        result
    }

    async fn try_commit(&mut self, mimetype: &str) -> LibrarianResult<StoredFile> {
        let writer = self.writer.take().ok_or_else(poisoned)?;
        let (digests, size) = self.blocking.run(move || finalize(writer)).await??;

        if size != self.declared_size {
            return Err(LibrarianError::SizeMismatch {
                declared: self.declared_size,
                actual: size,
            });
        }
        if let Some(expected) = &self.expected_sha1 {
            let actual = digests.sha1_hex();
            if &actual != expected {
                return Err(LibrarianError::DigestMismatch {
                    expected: expected.as_str().to_string(),
                    actual: actual.as_str().to_string(),
                });
            }
        }
        if let Some(id) = self.explicit_id
            && self.metadata.content_exists(id).await?
        {
            return Err(LibrarianError::DuplicateContentId(id));
        }

        let staging = self.staging.clone().ok_or_else(poisoned)?;
        let alias = NewAlias::new(&self.filename, mimetype, self.restricted);

        for attempt in 1..=MAX_ID_ATTEMPTS {
            let id = match self.explicit_id {
                Some(id) => id,
                None => {
                    let id = self.metadata.allocate_content_id().await?;
                    // An explicitly assigned id may sit ahead of the sequence,
                    // possibly migrated off the local tier. Linking over it
                    // would shadow the remote copy for readers.
                    if self.metadata.content_exists(id).await? {
                        tracing::warn!(
                            content_id = %id,
                            attempt,
                            "allocated id already recorded, retrying"
                        );
                        continue;
                    }
                    id
                }
            };

            match self.storage.place(&staging, id).await {
                Ok(()) => {}
                Err(StorageError::AlreadyExists(_)) if self.explicit_id.is_some() => {
                    return Err(LibrarianError::DuplicateContentId(id));
                }
                Err(StorageError::AlreadyExists(key)) => {
                    tracing::warn!(content_id = %id, key = %key, attempt, "content key taken, retrying");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            let row = ContentRow::new(id, size, &digests);
            match self.metadata.commit_upload(&row, &alias).await {
                Ok((content_id, alias_id)) => {
                    self.release_staging().await;
                    return Ok(StoredFile {
                        content_id,
                        alias_id,
                    });
                }
                Err(e) => {
                    // The link was made by this attempt, so it is ours to remove.
                    if let Err(cleanup) = self.storage.discard_local(id).await {
                        tracing::warn!(content_id = %id, error = %cleanup, "failed to unlink uncommitted content");
                    }
                    match e {
                        MetadataError::AlreadyExists(_) if self.explicit_id.is_some() => {
                            return Err(LibrarianError::DuplicateContentId(id));
                        }
                        MetadataError::AlreadyExists(what) => {
                            tracing::warn!(content_id = %id, what = %what, attempt, "content id collided, retrying");
                        }
                        other => return Err(other.into()),
                    }
                }
            }
        }

        Err(LibrarianError::IdExhausted(MAX_ID_ATTEMPTS))
    }

    /// Give up on the upload and remove its staging file.
    pub async fn abort(mut self) -> LibrarianResult<()> {
        self.writer = None;
        if let Some(path) = self.staging.take() {
            self.storage.local().remove_staged(&path).await?;
        }
        tracing::debug!(filename = %self.filename, "upload aborted");
        Ok(())
    }

    async fn release_staging(&mut self) {
        if let Some(path) = self.staging.take()
            && let Err(e) = self.storage.local().remove_staged(&path).await
        {
            // The content is committed; the sweep will collect the stray name.
            tracing::warn!(staging = %path.display(), error = %e, "failed to remove staging file");
        }
    }
}

impl Drop for UploadSession {
    fn drop(&mut self) {
        metrics::ACTIVE_UPLOADS.dec();
        let writer = self.writer.take();
        let Some(path) = self.staging.take() else {
            return;
        };
        let cleanup = move || {
            drop(writer);
            remove_abandoned(&path);
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let blocking = self.blocking.clone();
                handle.spawn(async move {
                    if let Err(e) = blocking.run(cleanup).await {
                        tracing::warn!(error = %e, "staging cleanup did not run");
                    }
                });
            }
            Err(_) => cleanup(),
        }
    }
}

fn remove_abandoned(path: &Path) {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != io::ErrorKind::NotFound
    {
        tracing::warn!(staging = %path.display(), error = %e, "failed to remove staging file");
    }
}

fn finalize(writer: StagingWriter) -> io::Result<(ContentDigests, u64)> {
    let StagingWriter { file, digests } = writer;
    file.sync_all()?;
    drop(file);
    let size = digests.len();
    Ok((digests.finalize(), size))
}

fn poisoned() -> LibrarianError {
    LibrarianError::Io(io::Error::other("upload session failed earlier"))
}

pub(crate) fn rejection_reason(e: &LibrarianError) -> &'static str {
    match e {
        LibrarianError::DigestMismatch { .. } => "digest_mismatch",
        LibrarianError::SizeMismatch { .. } => "size_mismatch",
        LibrarianError::DuplicateContentId(_) => "duplicate_content_id",
        LibrarianError::IdExhausted(_) => "id_exhausted",
        LibrarianError::Metadata(_) => "metadata",
        LibrarianError::Storage(_) => "storage",
        _ => "other",
    }
}
