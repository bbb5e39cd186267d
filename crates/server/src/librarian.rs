//! The librarian service: submit and fetch.
//!
//! `Librarian` ties the upload session, the ledger, the storage router and
//! the access gate together. The HTTP handlers are a thin layer over it.

use crate::blocking::BlockingPool;
use crate::error::{LibrarianError, LibrarianResult};
use crate::gate::{AccessGate, AccessTarget};
use crate::metrics;
use crate::upload::{StoredFile, UploadSession, rejection_reason};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use librarian_core::{AliasId, ContentId, Namespace, Sha1Hex};
use librarian_metadata::{AliasRepo, ContentRepo, MetadataStore};
use librarian_storage::{BlobStream, StorageRouter};
use serde::Serialize;
use std::fmt::Display;
use std::sync::Arc;

/// An upload request.
#[derive(Clone, Debug)]
pub struct NewFile {
    pub filename: String,
    pub mimetype: String,
    /// Declared size; the body must be exactly this long.
    pub size: u64,
    pub sha1: Option<Sha1Hex>,
    pub content_id: Option<ContentId>,
    pub restricted: bool,
}

impl NewFile {
    pub fn new(filename: impl Into<String>, mimetype: impl Into<String>, size: u64) -> Self {
        Self {
            filename: filename.into(),
            mimetype: mimetype.into(),
            size,
            sha1: None,
            content_id: None,
            restricted: false,
        }
    }

    pub fn with_sha1(mut self, sha1: Sha1Hex) -> Self {
        self.sha1 = Some(sha1);
        self
    }

    pub fn with_content_id(mut self, id: ContentId) -> Self {
        self.content_id = Some(id);
        self
    }

    pub fn restricted(mut self, restricted: bool) -> Self {
        self.restricted = restricted;
        self
    }
}

/// What a reader learns about the file it fetched.
#[derive(Clone, Debug, Serialize)]
pub struct AliasInfo {
    pub alias_id: AliasId,
    pub content_id: ContentId,
    pub filename: String,
    pub mimetype: String,
    pub size: u64,
    pub restricted: bool,
}

#[derive(Clone)]
pub struct Librarian {
    metadata: Arc<dyn MetadataStore>,
    storage: Arc<StorageRouter>,
    gate: Arc<AccessGate>,
    blocking: BlockingPool,
    max_upload_size: u64,
}

impl Librarian {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<StorageRouter>,
        gate: AccessGate,
        blocking: BlockingPool,
        max_upload_size: u64,
    ) -> Self {
        Self {
            metadata,
            storage,
            gate: Arc::new(gate),
            blocking,
            max_upload_size,
        }
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    pub fn storage(&self) -> &Arc<StorageRouter> {
        &self.storage
    }

    /// Open an upload session, refusing sizes over the configured limit.
    pub async fn start_upload(
        &self,
        filename: &str,
        declared_size: u64,
    ) -> LibrarianResult<UploadSession> {
        if declared_size > self.max_upload_size {
            metrics::record_upload_rejected("too_large");
            return Err(LibrarianError::TooLarge {
                size: declared_size,
                limit: self.max_upload_size,
            });
        }
        UploadSession::start(
            Arc::clone(&self.metadata),
            Arc::clone(&self.storage),
            self.blocking.clone(),
            filename,
            declared_size,
        )
        .await
    }

    /// Store a file from a byte stream and record it under a new alias.
    ///
    /// If the body fails, ends early, or runs long, nothing is recorded.
    pub async fn submit<S, E>(&self, file: NewFile, body: S) -> LibrarianResult<StoredFile>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Display + Send,
    {
        let mut session = self.start_upload(&file.filename, file.size).await?;
        if let Some(sha1) = file.sha1 {
            session.set_expected_digest(sha1);
        }
        if let Some(id) = file.content_id {
            session.set_explicit_content_id(id);
        }
        session.set_restricted(file.restricted);

        let mut body = std::pin::pin!(body);
        while let Some(chunk) = body.next().await {
            let appended = match chunk {
                Ok(chunk) => session.append(chunk).await,
                Err(e) => Err(LibrarianError::Body(e.to_string())),
            };
            if let Err(e) = appended {
                metrics::record_upload_rejected(rejection_reason(&e));
                tracing::info!(filename = %file.filename, error = %e, "upload body rejected");
                return Err(e);
            }
        }

        session.commit(&file.mimetype).await
    }

    /// Open the content behind an alias for reading.
    ///
    /// Missing aliases, tombstoned aliases and denied requests all come back
    /// as `NotFound`.
    pub async fn fetch(
        &self,
        alias_id: AliasId,
        namespace: Namespace,
        macaroon: Option<&str>,
    ) -> LibrarianResult<(BlobStream, AliasInfo)> {
        let result = self.try_fetch(alias_id, namespace, macaroon).await;
        let outcome = match &result {
            Ok((stream, _)) => stream.tier().as_str(),
            Err(LibrarianError::NotFound) => "not_found",
            Err(_) => "error",
        };
        metrics::FETCHES.with_label_values(&[outcome]).inc();
        result
    }

    async fn try_fetch(
        &self,
        alias_id: AliasId,
        namespace: Namespace,
        macaroon: Option<&str>,
    ) -> LibrarianResult<(BlobStream, AliasInfo)> {
        let alias = self
            .metadata
            .get_alias(alias_id)
            .await?
            .ok_or(LibrarianError::NotFound)?;
        let content_id = alias.content().ok_or(LibrarianError::NotFound)?;

        let target = AccessTarget {
            alias_id,
            content_id,
            restricted: alias.restricted,
        };
        if self.gate.check(target, namespace, macaroon).await.is_err() {
            return Err(LibrarianError::NotFound);
        }

        let Some(content) = self.metadata.get_content(content_id).await? else {
            tracing::error!(%alias_id, %content_id, "alias references a missing content row");
            return Err(LibrarianError::NotFound);
        };

        let stream = match self.storage.open(content_id).await {
            Ok(stream) => stream,
            Err(e) if e.is_not_found() => {
                tracing::error!(%alias_id, %content_id, "content is missing from every tier");
                return Err(LibrarianError::NotFound);
            }
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(%alias_id, %content_id, tier = stream.tier().as_str(), "fetch opened");
        Ok((
            stream,
            AliasInfo {
                alias_id,
                content_id,
                filename: alias.filename,
                mimetype: alias.mimetype,
                size: content.size(),
                restricted: alias.restricted,
            },
        ))
    }
}
