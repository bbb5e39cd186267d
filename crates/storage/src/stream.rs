//! Readable handle over a stored blob.

use crate::error::StorageResult;
use crate::traits::ByteStream;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

/// Which tier a blob is being served from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tier {
    Local,
    Remote,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Local => "local",
            Tier::Remote => "remote",
        }
    }
}

/// Sequential reader over one blob.
///
/// Closing (or dropping) the stream before the end releases its underlying
/// resource. For a remote blob that means the connection is closed, not
/// returned to the pool.
pub struct BlobStream {
    inner: ByteStream,
    pending: Option<Bytes>,
    tier: Tier,
}

impl BlobStream {
    pub fn new(inner: ByteStream, tier: Tier) -> Self {
        Self {
            inner,
            pending: None,
            tier,
        }
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Read up to `max` bytes. Returns `None` at end of blob.
    pub async fn read(&mut self, max: usize) -> StorageResult<Option<Bytes>> {
        let max = max.max(1);
        let mut chunk = loop {
            if let Some(pending) = self.pending.take() {
                break pending;
            }
            match self.inner.next().await {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => break chunk,
                Some(Err(e)) => return Err(e),
                None => return Ok(None),
            }
        };

        if chunk.len() > max {
            self.pending = Some(chunk.split_off(max));
        }
        Ok(Some(chunk))
    }

    /// Read everything that is left.
    pub async fn read_to_end(mut self) -> StorageResult<Bytes> {
        let mut out = Vec::new();
        while let Some(chunk) = self.read(usize::MAX).await? {
            out.extend_from_slice(&chunk);
        }
        Ok(Bytes::from(out))
    }

    /// Stop reading and release the underlying resource.
    pub fn close(self) {
        drop(self);
    }
}

impl Stream for BlobStream {
    type Item = StorageResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(pending) = self.pending.take() {
            return Poll::Ready(Some(Ok(pending)));
        }
        self.inner.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for BlobStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStream")
            .field("tier", &self.tier)
            .field("pending", &self.pending.as_ref().map(Bytes::len))
            .finish()
    }
}
