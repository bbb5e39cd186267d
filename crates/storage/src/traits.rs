//! The object store seam shared by both tiers.

use crate::error::StorageResult;
use crate::pool::PoolStats;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// Chunks of an object being read.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Object store abstraction shared by the local and remote tiers.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Whether `key` is present.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Size and entity tag of `key`, without its body.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Read all of `key` into memory. Only suitable for small objects.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Read `key` incrementally.
    ///
    /// Fails with `NotFound` before any bytes are produced when the object
    /// does not exist.
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// Write `key` in one request; readers see all of it or none.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Begin writing `key` chunk by chunk.
    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>>;

    /// Remove `key`; `NotFound` if it is absent.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Short tier label for log fields.
    fn backend_name(&self) -> &'static str;

    /// Probe the backend once at startup.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Connection pool counters, for backends that pool connections.
    fn pool_stats(&self) -> Option<PoolStats> {
        None
    }
}

/// What a HEAD reports about an object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    pub size: u64,
    pub last_modified: Option<time::OffsetDateTime>,
    /// Hex md5 of the object on the remote tier; `None` locally.
    pub etag: Option<String>,
}

/// An upload in progress. Nothing is visible under the key until `finish`
/// returns `Ok`.
#[async_trait]
pub trait StreamingUpload: Send {
    /// Send the next chunk.
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Complete the upload, returning the byte count sent.
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    /// Abandon the upload, leaving nothing behind under the key.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}
