//! Tier routing and migration.

mod common;

use async_trait::async_trait;
use bytes::Bytes;
use common::{ObjectServer, seeded_bytes};
use librarian_core::{ContentDigests, ContentId};
use librarian_storage::{
    ByteStream, FilesystemBackend, Location, MigrationOutcome, ObjectMeta, ObjectStore,
    RemoteBackend, StorageError, StorageResult, StorageRouter, StreamingUpload, Tier, content_key,
};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    server: ObjectServer,
    router: StorageRouter,
}

async fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let server = ObjectServer::start().await;
    let local = Arc::new(FilesystemBackend::new(dir.path()).await.unwrap());
    let remote: Arc<dyn ObjectStore> = Arc::new(RemoteBackend::new(&server.config()).unwrap());
    Fixture {
        _dir: dir,
        server,
        router: StorageRouter::new(local, Some(remote)),
    }
}

async fn store_local(router: &StorageRouter, id: ContentId, data: &Bytes) {
    router.local().put(&content_key(id), data.clone()).await.unwrap();
}

#[tokio::test]
async fn test_migrate_moves_content_to_remote() {
    let f = fixture().await;
    let id = ContentId::new(1).unwrap();
    let data = seeded_bytes(11, 200 * 1024);
    store_local(&f.router, id, &data).await;
    assert_eq!(f.router.locate(id).await.unwrap(), Location::Local);

    let outcome = f
        .router
        .migrate(id, data.len() as u64, &ContentDigests::compute(&data))
        .await
        .unwrap();
    assert_eq!(outcome, MigrationOutcome::Migrated { bytes: data.len() as u64 });

    assert_eq!(f.router.locate(id).await.unwrap(), Location::Remote);
    assert_eq!(f.server.object(&content_key(id)).unwrap(), data);

    let stream = f.router.open(id).await.unwrap();
    assert_eq!(stream.tier(), Tier::Remote);
    assert_eq!(stream.read_to_end().await.unwrap(), data);
}

#[tokio::test]
async fn test_unconfirmed_migration_keeps_local_copy() {
    let f = fixture().await;
    f.server.set_wrong_etag(true);
    let id = ContentId::new(2).unwrap();
    let data = Bytes::from_static(b"hello world");
    store_local(&f.router, id, &data).await;

    let err = f
        .router
        .migrate(id, data.len() as u64, &ContentDigests::compute(&data))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotConfirmed { .. }), "{err:?}");

    let stream = f.router.open(id).await.unwrap();
    assert_eq!(stream.tier(), Tier::Local);
    assert_eq!(stream.read_to_end().await.unwrap(), data);
    assert!(!f.router.is_migrating(id));
}

#[tokio::test]
async fn test_corrupt_local_copy_not_migrated() {
    let f = fixture().await;
    let id = ContentId::new(3).unwrap();
    let recorded = ContentDigests::compute(b"hello world");
    store_local(&f.router, id, &Bytes::from_static(b"hello_world")).await;

    let err = f.router.migrate(id, 11, &recorded).await.unwrap_err();
    assert!(matches!(err, StorageError::NotConfirmed { .. }), "{err:?}");

    assert_eq!(f.router.locate(id).await.unwrap(), Location::Local);
    assert!(f.server.object(&content_key(id)).is_none());
}

#[tokio::test]
async fn test_size_mismatch_not_migrated() {
    let f = fixture().await;
    let id = ContentId::new(4).unwrap();
    let data = Bytes::from_static(b"hello world");
    store_local(&f.router, id, &data).await;

    let err = f
        .router
        .migrate(id, 12, &ContentDigests::compute(&data))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotConfirmed { .. }));
    assert_eq!(f.server.put_count(), 0);
}

#[tokio::test]
async fn test_migrate_without_local_copy() {
    let f = fixture().await;
    let id = ContentId::new(5).unwrap();
    let outcome = f
        .router
        .migrate(id, 0, &ContentDigests::compute(b""))
        .await
        .unwrap();
    assert_eq!(outcome, MigrationOutcome::NotLocal);
}

#[tokio::test]
async fn test_open_falls_back_to_remote() {
    let f = fixture().await;
    let id = ContentId::new(6).unwrap();
    f.server
        .insert(&content_key(id), Bytes::from_static(b"remote only"));

    let stream = f.router.open(id).await.unwrap();
    assert_eq!(stream.tier(), Tier::Remote);
    assert_eq!(stream.read_to_end().await.unwrap(), "remote only");
}

#[tokio::test]
async fn test_open_missing_everywhere() {
    let f = fixture().await;
    let id = ContentId::new(7).unwrap();
    assert!(matches!(
        f.router.open(id).await,
        Err(StorageError::NotFound(_))
    ));
    assert_eq!(f.router.locate(id).await.unwrap(), Location::Missing);
}

#[tokio::test]
async fn test_reader_opened_before_migration_finishes() {
    let f = fixture().await;
    let id = ContentId::new(8).unwrap();
    let data = seeded_bytes(5, 256 * 1024);
    store_local(&f.router, id, &data).await;

    let mut early = f.router.open(id).await.unwrap();
    let head = early.read(1024).await.unwrap().unwrap();

    f.router
        .migrate(id, data.len() as u64, &ContentDigests::compute(&data))
        .await
        .unwrap();

    // The open local handle still reads the whole blob.
    let mut rest = early.read_to_end().await.unwrap().to_vec();
    let mut all = head.to_vec();
    all.append(&mut rest);
    assert_eq!(all, data);
}

#[tokio::test]
async fn test_place_never_overwrites() {
    let f = fixture().await;
    let local = f.router.local();
    let id = ContentId::new(9).unwrap();

    let first = local.staging_path(librarian_core::StagingId::new());
    tokio::fs::write(&first, b"one").await.unwrap();
    f.router.place(&first, id).await.unwrap();

    let second = local.staging_path(librarian_core::StagingId::new());
    tokio::fs::write(&second, b"two").await.unwrap();
    assert!(matches!(
        f.router.place(&second, id).await,
        Err(StorageError::AlreadyExists(_))
    ));

    let stream = f.router.open(id).await.unwrap();
    assert_eq!(stream.read_to_end().await.unwrap(), "one");

    f.router.discard_local(id).await.unwrap();
    f.router.discard_local(id).await.unwrap();
}

#[tokio::test]
async fn test_migrate_without_remote() {
    let dir = TempDir::new().unwrap();
    let local = Arc::new(FilesystemBackend::new(dir.path()).await.unwrap());
    let router = StorageRouter::new(local, None);
    let err = router
        .migrate(ContentId::new(1).unwrap(), 0, &ContentDigests::compute(b""))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NoRemote));
}

/// Remote tier whose uploads fail on the first write and fail again when
/// aborted.
#[derive(Default)]
struct BrokenRemote {
    aborts: Arc<AtomicUsize>,
}

struct BrokenUpload {
    aborts: Arc<AtomicUsize>,
}

fn refused(key: &str) -> StorageError {
    StorageError::NotFound(key.to_string())
}

#[async_trait]
impl ObjectStore for BrokenRemote {
    async fn exists(&self, _key: &str) -> StorageResult<bool> {
        Ok(false)
    }
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        Err(refused(key))
    }
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        Err(refused(key))
    }
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        Err(refused(key))
    }
    async fn put(&self, _key: &str, _data: Bytes) -> StorageResult<()> {
        Err(io::Error::other("remote is down").into())
    }
    async fn put_stream(&self, _key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        Ok(Box::new(BrokenUpload {
            aborts: Arc::clone(&self.aborts),
        }))
    }
    async fn delete(&self, key: &str) -> StorageResult<()> {
        Err(refused(key))
    }
    fn backend_name(&self) -> &'static str {
        "broken"
    }
}

#[async_trait]
impl StreamingUpload for BrokenUpload {
    async fn write(&mut self, _data: Bytes) -> StorageResult<()> {
        Err(io::Error::other("connection reset").into())
    }
    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        Err(io::Error::other("connection reset").into())
    }
    async fn abort(self: Box<Self>) -> StorageResult<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        Err(io::Error::other("abort failed too").into())
    }
}

#[tokio::test]
async fn test_failed_copy_aborts_upload_and_keeps_local() {
    let dir = TempDir::new().unwrap();
    let local = Arc::new(FilesystemBackend::new(dir.path()).await.unwrap());
    let remote = BrokenRemote::default();
    let aborts = Arc::clone(&remote.aborts);
    let remote: Arc<dyn ObjectStore> = Arc::new(remote);
    let router = StorageRouter::new(local, Some(remote));

    let id = ContentId::new(3).unwrap();
    let data = seeded_bytes(4, 4096);
    store_local(&router, id, &data).await;

    // The write error is what the caller sees, not the abort error.
    let err = router
        .migrate(id, data.len() as u64, &ContentDigests::compute(&data))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("connection reset"), "{err}");
    assert_eq!(aborts.load(Ordering::SeqCst), 1);
    assert_eq!(router.locate(id).await.unwrap(), Location::Local);
    assert!(!router.is_migrating(id));
}
