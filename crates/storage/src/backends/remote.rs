//! Remote object store reached over HTTP/1.1.
//!
//! Objects are addressed as `{endpoint}/{container}/{key}` and requests carry
//! an `X-Auth-Token` header. The store answers PUT with an `ETag` holding the
//! hex md5 of what it persisted, which is how uploads are confirmed.
//!
//! Connections come from an explicit [`ConnectionPool`]. A response body that
//! is read to its end hands the connection back; anything else (an error, a
//! reader that stops early, a dropped stream) closes it.

use crate::error::{StorageError, StorageResult};
use crate::pool::{ConnectionPool, Lease, PoolStats, PooledConnection, Release};
use crate::traits::{ByteStream, ObjectMeta, ObjectStore, StreamingUpload};
use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::{Body, Frame, Incoming};
use hyper::client::conn::http1::{self, SendRequest};
use hyper::header::{self, HeaderMap};
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use librarian_core::config::RemoteStoreConfig;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::instrument;

/// Characters escaped inside one path segment of an object URL.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// In-flight chunks buffered between a streaming upload and its request body.
const UPLOAD_CHANNEL_DEPTH: usize = 4;

type RequestBody = UnsyncBoxBody<Bytes, std::io::Error>;

fn empty_body() -> RequestBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

fn full_body(data: Bytes) -> RequestBody {
    Full::new(data).map_err(|never| match never {}).boxed_unsync()
}

/// One HTTP/1.1 connection to the remote store.
pub struct RemoteConnection {
    sender: SendRequest<RequestBody>,
    driver: JoinHandle<()>,
}

impl Drop for RemoteConnection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[async_trait]
impl PooledConnection for RemoteConnection {
    async fn ready(&mut self) -> bool {
        !self.sender.is_closed() && self.sender.ready().await.is_ok()
    }
}

/// Where and how to reach the store.
struct Endpoint {
    host: String,
    port: u16,
    authority: String,
    container_path: String,
    auth_token: Option<String>,
    connect_timeout: Duration,
}

impl Endpoint {
    fn parse(config: &RemoteStoreConfig) -> StorageResult<Self> {
        let uri: Uri = config
            .endpoint
            .parse()
            .map_err(|e| StorageError::Config(format!("invalid remote endpoint: {e}")))?;
        if uri.scheme_str() != Some("http") {
            return Err(StorageError::Config(format!(
                "remote endpoint must use http://, got {}",
                config.endpoint
            )));
        }
        let authority = uri
            .authority()
            .ok_or_else(|| StorageError::Config("remote endpoint has no host".to_string()))?;
        let host = authority.host().to_string();
        let port = authority.port_u16().unwrap_or(80);
        let base = uri.path().trim_end_matches('/');

        Ok(Self {
            authority: authority.to_string(),
            host,
            port,
            container_path: format!(
                "{base}/{}",
                utf8_percent_encode(&config.container, SEGMENT)
            ),
            auth_token: config.auth_token.clone(),
            connect_timeout: config.connect_timeout(),
        })
    }

    fn object_path(&self, key: &str) -> String {
        let encoded: Vec<String> = key
            .split('/')
            .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
            .collect();
        format!("{}/{}", self.container_path, encoded.join("/"))
    }

    fn request(&self, method: Method, path: String, body: RequestBody) -> StorageResult<Request<RequestBody>> {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header(header::HOST, &self.authority);
        if let Some(token) = &self.auth_token {
            builder = builder.header("x-auth-token", token);
        }
        builder
            .body(body)
            .map_err(|e| StorageError::Remote(format!("failed to build request: {e}")))
    }

    async fn connect(&self) -> StorageResult<RemoteConnection> {
        let stream = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| {
            StorageError::Remote(format!(
                "connect to {}:{} timed out after {:?}",
                self.host, self.port, self.connect_timeout
            ))
        })??;
        stream.set_nodelay(true)?;

        let (sender, conn) = http1::handshake(TokioIo::new(stream)).await?;
        let driver = tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(error = %e, "remote connection ended with error");
            }
        });
        tracing::debug!(host = %self.host, port = self.port, "opened remote connection");
        Ok(RemoteConnection { sender, driver })
    }
}

/// Hex md5 from an `ETag` header, without quotes.
fn etag_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().trim_matches('"').to_ascii_lowercase())
}

fn content_length_of(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn status_error(status: StatusCode, key: &str) -> StorageError {
    if status == StatusCode::NOT_FOUND {
        StorageError::NotFound(key.to_string())
    } else {
        StorageError::UnexpectedStatus {
            status: status.as_u16(),
            key: key.to_string(),
        }
    }
}

/// Read the rest of a response body and end the lease. The connection is
/// reused only if the body was read to its end.
async fn drain(lease: Lease<RemoteConnection>, body: Incoming) -> StorageResult<Bytes> {
    match body.collect().await {
        Ok(collected) => {
            lease.release(Release::Reusable);
            Ok(collected.to_bytes())
        }
        Err(e) => {
            lease.release(Release::Discard);
            Err(e.into())
        }
    }
}

/// Return a fully read connection to the pool, at most once.
fn complete(lease: &mut Option<Lease<RemoteConnection>>) {
    if let Some(lease) = lease.take() {
        lease.release(Release::Reusable);
    }
}

/// HTTP/1.1 object store client with an explicit connection pool.
pub struct RemoteBackend {
    endpoint: Arc<Endpoint>,
    pool: ConnectionPool<RemoteConnection>,
}

impl RemoteBackend {
    /// Create a client for the configured store. No connection is opened yet.
    pub fn new(config: &RemoteStoreConfig) -> StorageResult<Self> {
        config.validate().map_err(StorageError::Config)?;
        Ok(Self {
            endpoint: Arc::new(Endpoint::parse(config)?),
            pool: ConnectionPool::new(config.pool_max_idle),
        })
    }

    /// Counters of the underlying connection pool.
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    async fn exchange(
        &self,
        request: Request<RequestBody>,
    ) -> StorageResult<(Lease<RemoteConnection>, Response<Incoming>)> {
        let endpoint = &self.endpoint;
        let mut lease = self.pool.acquire(|| endpoint.connect()).await?;
        // On error the lease is dropped, which discards the connection.
        let response = lease.sender.send_request(request).await?;
        Ok((lease, response))
    }

    /// Run a request whose response body is not needed.
    async fn round_trip(
        &self,
        method: Method,
        key: &str,
        body: RequestBody,
    ) -> StorageResult<(StatusCode, HeaderMap)> {
        let request = self.endpoint.request(method, self.endpoint.object_path(key), body)?;
        let (lease, response) = self.exchange(request).await?;
        let (parts, body) = response.into_parts();
        drain(lease, body).await?;
        Ok((parts.status, parts.headers))
    }
}

#[async_trait]
impl ObjectStore for RemoteBackend {
    #[instrument(skip(self), fields(backend = "remote"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self.head(key).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), fields(backend = "remote"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let (status, headers) = self.round_trip(Method::HEAD, key, empty_body()).await?;
        if !status.is_success() {
            return Err(status_error(status, key));
        }
        let size = content_length_of(&headers).ok_or_else(|| {
            StorageError::Remote(format!("HEAD {key} returned no Content-Length"))
        })?;
        Ok(ObjectMeta {
            size,
            last_modified: None,
            etag: etag_of(&headers),
        })
    }

    #[instrument(skip(self), fields(backend = "remote"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let request = self
            .endpoint
            .request(Method::GET, self.endpoint.object_path(key), empty_body())?;
        let (lease, response) = self.exchange(request).await?;
        let status = response.status();
        let data = drain(lease, response.into_body()).await?;
        if !status.is_success() {
            return Err(status_error(status, key));
        }
        Ok(data)
    }

    #[instrument(skip(self), fields(backend = "remote"))]
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let request = self
            .endpoint
            .request(Method::GET, self.endpoint.object_path(key), empty_body())?;
        let (lease, response) = self.exchange(request).await?;
        let status = response.status();
        if !status.is_success() {
            drain(lease, response.into_body()).await?;
            return Err(status_error(status, key));
        }

        let expected = content_length_of(response.headers());
        let mut body = response.into_body();
        let stream = async_stream::try_stream! {
            let mut lease = Some(lease);
            let mut received = 0u64;
            while let Some(frame) = body.frame().await {
                let frame = frame?;
                let Ok(data) = frame.into_data() else { continue };
                received += data.len() as u64;
                // The last byte puts the connection at a message boundary.
                // Release before yielding: a reader that stops at
                // Content-Length never polls again.
                if body.is_end_stream() || expected == Some(received) {
                    complete(&mut lease);
                }
                if !data.is_empty() {
                    yield data;
                }
            }
            complete(&mut lease);
            // Every other exit drops `lease`, which discards the connection.
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self, data), fields(backend = "remote", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let expected = format!("{:x}", md5::compute(&data));
        let (status, headers) = self.round_trip(Method::PUT, key, full_body(data)).await?;
        if !status.is_success() {
            return Err(status_error(status, key));
        }
        confirm_etag(key, &expected, etag_of(&headers))
    }

    #[instrument(skip(self), fields(backend = "remote"))]
    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        let (tx, rx) = mpsc::channel::<Bytes>(UPLOAD_CHANNEL_DEPTH);
        let completed = Arc::new(AtomicBool::new(false));

        // If the sender goes away without `finish`, end the body with an
        // error so the store sees an aborted request rather than a short
        // object.
        let flag = Arc::clone(&completed);
        let tail = futures::stream::once(async move {
            (!flag.load(Ordering::Acquire)).then(|| {
                Err::<Frame<Bytes>, _>(std::io::Error::other("upload abandoned before finish"))
            })
        })
        .filter_map(std::future::ready);
        let frames = rx.map(|chunk| Ok(Frame::data(chunk))).chain(tail);
        let body = StreamBody::new(frames).boxed_unsync();

        let request = self
            .endpoint
            .request(Method::PUT, self.endpoint.object_path(key), body)?;
        let endpoint = Arc::clone(&self.endpoint);
        let pool = self.pool.clone();
        let exchange: JoinHandle<ExchangeResult> = tokio::spawn(async move {
            let mut lease = pool.acquire(|| endpoint.connect()).await?;
            let response = lease.sender.send_request(request).await?;
            let (parts, body) = response.into_parts();
            drain(lease, body).await?;
            Ok::<_, StorageError>((parts.status, etag_of(&parts.headers)))
        });

        Ok(Box::new(RemoteUpload {
            key: key.to_string(),
            tx: Some(tx),
            completed,
            exchange,
            md5: md5::Context::new(),
            bytes_written: 0,
        }))
    }

    #[instrument(skip(self), fields(backend = "remote"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let (status, _) = self.round_trip(Method::DELETE, key, empty_body()).await?;
        if !status.is_success() {
            return Err(status_error(status, key));
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "remote"
    }

    fn pool_stats(&self) -> Option<PoolStats> {
        Some(self.pool.stats())
    }

    #[instrument(skip(self), fields(backend = "remote"))]
    async fn health_check(&self) -> StorageResult<()> {
        let request = self.endpoint.request(
            Method::HEAD,
            self.endpoint.container_path.clone(),
            empty_body(),
        )?;
        let (lease, response) = self.exchange(request).await?;
        let status = response.status();
        drain(lease, response.into_body()).await?;
        if !status.is_success() {
            return Err(StorageError::Remote(format!(
                "container check returned {status}"
            )));
        }
        Ok(())
    }
}

fn confirm_etag(key: &str, expected_md5: &str, etag: Option<String>) -> StorageResult<()> {
    match etag {
        Some(etag) if etag != expected_md5 => Err(StorageError::NotConfirmed {
            key: key.to_string(),
            reason: format!("etag {etag} does not match md5 {expected_md5}"),
        }),
        _ => Ok(()),
    }
}

type ExchangeResult = StorageResult<(StatusCode, Option<String>)>;

/// Streaming PUT: chunks flow through a channel into the request body while
/// the request runs on its own task.
struct RemoteUpload {
    key: String,
    tx: Option<mpsc::Sender<Bytes>>,
    completed: Arc<AtomicBool>,
    exchange: JoinHandle<ExchangeResult>,
    md5: md5::Context,
    bytes_written: u64,
}

impl RemoteUpload {
    async fn outcome(&mut self) -> ExchangeResult {
        (&mut self.exchange)
            .await
            .map_err(|e| StorageError::Remote(format!("upload task failed: {e}")))?
    }
}

#[async_trait]
impl StreamingUpload for RemoteUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        let Some(tx) = self.tx.as_mut() else {
            return Err(StorageError::Remote("upload already closed".to_string()));
        };
        self.md5.consume(&data);
        let len = data.len() as u64;
        if tx.send(data).await.is_err() {
            // The request ended early; its result says why.
            self.tx = None;
            return match self.outcome().await {
                Err(e) => Err(e),
                Ok((status, _)) => Err(status_error(status, &self.key)),
            };
        }
        self.bytes_written += len;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> StorageResult<u64> {
        self.completed.store(true, Ordering::Release);
        self.tx = None;

        let (status, etag) = self.outcome().await?;
        if !status.is_success() {
            return Err(status_error(status, &self.key));
        }
        let expected = format!("{:x}", self.md5.clone().compute());
        confirm_etag(&self.key, &expected, etag)?;
        Ok(self.bytes_written)
    }

    async fn abort(mut self: Box<Self>) -> StorageResult<()> {
        self.tx = None;
        self.exchange.abort();
        Ok(())
    }
}

impl Drop for RemoteUpload {
    fn drop(&mut self) {
        if !self.completed.load(Ordering::Acquire) {
            self.exchange.abort();
        }
    }
}
