//! Server test utilities.

use super::object_server::ObjectServer;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use bytes::Bytes;
use librarian_core::ContentId;
use librarian_core::config::AppConfig;
use librarian_metadata::{MetadataStore, SqliteStore};
use librarian_server::{AppState, AuthorizationVerifier, DenyAllVerifier, create_router};
use librarian_storage::{StorageRouter, content_key};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tower::ServiceExt;

/// A router over real local storage and SQLite in a temp dir.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    /// Same store as `state.metadata`, for raw SQL.
    pub sqlite: Arc<SqliteStore>,
    pub remote: Option<ObjectServer>,
    _temp_dir: TempDir,
}

/// How to build a [`TestServer`].
#[allow(dead_code)]
pub struct TestServerBuilder {
    remote: bool,
    verifier: Arc<dyn AuthorizationVerifier>,
    modify: Box<dyn FnOnce(&mut AppConfig) + Send>,
}

#[allow(dead_code)]
impl TestServerBuilder {
    /// Add a remote tier backed by an in-process object server.
    pub fn with_remote(mut self) -> Self {
        self.remote = true;
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn AuthorizationVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_config<F>(mut self, modify: F) -> Self
    where
        F: FnOnce(&mut AppConfig) + Send + 'static,
    {
        self.modify = Box::new(modify);
        self
    }

    pub async fn build(self) -> TestServer {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let mut config = AppConfig::for_testing(temp_dir.path());

        let remote = if self.remote {
            let server = ObjectServer::start().await;
            config.storage.remote = Some(server.config());
            Some(server)
        } else {
            None
        };
        (self.modify)(&mut config);

        let storage: Arc<StorageRouter> = librarian_storage::from_config(&config.storage)
            .await
            .expect("Failed to create storage router");

        let db_path = temp_dir.path().join("librarian.db");
        let sqlite = Arc::new(
            SqliteStore::new(&db_path)
                .await
                .expect("Failed to create metadata store"),
        );
        let metadata: Arc<dyn MetadataStore> = sqlite.clone();

        librarian_server::metrics::register_metrics();
        let state = AppState::new(config, storage, metadata, self.verifier);
        let router = create_router(state.clone());

        TestServer {
            router,
            state,
            sqlite,
            remote,
            _temp_dir: temp_dir,
        }
    }
}

/// Response parts collected from a oneshot request.
#[allow(dead_code)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[allow(dead_code)]
impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[allow(dead_code)]
impl TestServer {
    pub fn builder() -> TestServerBuilder {
        TestServerBuilder {
            remote: false,
            verifier: Arc::new(DenyAllVerifier),
            modify: Box::new(|_| {}),
        }
    }

    /// Local tier only, every macaroon denied.
    pub async fn new() -> Self {
        Self::builder().build().await
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// PUT `data` to `path` with a correct Content-Length and the given
    /// extra headers.
    pub async fn put(&self, path: &str, data: &[u8], headers: &[(&str, &str)]) -> TestResponse {
        let mut builder = Request::builder()
            .method("PUT")
            .uri(path)
            .header("content-length", data.len().to_string());
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.send(builder.body(Body::from(data.to_vec())).unwrap())
            .await
    }

    pub async fn get(&self, uri: &str, headers: &[(&str, &str)]) -> TestResponse {
        let mut builder = Request::builder().method("GET").uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    /// Upload and return `(content_id, alias_id)`, panicking on failure.
    pub async fn upload(&self, path: &str, data: &[u8], mimetype: &str) -> (i64, i64) {
        let response = self.put(path, data, &[("content-type", mimetype)]).await;
        assert_eq!(response.status, StatusCode::CREATED, "upload failed: {:?}", response.json());
        let json = response.json();
        (
            json["content_id"].as_i64().unwrap(),
            json["alias_id"].as_i64().unwrap(),
        )
    }

    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    pub fn remote(&self) -> &ObjectServer {
        self.remote.as_ref().expect("test server has no remote tier")
    }

    /// Staged files left once dropped sessions' cleanup has had a chance to run.
    pub async fn settled_staged_count(&self) -> usize {
        let local = self.state.storage.local();
        for _ in 0..50 {
            if local.list_staged().await.unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        local.list_staged().await.unwrap().len()
    }

    /// Mark an alias as reaped the way the external reaper does.
    pub async fn tombstone(&self, alias_id: i64) {
        sqlx::query("UPDATE aliases SET content_id = NULL WHERE alias_id = ?")
            .bind(alias_id)
            .execute(self.sqlite.pool())
            .await
            .unwrap();
    }

    /// Backdate the local file's mtime so the migration sweep treats the
    /// content as aged.
    pub async fn age_content(&self, content_id: i64, days: i64) {
        let id = ContentId::new(content_id).unwrap();
        let path = self.state.storage.local().root().join(content_key(id));
        let modified = SystemTime::now() - Duration::from_secs(days as u64 * 86_400);
        tokio::task::spawn_blocking(move || {
            let file = std::fs::File::options().write(true).open(path).unwrap();
            file.set_modified(modified).unwrap();
        })
        .await
        .unwrap();
    }

    /// Backdate only the ledger row, leaving the local file's mtime alone.
    pub async fn backdate_ledger(&self, content_id: i64, days: i64) {
        let created_at = time::OffsetDateTime::now_utc() - time::Duration::days(days);
        sqlx::query("UPDATE contents SET created_at = ? WHERE content_id = ?")
            .bind(created_at)
            .bind(content_id)
            .execute(self.sqlite.pool())
            .await
            .unwrap();
    }
}
