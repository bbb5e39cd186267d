//! In-process remote object store for tests.
//!
//! Speaks the subset of the protocol the remote backend uses: objects under
//! `/v1/AUTH_test/{container}/{key}`, `X-Auth-Token` checked on every
//! request, and PUT answered with an md5 `ETag`.

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use librarian_core::config::RemoteStoreConfig;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const TEST_TOKEN: &str = "test-token";
pub const TEST_CONTAINER: &str = "librarian";

#[derive(Clone, Default)]
struct ServerState {
    objects: Arc<Mutex<HashMap<String, Bytes>>>,
    wrong_etag: Arc<AtomicBool>,
    puts: Arc<AtomicUsize>,
}

#[allow(dead_code)]
pub struct ObjectServer {
    pub endpoint: String,
    state: ServerState,
    handle: JoinHandle<()>,
}

#[allow(dead_code)]
impl ObjectServer {
    pub async fn start() -> Self {
        let state = ServerState::default();
        let app = Router::new()
            .route("/v1/AUTH_test/{container}", any(container))
            .route("/v1/AUTH_test/{container}/{*key}", any(object))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            endpoint: format!("http://{addr}/v1/AUTH_test"),
            state,
            handle,
        }
    }

    pub fn config(&self) -> RemoteStoreConfig {
        RemoteStoreConfig {
            endpoint: self.endpoint.clone(),
            container: TEST_CONTAINER.to_string(),
            auth_token: Some(TEST_TOKEN.to_string()),
            pool_max_idle: 4,
            connect_timeout_ms: 1_000,
        }
    }

    /// Answer PUTs with an ETag that never matches.
    pub fn set_wrong_etag(&self, wrong: bool) {
        self.state.wrong_etag.store(wrong, Ordering::SeqCst);
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.state.objects.lock().unwrap().get(key).cloned()
    }

    pub fn insert(&self, key: &str, data: Bytes) {
        self.state
            .objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data);
    }

    pub fn object_count(&self) -> usize {
        self.state.objects.lock().unwrap().len()
    }

    /// Number of PUT requests that were stored.
    pub fn put_count(&self) -> usize {
        self.state.puts.load(Ordering::SeqCst)
    }
}

impl Drop for ObjectServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("x-auth-token")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == TEST_TOKEN)
}

async fn container(
    Path(name): Path<String>,
    headers: HeaderMap,
) -> StatusCode {
    if !authorized(&headers) {
        StatusCode::UNAUTHORIZED
    } else if name == TEST_CONTAINER {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn object(
    State(state): State<ServerState>,
    method: Method,
    Path((name, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if name != TEST_CONTAINER {
        return StatusCode::NOT_FOUND.into_response();
    }

    match method {
        Method::PUT => {
            let etag = if state.wrong_etag.load(Ordering::SeqCst) {
                "0".repeat(32)
            } else {
                format!("{:x}", md5::compute(&body))
            };
            state.objects.lock().unwrap().insert(key, body);
            state.puts.fetch_add(1, Ordering::SeqCst);
            (StatusCode::CREATED, [(header::ETAG, format!("\"{etag}\""))]).into_response()
        }
        Method::GET | Method::HEAD => {
            let data = state.objects.lock().unwrap().get(&key).cloned();
            match data {
                // HEAD bodies are stripped by the router after Content-Length is set.
                Some(data) => {
                    let etag = format!("\"{:x}\"", md5::compute(&data));
                    (StatusCode::OK, [(header::ETAG, etag)], data).into_response()
                }
                None => StatusCode::NOT_FOUND.into_response(),
            }
        }
        Method::DELETE => match state.objects.lock().unwrap().remove(&key) {
            Some(_) => StatusCode::NO_CONTENT.into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        },
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}
