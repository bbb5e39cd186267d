//! Request credentials: the upload bearer token, read macaroons, and the
//! per-request trace id.

use crate::error::{ApiError, ApiResult};
use axum::extract::Request;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use librarian_core::config::ServerConfig;
use sha2::{Digest, Sha256};
use tracing::Instrument;
use uuid::Uuid;

/// Longer client trace ids are truncated to keep logs bounded.
const MAX_TRACE_ID_LEN: usize = 128;

const TRACE_ID_HEADER: &str = "x-trace-id";

/// Trace id for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accept a client-provided id, keeping only printable ASCII.
    pub fn from_client(value: &str) -> Self {
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic())
            .collect();
        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Credentials of `scheme` in the Authorization header. The scheme name is
/// case-insensitive.
fn authorization_credentials<'a>(headers: &'a HeaderMap, scheme: &str) -> Option<&'a str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (given, credentials) = value.split_once(' ')?;
    given
        .eq_ignore_ascii_case(scheme)
        .then(|| credentials.trim())
        .filter(|c| !c.is_empty())
}

/// SHA-256 hex of a bearer token, the form kept in configuration.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Compare without an early exit on the first differing byte.
fn hashes_match(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a
            .bytes()
            .zip(b.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y.to_ascii_lowercase()))
            == 0
}

/// Check the upload bearer token when one is configured.
pub fn require_upload_token(config: &ServerConfig, headers: &HeaderMap) -> ApiResult<()> {
    let Some(expected) = &config.upload_token_hash else {
        return Ok(());
    };
    let token = authorization_credentials(headers, "bearer")
        .ok_or_else(|| ApiError::Unauthorized("upload token required".to_string()))?;
    if hashes_match(&hash_token(token), expected) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized("invalid upload token".to_string()))
    }
}

/// The macaroon presented with a read: `Authorization: Macaroon <token>`
/// takes precedence over a `?token=` query parameter.
pub fn extract_macaroon(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    authorization_credentials(headers, "macaroon")
        .or(query_token.filter(|t| !t.is_empty()))
        .map(str::to_string)
}

/// Attach a trace id to the request, run it inside a span carrying that id,
/// and echo the id back on the response.
pub async fn trace_id_middleware(mut req: Request, next: Next) -> Response {
    let trace_id = req
        .headers()
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_default();
    req.extensions_mut().insert(trace_id.clone());

    let span = tracing::info_span!("request", trace_id = %trace_id);
    let mut response = next.run(req).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(trace_id.as_str()) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    response
}
