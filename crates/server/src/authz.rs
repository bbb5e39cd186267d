//! Verifiers for macaroon overrides on restricted content.
//!
//! The access gate asks a verifier whether a macaroon authorizes one
//! specific alias/content pair. Verifiers never see the namespace check and
//! keep no state between calls.

use async_trait::async_trait;
use librarian_core::config::{AuthorizationConfig, VerifierConfig};
use librarian_core::{AliasId, ContentId};
use librarian_macaroon::{Caveat, Macaroon};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;

/// What a macaroon is being checked against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct AuthorizationContext {
    pub alias_id: AliasId,
    pub content_id: ContentId,
}

/// Authorization verifier errors. The gate treats every one as a denial.
#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("authorization service request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("authorization service returned {0}")]
    Status(u16),

    #[error("invalid verifier configuration: {0}")]
    Config(String),
}

/// Result type for verifier operations.
pub type AuthzResult<T> = std::result::Result<T, AuthzError>;

/// Decides whether a macaroon grants access in a given context.
///
/// Implementations may take arbitrarily long; the caller bounds the call
/// and drops the future on timeout.
#[async_trait]
pub trait AuthorizationVerifier: Send + Sync {
    /// `Ok(true)` grants access, `Ok(false)` denies it.
    async fn verify(&self, macaroon: &str, context: &AuthorizationContext) -> AuthzResult<bool>;

    fn name(&self) -> &'static str;
}

/// Build the configured verifier.
pub fn from_config(config: &AuthorizationConfig) -> AuthzResult<Arc<dyn AuthorizationVerifier>> {
    config.validate().map_err(AuthzError::Config)?;
    match &config.verifier {
        VerifierConfig::Disabled => Ok(Arc::new(DenyAllVerifier)),
        VerifierConfig::Http { endpoint } => Ok(Arc::new(HttpAuthorizationVerifier::new(
            endpoint,
            config.timeout(),
        )?)),
        VerifierConfig::Local { root_key } => {
            let key = hex::decode(root_key).map_err(|e| AuthzError::Config(e.to_string()))?;
            Ok(Arc::new(LocalAuthorizationVerifier::new(key)))
        }
    }
}

/// Used when no authorization service is configured.
pub struct DenyAllVerifier;

#[async_trait]
impl AuthorizationVerifier for DenyAllVerifier {
    async fn verify(&self, _macaroon: &str, _context: &AuthorizationContext) -> AuthzResult<bool> {
        Ok(false)
    }

    fn name(&self) -> &'static str {
        "deny_all"
    }
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    macaroon: &'a str,
    context: &'a AuthorizationContext,
}

#[derive(Deserialize)]
struct VerifyResponse {
    valid: bool,
}

/// Asks an external authorization service over HTTP.
///
/// `POST {endpoint}` with `{"macaroon": ..., "context": {"alias_id": ..,
/// "content_id": ..}}`, answered by `{"valid": bool}`.
pub struct HttpAuthorizationVerifier {
    http: reqwest::Client,
    endpoint: reqwest::Url,
}

impl HttpAuthorizationVerifier {
    pub fn new(endpoint: &str, timeout: std::time::Duration) -> AuthzResult<Self> {
        let endpoint = reqwest::Url::parse(endpoint)
            .map_err(|e| AuthzError::Config(format!("invalid endpoint {endpoint}: {e}")))?;
        let http = reqwest::Client::builder().connect_timeout(timeout).build()?;
        Ok(Self { http, endpoint })
    }
}

#[async_trait]
impl AuthorizationVerifier for HttpAuthorizationVerifier {
    async fn verify(&self, macaroon: &str, context: &AuthorizationContext) -> AuthzResult<bool> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&VerifyRequest { macaroon, context })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthzError::Status(status.as_u16()));
        }
        let body: VerifyResponse = response.json().await?;
        Ok(body.valid)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Checks macaroons in-process against a shared root key.
///
/// Every caveat must be one this service understands and must hold for the
/// requested alias at the current time.
pub struct LocalAuthorizationVerifier {
    root_key: Vec<u8>,
}

impl LocalAuthorizationVerifier {
    pub fn new(root_key: Vec<u8>) -> Self {
        Self { root_key }
    }
}

#[async_trait]
impl AuthorizationVerifier for LocalAuthorizationVerifier {
    async fn verify(&self, macaroon: &str, context: &AuthorizationContext) -> AuthzResult<bool> {
        let Ok(macaroon) = Macaroon::deserialize(macaroon) else {
            return Ok(false);
        };
        let alias_id = context.alias_id.get();
        let now = OffsetDateTime::now_utc();
        let verdict = macaroon.verify(&self.root_key, |predicate| {
            Caveat::parse(predicate).is_some_and(|c| c.is_satisfied(alias_id, now))
        });
        if let Err(e) = &verdict {
            tracing::debug!(error = %e, "macaroon rejected");
        }
        Ok(verdict.is_ok())
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
