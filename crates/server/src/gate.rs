//! Access gate for restricted content.
//!
//! A request arrives in a namespace chosen by the endpoint that received it.
//! If that namespace matches the alias's restricted flag, access is granted.
//! Otherwise the caller must present a macaroon scoped to this alias, which
//! the configured verifier must accept within the timeout. Every denial is
//! reported to the caller as not found.

use crate::authz::{AuthorizationContext, AuthorizationVerifier};
use crate::metrics;
use librarian_core::{AliasId, ContentId, Namespace};
use librarian_macaroon::Macaroon;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Why access was granted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Grant {
    Namespace,
    Macaroon,
}

/// Why access was refused. Only used for logs and metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Denial {
    NamespaceMismatch,
    MalformedMacaroon,
    WrongTarget,
    Rejected,
    Timeout,
    VerifierError,
}

impl Denial {
    pub fn as_str(&self) -> &'static str {
        match self {
            Denial::NamespaceMismatch => "namespace_mismatch",
            Denial::MalformedMacaroon => "malformed_macaroon",
            Denial::WrongTarget => "wrong_target",
            Denial::Rejected => "rejected",
            Denial::Timeout => "timeout",
            Denial::VerifierError => "verifier_error",
        }
    }
}

/// The alias/content pair being requested.
#[derive(Clone, Copy, Debug)]
pub struct AccessTarget {
    pub alias_id: AliasId,
    pub content_id: ContentId,
    pub restricted: bool,
}

pub struct AccessGate {
    verifier: Arc<dyn AuthorizationVerifier>,
    timeout: Duration,
}

impl AccessGate {
    pub fn new(verifier: Arc<dyn AuthorizationVerifier>, timeout: Duration) -> Self {
        Self { verifier, timeout }
    }

    /// Decide whether this single request may read `target`.
    pub async fn check(
        &self,
        target: AccessTarget,
        namespace: Namespace,
        macaroon: Option<&str>,
    ) -> Result<Grant, Denial> {
        let result = self.decide(target, namespace, macaroon).await;
        match &result {
            Ok(grant) => {
                tracing::debug!(alias_id = %target.alias_id, ?grant, "access granted");
            }
            Err(denial) => {
                metrics::AUTHZ_DENIALS
                    .with_label_values(&[denial.as_str()])
                    .inc();
                tracing::info!(
                    alias_id = %target.alias_id,
                    namespace = %namespace,
                    reason = denial.as_str(),
                    "access denied"
                );
            }
        }
        result
    }

    async fn decide(
        &self,
        target: AccessTarget,
        namespace: Namespace,
        macaroon: Option<&str>,
    ) -> Result<Grant, Denial> {
        if namespace == Namespace::for_content(target.restricted) {
            return Ok(Grant::Namespace);
        }
        let token = macaroon.ok_or(Denial::NamespaceMismatch)?;

        // A claim for another alias is refused without asking the verifier.
        let parsed = Macaroon::deserialize(token).map_err(|_| Denial::MalformedMacaroon)?;
        if parsed.target_alias() != Some(target.alias_id.get()) {
            return Err(Denial::WrongTarget);
        }

        let context = AuthorizationContext {
            alias_id: target.alias_id,
            content_id: target.content_id,
        };
        let started = Instant::now();
        // On timeout the verify future is dropped, which cancels the call.
        let outcome = tokio::time::timeout(self.timeout, self.verifier.verify(token, &context)).await;
        metrics::AUTHZ_DURATION.observe(started.elapsed().as_secs_f64());

        match outcome {
            Ok(Ok(true)) => Ok(Grant::Macaroon),
            Ok(Ok(false)) => Err(Denial::Rejected),
            Ok(Err(e)) => {
                tracing::warn!(verifier = self.verifier.name(), error = %e, "authorization check failed");
                Err(Denial::VerifierError)
            }
            Err(_) => {
                tracing::warn!(
                    verifier = self.verifier.name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "authorization check timed out"
                );
                Err(Denial::Timeout)
            }
        }
    }
}
