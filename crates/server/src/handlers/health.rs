//! Liveness endpoint.

use crate::error::{ApiResult, LibrarianError};
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use librarian_storage::ObjectStore;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub remote_tier: bool,
}

/// GET /v1/health - Check the ledger and the local tier.
///
/// The remote tier is checked once at startup, not on every probe.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state
        .metadata
        .health_check()
        .await
        .map_err(LibrarianError::from)?;
    state
        .storage
        .local()
        .health_check()
        .await
        .map_err(LibrarianError::from)?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        remote_tier: state.storage.remote().is_some(),
    }))
}
