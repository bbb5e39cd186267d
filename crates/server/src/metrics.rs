//! Prometheus metrics for the librarian server.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Metrics carry no filenames, alias ids or digests, only aggregate counts.
//! The endpoint should still be network-restricted to the scrapers.

use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry, TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Upload metrics
pub static UPLOADS_COMMITTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "librarian_uploads_committed_total",
        "Total number of uploads committed to the ledger",
    )
    .expect("metric creation failed")
});

pub static UPLOADS_REJECTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "librarian_uploads_rejected_total",
            "Total number of uploads rejected, by reason",
        ),
        &["reason"],
    )
    .expect("metric creation failed")
});

pub static BYTES_STORED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "librarian_bytes_stored_total",
        "Total bytes committed to the local tier",
    )
    .expect("metric creation failed")
});

pub static ACTIVE_UPLOADS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "librarian_active_uploads",
        "Number of upload sessions currently open",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_COMMIT_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "librarian_upload_commit_duration_seconds",
            "Time taken to finalize and commit an upload",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
    )
    .expect("metric creation failed")
});

// Fetch metrics
pub static FETCHES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "librarian_fetches_total",
            "Total number of fetch requests, by serving tier or failure outcome",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

// Access gate metrics
pub static AUTHZ_DENIALS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "librarian_authz_denials_total",
            "Total number of access denials, by reason",
        ),
        &["reason"],
    )
    .expect("metric creation failed")
});

pub static AUTHZ_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "librarian_authz_verify_duration_seconds",
            "Time spent waiting on the authorization verifier",
        )
        .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
    )
    .expect("metric creation failed")
});

// Migration metrics
pub static MIGRATIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "librarian_migrations_total",
            "Total number of content migrations attempted, by outcome",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static MIGRATED_BYTES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "librarian_migrated_bytes_total",
        "Total bytes moved from the local to the remote tier",
    )
    .expect("metric creation failed")
});

pub static SWEEP_RUNS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "librarian_migration_sweeps_total",
            "Total number of migration sweeps, by result",
        ),
        &["result"],
    )
    .expect("metric creation failed")
});

// Remote connection pool, refreshed on every scrape
pub static REMOTE_POOL: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "librarian_remote_pool_connections",
            "Remote store connection pool counters",
        ),
        &["kind"],
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so integration tests can build many routers.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(UPLOADS_COMMITTED.clone()),
            Box::new(UPLOADS_REJECTED.clone()),
            Box::new(BYTES_STORED.clone()),
            Box::new(ACTIVE_UPLOADS.clone()),
            Box::new(UPLOAD_COMMIT_DURATION.clone()),
            Box::new(FETCHES.clone()),
            Box::new(AUTHZ_DENIALS.clone()),
            Box::new(AUTHZ_DURATION.clone()),
            Box::new(MIGRATIONS.clone()),
            Box::new(MIGRATED_BYTES.clone()),
            Box::new(SWEEP_RUNS.clone()),
            Box::new(REMOTE_POOL.clone()),
        ];
        for collector in collectors {
            REGISTRY
                .register(collector)
                .expect("metric registration failed");
        }
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(stats) = state.storage.remote_pool_stats() {
        let as_gauge = |v: u64| i64::try_from(v).unwrap_or(i64::MAX);
        REMOTE_POOL
            .with_label_values(&["idle"])
            .set(as_gauge(stats.idle as u64));
        REMOTE_POOL
            .with_label_values(&["created"])
            .set(as_gauge(stats.created));
        REMOTE_POOL
            .with_label_values(&["reused"])
            .set(as_gauge(stats.reused));
        REMOTE_POOL
            .with_label_values(&["discarded"])
            .set(as_gauge(stats.discarded));
    }

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Record an upload rejection by reason.
pub fn record_upload_rejected(reason: &str) {
    UPLOADS_REJECTED.with_label_values(&[reason]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        register_metrics();
        register_metrics();
        record_upload_rejected("digest_mismatch");
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&REGISTRY.gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("librarian_uploads_rejected_total{reason=\"digest_mismatch\"}"));
    }
}
