//! Route configuration.

use crate::auth::trace_id_middleware;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::get;
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let file_routes = Router::new()
        .route(
            "/v1/files/{id}",
            get(handlers::get_file).put(handlers::put_file),
        )
        .route("/v1/files/{id}/{filename}", get(handlers::get_named_file))
        .route(
            "/v1/restricted/files/{id}",
            get(handlers::get_restricted_file).put(handlers::put_restricted_file),
        )
        .route(
            "/v1/restricted/files/{id}/{filename}",
            get(handlers::get_restricted_named_file),
        );

    // Unauthenticated so load balancers can probe it.
    let mut router = Router::new()
        .route("/v1/health", get(handlers::health_check))
        .merge(file_routes);

    // SECURITY: restrict /metrics to the scrapers at the network level.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .layer(middleware::from_fn(trace_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
