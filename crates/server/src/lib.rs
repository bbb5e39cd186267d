//! HTTP service for the librarian blob store.
//!
//! This crate provides:
//! - Upload sessions that stage, hash and commit files
//! - Streaming fetch from the local or remote tier
//! - The access gate for restricted content and its verifiers
//! - The background migration sweep
//! - The axum routes, Prometheus metrics and the `librariand` binary

pub mod auth;
pub mod authz;
pub mod blocking;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod librarian;
pub mod metrics;
pub mod migration;
pub mod routes;
pub mod state;
pub mod upload;

pub use auth::TraceId;
pub use authz::{
    AuthorizationContext, AuthorizationVerifier, DenyAllVerifier, HttpAuthorizationVerifier,
    LocalAuthorizationVerifier,
};
pub use blocking::BlockingPool;
pub use error::{ApiError, LibrarianError, LibrarianResult};
pub use gate::{AccessGate, AccessTarget, Denial, Grant};
pub use librarian::{AliasInfo, Librarian, NewFile};
pub use migration::{MigrationSweep, SweepStats};
pub use routes::create_router;
pub use state::AppState;
pub use upload::{StoredFile, UploadSession};
