//! Librarian server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use librarian_core::config::AppConfig;
use librarian_server::{AppState, create_router};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Librarian - a content-addressable blob store
#[derive(Parser, Debug)]
#[command(name = "librariand")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "LIBRARIAN_CONFIG",
        default_value = "config/librarian.toml"
    )]
    config: String,
}

fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if std::path::Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::info!(config_path = %path, "No config file found, using defaults and environment");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("LIBRARIAN_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Librarian v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    librarian_server::metrics::register_metrics();

    let storage = librarian_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(
        local_path = %config.storage.local_path.display(),
        remote = storage.remote().is_some(),
        "Storage tiers initialized"
    );

    let metadata = librarian_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    metadata
        .health_check()
        .await
        .context("metadata health check failed")?;
    tracing::info!("Metadata store initialized");

    let verifier = librarian_server::authz::from_config(&config.authorization)
        .context("failed to initialize authorization verifier")?;
    tracing::info!(verifier = verifier.name(), "Authorization verifier configured");

    if config.server.upload_token_hash.is_none() {
        tracing::warn!("No upload token configured, uploads are unauthenticated");
    }

    let state = AppState::new(config.clone(), storage, metadata, verifier);

    let _sweep_handle = if config.migration.enabled {
        if state.storage.remote().is_none() {
            tracing::warn!("Migration enabled without a remote tier; only staging cleanup will run");
        }
        Some(Arc::new(state.migration_sweep()).spawn())
    } else {
        tracing::info!("Migration sweep disabled");
        None
    };

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
