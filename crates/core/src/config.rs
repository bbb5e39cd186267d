//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Number of threads allowed to run blocking upload work at once
    /// (staging writes and digest computation).
    #[serde(default = "default_blocking_threads")]
    pub blocking_threads: usize,
    /// Pre-computed hash of the upload bearer token (SHA256 hex, 64 characters).
    /// When unset, uploads are accepted without authentication.
    /// Generate with: `echo -n "your-secret-token" | sha256sum`
    #[serde(default)]
    pub upload_token_hash: Option<String>,
    /// Maximum accepted upload size in bytes.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// SECURITY: When enabled, ensure this endpoint is network-restricted
    /// to authorized Prometheus scraper IPs only at the infrastructure level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_blocking_threads() -> usize {
    16
}

fn default_max_upload_size() -> u64 {
    crate::DEFAULT_MAX_UPLOAD_SIZE
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            blocking_threads: default_blocking_threads(),
            upload_token_hash: None,
            max_upload_size: default_max_upload_size(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.blocking_threads == 0 {
            return Err("server.blocking_threads must be at least 1".to_string());
        }
        if let Some(hash) = &self.upload_token_hash
            && (hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()))
        {
            return Err(
                "server.upload_token_hash must be a 64 character SHA256 hex digest".to_string(),
            );
        }
        Ok(())
    }
}

/// Storage configuration: a local fast store plus an optional remote tier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the local fast store.
    #[serde(default = "default_local_path")]
    pub local_path: PathBuf,
    /// Remote object store that aged content migrates to.
    #[serde(default)]
    pub remote: Option<RemoteStoreConfig>,
}

fn default_local_path() -> PathBuf {
    PathBuf::from("./data/storage")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local_path: default_local_path(),
            remote: None,
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match &self.remote {
            Some(remote) => remote.validate(),
            None => Ok(()),
        }
    }
}

/// Remote object store reached over HTTP/1.1.
///
/// Objects live at `{endpoint}/{container}/{key}`; requests carry the
/// configured token in `X-Auth-Token`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteStoreConfig {
    /// Base URL, e.g. "http://swift.internal:8080/v1/AUTH_librarian".
    pub endpoint: String,
    /// Container name.
    pub container: String,
    /// Auth token sent with every request.
    /// WARNING: Prefer LIBRARIAN_STORAGE__REMOTE__AUTH_TOKEN over storing in config.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Maximum number of idle connections kept in the pool.
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle: usize,
    /// Connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_pool_max_idle() -> usize {
    8
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

impl RemoteStoreConfig {
    /// Validate remote store configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if !self.endpoint.starts_with("http://") {
            return Err(format!(
                "storage.remote.endpoint must be an http:// URL, got {}",
                self.endpoint
            ));
        }
        if self.container.is_empty() || self.container.contains('/') {
            return Err("storage.remote.container must be a non-empty name without '/'".into());
        }
        if self.pool_max_idle == 0 {
            return Err("storage.remote.pool_max_idle must be at least 1".to_string());
        }
        Ok(())
    }

    /// Connect timeout as a std Duration.
    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.connect_timeout_ms)
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (recommended for testing and small deployments only).
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL (optional if using individual fields).
        /// Takes precedence over individual fields if both are provided.
        url: Option<String>,
        /// Database host.
        host: Option<String>,
        /// Database port (default: 5432).
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        /// Database username.
        username: Option<String>,
        /// Database password.
        /// WARNING: Prefer LIBRARIAN_METADATA__PASSWORD env var over storing in config.
        password: Option<String>,
        /// Database name.
        database: Option<String>,
        /// SSL mode for connections.
        ssl_mode: Option<PgSslMode>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/librarian.db"),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                ..
            } => match (url.as_ref(), host.as_ref(), database.as_ref()) {
                (Some(_), _, _) | (None, Some(_), Some(_)) => Ok(()),
                (None, None, _) => {
                    Err("postgres config requires either 'url' or 'host' + 'database'".to_string())
                }
                (None, Some(_), None) => Err(
                    "postgres config requires 'database' when using individual fields".to_string(),
                ),
            },
        }
    }
}

/// Local-to-remote migration sweep configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Run the sweep periodically in the background (disabled by default).
    #[serde(default)]
    pub enabled: bool,
    /// Interval in seconds between sweeps (default: 1 hour).
    #[serde(default = "default_migration_interval_secs")]
    pub interval_secs: u64,
    /// Content younger than this stays local (default: 24 hours).
    /// Also the age after which abandoned staging files are removed.
    #[serde(default = "default_migration_min_age_secs")]
    pub min_age_secs: u64,
    /// Number of ledger rows read per page.
    #[serde(default = "default_migration_batch_size")]
    pub batch_size: u32,
    /// Report what would be migrated without moving anything.
    #[serde(default)]
    pub dry_run: bool,
}

fn default_migration_interval_secs() -> u64 {
    3600
}

fn default_migration_min_age_secs() -> u64 {
    86_400
}

fn default_migration_batch_size() -> u32 {
    500
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_migration_interval_secs(),
            min_age_secs: default_migration_min_age_secs(),
            batch_size: default_migration_batch_size(),
            dry_run: false,
        }
    }
}

impl MigrationConfig {
    /// Minimum age as a time Duration.
    pub fn min_age(&self) -> Duration {
        // Saturate at i64::MAX to prevent overflow wrapping to negative
        let secs = i64::try_from(self.min_age_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs)
    }

    /// Sweep interval as a std Duration.
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }

    /// Validate migration configuration for dangerous settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.enabled && self.interval_secs == 0 {
            return Err("migration.interval_secs cannot be 0 when migration is enabled".into());
        }
        if self.batch_size == 0 {
            return Err("migration.batch_size must be at least 1".to_string());
        }
        Ok(())
    }
}

/// How macaroon overrides for restricted content are verified.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum VerifierConfig {
    /// No authorization service: every override is denied.
    #[default]
    Disabled,
    /// Remote authorization service speaking JSON over HTTP.
    Http {
        /// Verification endpoint URL.
        endpoint: String,
    },
    /// Verify macaroons in-process against a shared root key.
    Local {
        /// Root key, hex encoded.
        /// WARNING: Prefer LIBRARIAN_AUTHORIZATION__VERIFIER__ROOT_KEY over storing in config.
        root_key: String,
    },
}

/// Access gate configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorizationConfig {
    /// Upper bound on a single verification call, in milliseconds.
    #[serde(default = "default_authorization_timeout_ms")]
    pub timeout_ms: u64,
    /// Verifier backend.
    #[serde(default)]
    pub verifier: VerifierConfig,
}

fn default_authorization_timeout_ms() -> u64 {
    2_000
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_authorization_timeout_ms(),
            verifier: VerifierConfig::default(),
        }
    }
}

impl AuthorizationConfig {
    /// Verification timeout as a std Duration.
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }

    /// Validate authorization configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout_ms == 0 {
            return Err("authorization.timeout_ms must be at least 1".to_string());
        }
        match &self.verifier {
            VerifierConfig::Local { root_key } => match hex::decode(root_key) {
                Ok(key) if key.len() >= 16 => Ok(()),
                Ok(_) => Err("authorization.verifier.root_key must be at least 16 bytes".into()),
                Err(e) => Err(format!("authorization.verifier.root_key is not hex: {e}")),
            },
            VerifierConfig::Http { endpoint } if endpoint.is_empty() => {
                Err("authorization.verifier.endpoint cannot be empty".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage tiers.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Migration sweep configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
    /// Access gate configuration.
    #[serde(default)]
    pub authorization: AuthorizationConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses filesystem storage and SQLite metadata
    /// under the given directory, with no remote tier.
    pub fn for_testing(dir: &std::path::Path) -> Self {
        Self {
            storage: StorageConfig {
                local_path: dir.join("storage"),
                remote: None,
            },
            metadata: MetadataConfig::Sqlite {
                path: dir.join("librarian.db"),
            },
            ..Self::default()
        }
    }

    /// Validate every section, returning the first error found.
    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;
        self.storage.validate()?;
        self.metadata.validate()?;
        self.migration.validate()?;
        self.authorization.validate()
    }
}
