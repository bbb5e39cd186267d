//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{AliasRow, ContentRow, NewAlias};
use crate::repos::{AliasRepo, ContentRepo};
use crate::store::MetadataStore;
use async_trait::async_trait;
use librarian_core::config::PgSslMode;
use librarian_core::{AliasId, ContentId, Sha1Hex};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres};
use std::str::FromStr;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(url: &str, max_connections: u32) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    ///
    /// This allows credentials to be passed separately, so passwords can come
    /// from the environment instead of a URL in the config file.
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }
        if let Some(pass) = password {
            opts = opts.password(pass);
        }
        if let Some(mode) = ssl_mode {
            opts = opts.ssl_mode(match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            });
        }

        // Log connection info without password
        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections).await
    }

    async fn connect(opts: PgConnectOptions, max_connections: u32) -> MetadataResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // PostgreSQL doesn't allow multiple statements in a single prepared statement.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn commit_upload(
        &self,
        content: &ContentRow,
        alias: &NewAlias,
    ) -> MetadataResult<(ContentId, AliasId)> {
        let content_id = content.id()?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO contents (content_id, size_bytes, md5, sha1, sha256, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(content.content_id)
        .bind(content.size_bytes)
        .bind(&content.md5)
        .bind(&content.sha1)
        .bind(&content.sha256)
        .bind(content.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            MetadataError::from_insert(e, || format!("content_id {content_id} already exists"))
        })?;

        let alias_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO aliases (content_id, filename, mimetype, restricted, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING alias_id
            "#,
        )
        .bind(content.content_id)
        .bind(&alias.filename)
        .bind(&alias.mimetype)
        .bind(alias.restricted)
        .bind(alias.created_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((content_id, AliasId::new(alias_id)?))
    }
}

#[async_trait]
impl ContentRepo for PostgresStore {
    async fn allocate_content_id(&self) -> MetadataResult<ContentId> {
        let id: i64 = sqlx::query_scalar("SELECT nextval('content_id_seq')")
            .fetch_one(&self.pool)
            .await?;
        Ok(ContentId::new(id)?)
    }

    async fn add_content(&self, content: &ContentRow) -> MetadataResult<ContentId> {
        let content_id = content.id()?;
        sqlx::query(
            r#"
            INSERT INTO contents (content_id, size_bytes, md5, sha1, sha256, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(content.content_id)
        .bind(content.size_bytes)
        .bind(&content.md5)
        .bind(&content.sha1)
        .bind(&content.sha256)
        .bind(content.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            MetadataError::from_insert(e, || format!("content_id {content_id} already exists"))
        })?;
        Ok(content_id)
    }

    async fn get_content(&self, content_id: ContentId) -> MetadataResult<Option<ContentRow>> {
        let row = sqlx::query_as::<_, ContentRow>("SELECT * FROM contents WHERE content_id = $1")
            .bind(content_id.get())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn content_exists(&self, content_id: ContentId) -> MetadataResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM contents WHERE content_id = $1)")
                .bind(content_id.get())
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn lookup_by_sha1(&self, sha1: &Sha1Hex) -> MetadataResult<Vec<ContentId>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT content_id FROM contents WHERE sha1 = $1 ORDER BY content_id",
        )
        .bind(sha1.as_str())
        .fetch_all(&self.pool)
        .await?;
        ids.into_iter()
            .map(|id| ContentId::new(id).map_err(Into::into))
            .collect()
    }

    async fn list_contents(
        &self,
        after: Option<ContentId>,
        limit: u32,
    ) -> MetadataResult<Vec<ContentRow>> {
        let rows = sqlx::query_as::<_, ContentRow>(
            "SELECT * FROM contents WHERE content_id > $1 ORDER BY content_id LIMIT $2",
        )
        .bind(after.map(ContentId::get).unwrap_or(0))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl AliasRepo for PostgresStore {
    async fn add_alias(&self, content_id: ContentId, alias: &NewAlias) -> MetadataResult<AliasId> {
        // The foreign key rejects unknown content; map that to NotFound.
        let alias_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO aliases (content_id, filename, mimetype, restricted, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING alias_id
            "#,
        )
        .bind(content_id.get())
        .bind(&alias.filename)
        .bind(&alias.mimetype)
        .bind(alias.restricted)
        .bind(alias.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                MetadataError::NotFound(format!("content_id {content_id}"))
            }
            other => MetadataError::Database(other),
        })?;
        Ok(AliasId::new(alias_id)?)
    }

    async fn get_alias(&self, alias_id: AliasId) -> MetadataResult<Option<AliasRow>> {
        let row = sqlx::query_as::<_, AliasRow>(
            "SELECT * FROM aliases WHERE alias_id = $1 AND content_id IS NOT NULL",
        )
        .bind(alias_id.get())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_aliases(&self, content_id: ContentId) -> MetadataResult<Vec<AliasRow>> {
        let rows = sqlx::query_as::<_, AliasRow>(
            "SELECT * FROM aliases WHERE content_id = $1 ORDER BY alias_id",
        )
        .bind(content_id.get())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
