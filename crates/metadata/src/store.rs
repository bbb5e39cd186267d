//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{AliasRow, ContentRow, NewAlias};
use crate::repos::{AliasRepo, ContentRepo};
use async_trait::async_trait;
use librarian_core::{AliasId, ContentId, Sha1Hex};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: ContentRepo + AliasRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;

    /// Insert a content record and its first alias in one transaction.
    ///
    /// Either both rows become visible or neither does. Fails with
    /// `AlreadyExists` when the content id is taken.
    async fn commit_upload(
        &self,
        content: &ContentRow,
        alias: &NewAlias,
    ) -> MetadataResult<(ContentId, AliasId)>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store, creating the file and schema if needed.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection avoids
            // persistent "database is locked" failures under axum concurrency.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
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
            VALUES (?, ?, ?, ?, ?, ?)
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
            VALUES (?, ?, ?, ?, ?)
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
impl ContentRepo for SqliteStore {
    async fn allocate_content_id(&self) -> MetadataResult<ContentId> {
        let id: i64 = sqlx::query_scalar(
            r#"
            UPDATE id_sequences SET next_value = next_value + 1
            WHERE name = 'contents'
            RETURNING next_value - 1
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(ContentId::new(id)?)
    }

    async fn add_content(&self, content: &ContentRow) -> MetadataResult<ContentId> {
        let content_id = content.id()?;
        sqlx::query(
            r#"
            INSERT INTO contents (content_id, size_bytes, md5, sha1, sha256, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
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
        let row = sqlx::query_as::<_, ContentRow>("SELECT * FROM contents WHERE content_id = ?")
            .bind(content_id.get())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn content_exists(&self, content_id: ContentId) -> MetadataResult<bool> {
        let row: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM contents WHERE content_id = ?")
            .bind(content_id.get())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn lookup_by_sha1(&self, sha1: &Sha1Hex) -> MetadataResult<Vec<ContentId>> {
        let ids: Vec<i64> =
            sqlx::query_scalar("SELECT content_id FROM contents WHERE sha1 = ? ORDER BY content_id")
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
            "SELECT * FROM contents WHERE content_id > ? ORDER BY content_id LIMIT ?",
        )
        .bind(after.map(ContentId::get).unwrap_or(0))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl AliasRepo for SqliteStore {
    async fn add_alias(&self, content_id: ContentId, alias: &NewAlias) -> MetadataResult<AliasId> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM contents WHERE content_id = ?")
            .bind(content_id.get())
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(MetadataError::NotFound(format!("content_id {content_id}")));
        }

        let alias_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO aliases (content_id, filename, mimetype, restricted, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING alias_id
            "#,
        )
        .bind(content_id.get())
        .bind(&alias.filename)
        .bind(&alias.mimetype)
        .bind(alias.restricted)
        .bind(alias.created_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(AliasId::new(alias_id)?)
    }

    async fn get_alias(&self, alias_id: AliasId) -> MetadataResult<Option<AliasRow>> {
        let row = sqlx::query_as::<_, AliasRow>(
            "SELECT * FROM aliases WHERE alias_id = ? AND content_id IS NOT NULL",
        )
        .bind(alias_id.get())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_aliases(&self, content_id: ContentId) -> MetadataResult<Vec<AliasRow>> {
        let rows = sqlx::query_as::<_, AliasRow>(
            "SELECT * FROM aliases WHERE content_id = ? ORDER BY alias_id",
        )
        .bind(content_id.get())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

const SCHEMA_SQL: &str = r#"
-- Content ledger: one immutable row per stored byte sequence
CREATE TABLE IF NOT EXISTS contents (
    content_id INTEGER PRIMARY KEY,
    size_bytes INTEGER NOT NULL CHECK (size_bytes >= 0),
    md5 TEXT NOT NULL,
    sha1 TEXT NOT NULL,
    sha256 TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_contents_sha1 ON contents(sha1);

-- Alias directory. A NULL content_id marks a tombstone set by the external reaper
CREATE TABLE IF NOT EXISTS aliases (
    alias_id INTEGER PRIMARY KEY AUTOINCREMENT,
    content_id INTEGER REFERENCES contents(content_id),
    filename TEXT NOT NULL,
    mimetype TEXT NOT NULL,
    restricted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_aliases_content ON aliases(content_id);

-- Monotonic id sequences
CREATE TABLE IF NOT EXISTS id_sequences (
    name TEXT PRIMARY KEY,
    next_value INTEGER NOT NULL
);
INSERT OR IGNORE INTO id_sequences (name, next_value) VALUES ('contents', 1);
"#;
