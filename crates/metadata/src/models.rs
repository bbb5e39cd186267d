//! Database models mapping to the metadata schema.

use librarian_core::{AliasId, ContentDigests, ContentId};
use sqlx::FromRow;
use time::OffsetDateTime;

// =============================================================================
// Content ledger
// =============================================================================

/// Immutable content record. Rows are inserted once and never updated.
#[derive(Debug, Clone, FromRow)]
pub struct ContentRow {
    pub content_id: i64,
    pub size_bytes: i64,
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
    pub created_at: OffsetDateTime,
}

impl ContentRow {
    /// Build a row for newly uploaded bytes.
    pub fn new(id: ContentId, size: u64, digests: &ContentDigests) -> Self {
        Self {
            content_id: id.get(),
            size_bytes: i64::try_from(size).unwrap_or(i64::MAX),
            md5: digests.md5_hex(),
            sha1: digests.sha1_hex().to_string(),
            sha256: digests.sha256_hex(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn id(&self) -> Result<ContentId, librarian_core::Error> {
        ContentId::new(self.content_id)
    }

    pub fn size(&self) -> u64 {
        u64::try_from(self.size_bytes).unwrap_or(0)
    }

    pub fn digests(&self) -> Result<ContentDigests, librarian_core::Error> {
        ContentDigests::from_hex(&self.md5, &self.sha1, &self.sha256)
    }
}

// =============================================================================
// Alias directory
// =============================================================================

/// Alias record. A NULL `content_id` marks an alias tombstoned by the
/// external reaper; such rows are never returned by the repositories.
#[derive(Debug, Clone, FromRow)]
pub struct AliasRow {
    pub alias_id: i64,
    pub content_id: Option<i64>,
    pub filename: String,
    pub mimetype: String,
    pub restricted: bool,
    pub created_at: OffsetDateTime,
}

impl AliasRow {
    pub fn id(&self) -> Result<AliasId, librarian_core::Error> {
        AliasId::new(self.alias_id)
    }

    /// Content the alias points at, or `None` when tombstoned.
    pub fn content(&self) -> Option<ContentId> {
        self.content_id.and_then(|id| ContentId::new(id).ok())
    }
}

/// Fields supplied when creating an alias; the id is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewAlias {
    pub filename: String,
    pub mimetype: String,
    pub restricted: bool,
    pub created_at: OffsetDateTime,
}

impl NewAlias {
    pub fn new(filename: impl Into<String>, mimetype: impl Into<String>, restricted: bool) -> Self {
        Self {
            filename: filename.into(),
            mimetype: mimetype.into(),
            restricted,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}
