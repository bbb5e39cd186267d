//! Alias directory repository.

use crate::error::MetadataResult;
use crate::models::{AliasRow, NewAlias};
use async_trait::async_trait;
use librarian_core::{AliasId, ContentId};

/// Repository for aliases: named, typed pointers to content.
#[async_trait]
pub trait AliasRepo: Send + Sync {
    /// Create an alias for existing content.
    /// Fails with `NotFound` if the content record does not exist.
    async fn add_alias(&self, content_id: ContentId, alias: &NewAlias) -> MetadataResult<AliasId>;

    /// Get a live alias. Returns `None` for unknown and tombstoned aliases alike.
    async fn get_alias(&self, alias_id: AliasId) -> MetadataResult<Option<AliasRow>>;

    /// Live aliases pointing at a content record, in id order.
    async fn list_aliases(&self, content_id: ContentId) -> MetadataResult<Vec<AliasRow>>;
}
