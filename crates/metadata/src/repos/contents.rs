//! Content ledger repository.

use crate::error::MetadataResult;
use crate::models::ContentRow;
use async_trait::async_trait;
use librarian_core::{ContentId, Sha1Hex};

/// Repository for content records.
///
/// Records are append-only: there is no update or delete.
#[async_trait]
pub trait ContentRepo: Send + Sync {
    /// Take the next id from the content id sequence.
    ///
    /// Ids handed out here are never handed out again, even when the upload
    /// that took one is abandoned.
    async fn allocate_content_id(&self) -> MetadataResult<ContentId>;

    /// Insert a content record.
    /// Fails with `AlreadyExists` if the id is taken.
    async fn add_content(&self, content: &ContentRow) -> MetadataResult<ContentId>;

    /// Get a content record by id.
    async fn get_content(&self, content_id: ContentId) -> MetadataResult<Option<ContentRow>>;

    /// Check whether a content record exists.
    async fn content_exists(&self, content_id: ContentId) -> MetadataResult<bool>;

    /// All content ids whose sha1 matches, ascending.
    ///
    /// Identical bytes uploaded more than once yield several ids; they are
    /// never merged.
    async fn lookup_by_sha1(&self, sha1: &Sha1Hex) -> MetadataResult<Vec<ContentId>>;

    /// Page through the ledger in id order, starting after `after`.
    async fn list_contents(
        &self,
        after: Option<ContentId>,
        limit: u32,
    ) -> MetadataResult<Vec<ContentRow>>;
}
