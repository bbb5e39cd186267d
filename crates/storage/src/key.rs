//! Object key layout.

use librarian_core::{ContentId, StagingId};

/// Directory under the local root holding in-progress uploads.
pub const STAGING_DIR: &str = "incoming";

/// Key of a content object, identical on both tiers.
///
/// Sequential ids would pile into one directory if sharded on the leading
/// digits, so the two shard levels come from the low-order bytes.
pub fn content_key(id: ContentId) -> String {
    let hex = id.to_hex();
    format!("contents/{}/{}/{}", &hex[14..16], &hex[12..14], hex)
}

/// Key of a staging file, relative to the local root.
pub fn staging_key(id: StagingId) -> String {
    format!("{STAGING_DIR}/{id}")
}
