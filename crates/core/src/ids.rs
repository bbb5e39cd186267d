//! Identifiers for content records, aliases and staging files.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of an immutable content record. Always positive.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(i64);

impl ContentId {
    /// Wrap a raw id, rejecting zero and negatives.
    pub fn new(id: i64) -> crate::Result<Self> {
        if id <= 0 {
            return Err(crate::Error::InvalidContentId(format!(
                "content ids are positive, got {id}"
            )));
        }
        Ok(Self(id))
    }

    pub fn get(self) -> i64 {
        self.0
    }

    /// Fixed-width lowercase hex, used to derive storage keys.
    pub fn to_hex(self) -> String {
        format!("{:016x}", self.0)
    }
}

impl FromStr for ContentId {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let id = s
            .parse::<i64>()
            .map_err(|e| crate::Error::InvalidContentId(format!("{s}: {e}")))?;
        Self::new(id)
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.0)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an alias (a named, typed pointer to content).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AliasId(i64);

impl AliasId {
    pub fn new(id: i64) -> crate::Result<Self> {
        if id <= 0 {
            return Err(crate::Error::InvalidAliasId(format!(
                "alias ids are positive, got {id}"
            )));
        }
        Ok(Self(id))
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl FromStr for AliasId {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let id = s
            .parse::<i64>()
            .map_err(|e| crate::Error::InvalidAliasId(format!("{s}: {e}")))?;
        Self::new(id)
    }
}

impl fmt::Debug for AliasId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AliasId({})", self.0)
    }
}

impl fmt::Display for AliasId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique name of an in-progress upload's staging file.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StagingId(Uuid);

impl StagingId {
    /// Generate a new random staging ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidStagingId(format!("{s}: {e}")))
    }
}

impl Default for StagingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StagingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StagingId({})", self.0)
    }
}

impl fmt::Display for StagingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Validate a client-supplied filename for an alias.
///
/// Filenames are display names only; they never become storage paths, but
/// path separators and control characters are still rejected so that
/// `Content-Disposition` and URL paths stay well-formed.
pub fn validate_filename(name: &str) -> crate::Result<()> {
    if name.is_empty() || name.len() > 255 {
        return Err(crate::Error::InvalidFilename(format!(
            "length must be 1..=255, got {}",
            name.len()
        )));
    }
    if name == "." || name == ".." {
        return Err(crate::Error::InvalidFilename(name.to_string()));
    }
    if name.chars().any(|c| c == '/' || c == '\\' || c.is_control()) {
        return Err(crate::Error::InvalidFilename(format!(
            "{name:?} contains a path separator or control character"
        )));
    }
    Ok(())
}
