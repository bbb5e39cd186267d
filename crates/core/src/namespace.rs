//! Access namespaces.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The namespace a request is served from.
///
/// Restricted content is only served from the restricted namespace, and
/// unrestricted content only from the unrestricted one, unless a macaroon
/// authorizes the crossing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Unrestricted,
    Restricted,
}

impl Namespace {
    /// Namespace that content with the given flag lives in.
    pub fn for_content(restricted: bool) -> Self {
        if restricted {
            Self::Restricted
        } else {
            Self::Unrestricted
        }
    }

    pub fn is_restricted(self) -> bool {
        matches!(self, Self::Restricted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unrestricted => "unrestricted",
            Self::Restricted => "restricted",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
