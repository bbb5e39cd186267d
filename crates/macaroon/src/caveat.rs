//! First-party caveats librarian understands.
//!
//! Caveats are `key op value` strings:
//! - `alias = <id>`: the macaroon grants access to that alias only
//! - `expires < <rfc3339>`: the macaroon is void at and after that instant

use std::fmt;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// A parsed caveat.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Caveat {
    Alias(i64),
    Expires(OffsetDateTime),
}

impl Caveat {
    /// Parse a caveat predicate. Returns `None` for predicates this crate
    /// does not know, which verifiers treat as unsatisfied.
    pub fn parse(predicate: &str) -> Option<Self> {
        let (key, rest) = predicate.split_once(' ')?;
        let (op, value) = rest.trim_start().split_once(' ')?;
        let value = value.trim();
        match (key, op) {
            ("alias", "=") => value.parse().ok().map(Caveat::Alias),
            ("expires", "<") => OffsetDateTime::parse(value, &Rfc3339)
                .ok()
                .map(Caveat::Expires),
            _ => None,
        }
    }

    /// Whether the caveat holds for a request on `alias_id` at `now`.
    pub fn is_satisfied(&self, alias_id: i64, now: OffsetDateTime) -> bool {
        match self {
            Caveat::Alias(id) => *id == alias_id,
            Caveat::Expires(at) => now < *at,
        }
    }
}

impl fmt::Display for Caveat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Caveat::Alias(id) => write!(f, "alias = {id}"),
            Caveat::Expires(at) => {
                let at = at.format(&Rfc3339).map_err(|_| fmt::Error)?;
                write!(f, "expires < {at}")
            }
        }
    }
}
