//! Test data and credential fixtures.

use librarian_macaroon::{Caveat, Macaroon};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

/// Root key shared by tests that use the local verifier.
#[allow(dead_code)]
pub const ROOT_KEY: &[u8] = b"librarian-test-root-key-0123456789";

#[allow(dead_code)]
pub fn sha1_hex(data: &[u8]) -> String {
    librarian_core::Sha1Hex::compute(data).as_str().to_string()
}

#[allow(dead_code)]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Deterministic pseudo-random bytes.
#[allow(dead_code)]
pub fn seeded_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}

/// A macaroon granting access to `alias_id`, optionally expiring.
#[allow(dead_code)]
pub fn macaroon_for(root_key: &[u8], alias_id: i64, expires: Option<OffsetDateTime>) -> String {
    let mut macaroon =
        Macaroon::mint(root_key, Some("librarian"), Macaroon::random_identifier()).unwrap();
    macaroon.add_first_party_caveat(Caveat::Alias(alias_id).to_string());
    if let Some(at) = expires {
        macaroon.add_first_party_caveat(Caveat::Expires(at).to_string());
    }
    macaroon.serialize().unwrap()
}
