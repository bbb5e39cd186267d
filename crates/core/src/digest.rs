//! Content digests: md5, sha1 and sha256 computed in one pass.

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;

/// A validated, lowercase SHA-1 hex digest (40 characters).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sha1Hex(String);

impl Sha1Hex {
    /// Parse a hex SHA-1, accepting either case.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.len() != 40 {
            return Err(crate::Error::InvalidDigest(format!(
                "expected 40 hex chars, got {}",
                s.len()
            )));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(crate::Error::InvalidDigest(format!(
                "not a hex sha1: {s}"
            )));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Compute the SHA-1 of a byte slice.
    pub fn compute(data: &[u8]) -> Self {
        Self(hex::encode(Sha1::digest(data)))
    }

    /// Lowercase hex form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Sha1Hex {
    type Error = crate::Error;

    fn try_from(s: String) -> crate::Result<Self> {
        Self::parse(&s)
    }
}

impl From<Sha1Hex> for String {
    fn from(h: Sha1Hex) -> Self {
        h.0
    }
}

impl fmt::Debug for Sha1Hex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha1Hex({})", &self.0[..12])
    }
}

impl fmt::Display for Sha1Hex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The three digests recorded for every piece of content.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigests {
    pub md5: [u8; 16],
    pub sha1: [u8; 20],
    pub sha256: [u8; 32],
}

impl ContentDigests {
    /// Compute all digests of a byte slice.
    pub fn compute(data: &[u8]) -> Self {
        let mut acc = DigestAccumulator::new();
        acc.update(data);
        acc.finalize()
    }

    pub fn md5_hex(&self) -> String {
        hex::encode(self.md5)
    }

    pub fn sha1_hex(&self) -> Sha1Hex {
        Sha1Hex(hex::encode(self.sha1))
    }

    pub fn sha256_hex(&self) -> String {
        hex::encode(self.sha256)
    }

    /// Rebuild from the hex strings stored in the ledger.
    pub fn from_hex(md5: &str, sha1: &str, sha256: &str) -> crate::Result<Self> {
        Ok(Self {
            md5: decode_fixed(md5)?,
            sha1: decode_fixed(sha1)?,
            sha256: decode_fixed(sha256)?,
        })
    }
}

fn decode_fixed<const N: usize>(s: &str) -> crate::Result<[u8; N]> {
    let bytes = hex::decode(s).map_err(|e| crate::Error::InvalidDigest(e.to_string()))?;
    bytes.try_into().map_err(|v: Vec<u8>| {
        crate::Error::InvalidDigest(format!("expected {N} bytes, got {}", v.len()))
    })
}

impl fmt::Debug for ContentDigests {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentDigests")
            .field("md5", &self.md5_hex())
            .field("sha1", &self.sha1_hex().as_str())
            .field("sha256", &self.sha256_hex())
            .finish()
    }
}

/// Incremental md5 + sha1 + sha256 hasher that also counts bytes.
pub struct DigestAccumulator {
    md5: md5::Context,
    sha1: Sha1,
    sha256: Sha256,
    len: u64,
}

impl DigestAccumulator {
    pub fn new() -> Self {
        Self {
            md5: md5::Context::new(),
            sha1: Sha1::new(),
            sha256: Sha256::new(),
            len: 0,
        }
    }

    /// Feed the next slice of content, in order.
    pub fn update(&mut self, data: &[u8]) {
        self.md5.consume(data);
        self.sha1.update(data);
        self.sha256.update(data);
        self.len += data.len() as u64;
    }

    /// Number of bytes fed so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Finalize all three digests.
    pub fn finalize(self) -> ContentDigests {
        ContentDigests {
            md5: self.md5.compute().0,
            sha1: self.sha1.finalize().into(),
            sha256: self.sha256.finalize().into(),
        }
    }
}

impl Default for DigestAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digests_hello_world() {
        let d = ContentDigests::compute(b"hello world");
        assert_eq!(d.md5_hex(), "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(
            d.sha1_hex().as_str(),
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );
        assert_eq!(
            d.sha256_hex(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let mut acc = DigestAccumulator::new();
        for piece in data.chunks(7) {
            acc.update(piece);
        }
        assert_eq!(acc.len(), data.len() as u64);
        assert_eq!(acc.finalize(), ContentDigests::compute(data));
    }

    #[test]
    fn test_sha1_hex_parse_normalizes_case() {
        let upper = "2AAE6C35C94FCFB415DBE95F408B9CE91EE846ED";
        let parsed = Sha1Hex::parse(upper).unwrap();
        assert_eq!(parsed, Sha1Hex::compute(b"hello world"));
    }

    #[test]
    fn test_sha1_hex_rejects_bad_input() {
        assert!(Sha1Hex::parse("abc").is_err());
        assert!(Sha1Hex::parse(&"z".repeat(40)).is_err());
    }

    #[test]
    fn test_from_hex_rejects_wrong_length() {
        let d = ContentDigests::compute(b"x");
        assert!(ContentDigests::from_hex(&d.md5_hex(), &d.md5_hex(), &d.sha256_hex()).is_err());
        let back = ContentDigests::from_hex(&d.md5_hex(), d.sha1_hex().as_str(), &d.sha256_hex())
            .unwrap();
        assert_eq!(back, d);
    }
}
