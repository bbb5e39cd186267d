//! Macaroon minting, attenuation and verification.

use crate::caveat::Caveat;
use crate::error::{MacaroonError, MacaroonResult};
use ::macaroon::{ByteString, Format, MacaroonKey, Verifier};
use std::fmt;

/// A bearer credential whose signature chains over its identifier and
/// every caveat, so caveats can be added but never removed.
#[derive(Clone)]
pub struct Macaroon {
    inner: ::macaroon::Macaroon,
}

impl Macaroon {
    /// Mint a macaroon under `root_key`.
    pub fn mint(
        root_key: &[u8],
        location: Option<&str>,
        identifier: impl Into<String>,
    ) -> MacaroonResult<Self> {
        let key = MacaroonKey::generate(root_key);
        let inner = ::macaroon::Macaroon::create(
            location.map(str::to_string),
            &key,
            ByteString::from(identifier.into()),
        )
        .map_err(|e| MacaroonError::Mint(format!("{e:?}")))?;
        Ok(Self { inner })
    }

    /// A random hex identifier for minting.
    pub fn random_identifier() -> String {
        hex::encode(rand::random::<[u8; 16]>())
    }

    /// Attenuate with a first-party caveat.
    pub fn add_first_party_caveat(&mut self, predicate: impl Into<String>) {
        self.inner
            .add_first_party_caveat(ByteString::from(predicate.into()));
    }

    pub fn location(&self) -> Option<String> {
        self.inner.location()
    }

    pub fn identifier(&self) -> String {
        lossy(&self.inner.identifier())
    }

    /// First-party caveat predicates, oldest first.
    pub fn caveats(&self) -> Vec<String> {
        self.inner
            .first_party_caveats()
            .iter()
            .filter_map(|c| match c {
                ::macaroon::Caveat::FirstParty(fp) => Some(lossy(&fp.predicate())),
                ::macaroon::Caveat::ThirdParty(_) => None,
            })
            .collect()
    }

    /// The alias this macaroon is scoped to, from its first `alias = <id>`
    /// caveat.
    pub fn target_alias(&self) -> Option<i64> {
        self.caveats().iter().find_map(|c| match Caveat::parse(c) {
            Some(Caveat::Alias(id)) => Some(id),
            _ => None,
        })
    }

    /// Check every caveat against `predicate`, then the signature chain
    /// against `root_key`.
    pub fn verify<F>(&self, root_key: &[u8], mut predicate: F) -> MacaroonResult<()>
    where
        F: FnMut(&str) -> bool,
    {
        let mut verifier = Verifier::default();
        for caveat in self.caveats() {
            if !predicate(&caveat) {
                return Err(MacaroonError::UnsatisfiedCaveat(caveat));
            }
            verifier.satisfy_exact(ByteString::from(caveat));
        }

        let key = MacaroonKey::generate(root_key);
        verifier
            .verify(&self.inner, &key, Vec::new())
            .map_err(|_| MacaroonError::InvalidSignature)
    }

    /// Encode in the binary V2 format, base64url.
    pub fn serialize(&self) -> MacaroonResult<String> {
        self.inner
            .serialize(Format::V2)
            .map_err(|e| MacaroonError::Encoding(format!("{e:?}")))
    }

    /// Decode a token in any format the macaroon wire spec defines.
    pub fn deserialize(token: &str) -> MacaroonResult<Self> {
        let inner = ::macaroon::Macaroon::deserialize(token.trim())
            .map_err(|e| MacaroonError::Encoding(format!("{e:?}")))?;
        Ok(Self { inner })
    }

    /// Encode in the V2 JSON format.
    pub fn to_json(&self) -> MacaroonResult<String> {
        self.inner
            .serialize(Format::V2JSON)
            .map_err(|e| MacaroonError::Encoding(format!("{e:?}")))
    }
}

fn lossy(bytes: &ByteString) -> String {
    String::from_utf8_lossy(&bytes.0).into_owned()
}

impl fmt::Debug for Macaroon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Macaroon")
            .field("location", &self.location())
            .field("identifier", &self.identifier())
            .field("caveats", &self.caveats())
            .field("signature", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn scoped(alias: i64) -> Macaroon {
        let mut m = Macaroon::mint(ROOT, Some("librarian"), "grant-1").unwrap();
        m.add_first_party_caveat(format!("alias = {alias}"));
        m
    }

    #[test]
    fn test_verify_with_matching_key() {
        let m = scoped(5);
        m.verify(ROOT, |c| c == "alias = 5").unwrap();
    }

    #[test]
    fn test_wrong_key_rejected() {
        let m = scoped(5);
        assert!(matches!(
            m.verify(b"another key", |_| true),
            Err(MacaroonError::InvalidSignature)
        ));
    }

    #[test]
    fn test_no_caveats() {
        let m = Macaroon::mint(ROOT, None, "bare").unwrap();
        m.verify(ROOT, |_| false).unwrap();
        assert_eq!(m.target_alias(), None);
    }

    #[test]
    fn test_unsatisfied_caveat() {
        let m = scoped(5);
        match m.verify(ROOT, |c| c == "alias = 6") {
            Err(MacaroonError::UnsatisfiedCaveat(c)) => assert_eq!(c, "alias = 5"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_caveat_cannot_be_stripped() {
        let mut m = scoped(5);
        m.add_first_party_caveat("expires < 2000-01-01T00:00:00Z");

        let mut json: serde_json::Value = serde_json::from_str(&m.to_json().unwrap()).unwrap();
        json["c"].as_array_mut().unwrap().pop();
        let stripped = Macaroon::deserialize(&json.to_string()).unwrap();
        assert_eq!(stripped.caveats(), vec!["alias = 5".to_string()]);

        assert!(matches!(
            stripped.verify(ROOT, |_| true),
            Err(MacaroonError::InvalidSignature)
        ));
    }

    #[test]
    fn test_token_roundtrip_keeps_signature() {
        let m = scoped(9);
        let token = m.serialize().unwrap();
        let parsed = Macaroon::deserialize(&token).unwrap();
        assert_eq!(parsed.identifier(), "grant-1");
        assert_eq!(parsed.location().as_deref(), Some("librarian"));
        assert_eq!(parsed.target_alias(), Some(9));
        parsed.verify(ROOT, |c| c == "alias = 9").unwrap();
    }

    #[test]
    fn test_garbage_token() {
        assert!(matches!(
            Macaroon::deserialize("not a macaroon!"),
            Err(MacaroonError::Encoding(_))
        ));
    }

    #[test]
    fn test_random_identifier() {
        let a = Macaroon::random_identifier();
        assert_eq!(a.len(), 32);
        assert_ne!(a, Macaroon::random_identifier());
    }

    #[test]
    fn test_debug_redacts_signature() {
        let rendered = format!("{:?}", scoped(1));
        assert!(rendered.contains("REDACTED"));
        assert!(rendered.contains("alias = 1"));
    }
}
