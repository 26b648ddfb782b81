//! Content fingerprints.
//!
//! A fingerprint is the first [`FINGERPRINT_LEN`] hex characters of the
//! SHA-256 digest of an object's exact bytes, so names match stores
//! written by earlier deployments.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::CasError;

/// Fingerprint length in hex characters (48 bits).
pub const FINGERPRINT_LEN: usize = 12;

const FINGERPRINT_BYTES: usize = FINGERPRINT_LEN / 2;

/// Truncated content hash used as the primary storage key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; FINGERPRINT_BYTES]);

impl Fingerprint {
    /// Fingerprint the given bytes.
    #[inline]
    pub fn of(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut prefix = [0u8; FINGERPRINT_BYTES];
        prefix.copy_from_slice(&digest[..FINGERPRINT_BYTES]);
        Self(prefix)
    }

    /// Parse a fingerprint from its hex form.
    ///
    /// Accepts exactly [`FINGERPRINT_LEN`] hex digits in either case.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != FINGERPRINT_LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let mut prefix = [0u8; FINGERPRINT_BYTES];
        hex::decode_to_slice(s, &mut prefix).ok()?;
        Some(Self(prefix))
    }

    /// Lowercase hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl FromStr for Fingerprint {
    type Err = CasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| CasError::InvalidFingerprint(s.to_string()))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_prefix_of_sha256() {
        let data = b"hello world";
        let fp = Fingerprint::of(data);
        let full = hex::encode(Sha256::digest(data));
        assert_eq!(fp.to_hex(), &full[..FINGERPRINT_LEN]);
        assert_eq!(fp.to_string().len(), FINGERPRINT_LEN);
    }

    #[test]
    fn test_known_fingerprints() {
        // sha256("hello world") = b94d27b9934d3e08...
        assert_eq!(Fingerprint::of(b"hello world").to_string(), "b94d27b9934d");
        // sha256("") = e3b0c44298fc1c14...
        assert_eq!(Fingerprint::of(b"").to_string(), "e3b0c44298fc");
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let data = vec![7u8; 4096];
        let first = Fingerprint::of(&data);
        for _ in 0..16 {
            assert_eq!(Fingerprint::of(&data), first);
        }
        assert_ne!(Fingerprint::of(b"hello world"), Fingerprint::of(b"hello world!"));
    }

    #[test]
    fn test_parse_accepts_mixed_case() {
        let fp = Fingerprint::of(b"case");
        let upper = fp.to_hex().to_uppercase();
        assert_eq!(Fingerprint::parse(&upper), Some(fp));
        assert_eq!(Fingerprint::parse(&upper).unwrap().to_string(), fp.to_hex());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Fingerprint::parse("").is_none());
        assert!(Fingerprint::parse("abc").is_none());
        assert!(Fingerprint::parse("zzzzzzzzzzzz").is_none());
        assert!(Fingerprint::parse("0123456789abc").is_none());
        assert!(Fingerprint::parse("../../etc/pa").is_none());
        assert!("0123456789ab".parse::<Fingerprint>().is_ok());
        assert!(matches!(
            "nope".parse::<Fingerprint>(),
            Err(CasError::InvalidFingerprint(_))
        ));
    }
}
