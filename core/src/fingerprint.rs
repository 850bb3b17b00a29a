//! Content fingerprints for downloaded and stored images.
//!
//! The digest is SHA-256 so that hashes computed in an earlier run agree
//! with hashes rebuilt from disk at the start of the next one.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{Display, Formatter};

/// Lowercase hex SHA-256 digest of raw image bytes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Length of the hex representation.
    pub const HEX_LEN: usize = 64;

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Computes the content hash of `bytes`.
pub fn hash(bytes: &[u8]) -> ContentHash {
    let digest = Sha256::digest(bytes);
    ContentHash(hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_bytes_hash_identically() {
        let first = hash(b"cat picture");
        let second = hash(b"cat picture");
        assert_eq!(first, second);
        assert_eq!(first.as_str().len(), ContentHash::HEX_LEN);
    }

    #[test]
    fn single_byte_mutation_changes_hash() {
        let original = vec![0x89, b'P', b'N', b'G', 0, 1, 2, 3];
        let mut mutated = original.clone();
        mutated[7] ^= 0x01;
        assert_ne!(hash(&original), hash(&mutated));
    }

    #[test]
    fn matches_known_sha256_digest() {
        assert_eq!(
            hash(b"").as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
