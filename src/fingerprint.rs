//! Content fingerprints for change detection.
//!
//! A fingerprint is the SHA-256 of a file's raw bytes. The session compares
//! the fingerprint of each loaded file with the one it last indexed and only
//! rebuilds the vector index when they differ.

use sha2::{Digest, Sha256};
use std::fmt;

/// Lowercase hex SHA-256 digest of a file's contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Fingerprint(format!("{:x}", hasher.finalize()))
    }

    /// Rehydrate a fingerprint stored in the index metadata.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Fingerprint(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for display.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_bytes_identical_fingerprint() {
        let a = Fingerprint::of_bytes(b"name,score\nA,10\n");
        let b = Fingerprint::of_bytes(b"name,score\nA,10\n");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn one_character_edit_changes_fingerprint() {
        let a = Fingerprint::of_bytes(b"name,score\nA,10\n");
        let b = Fingerprint::of_bytes(b"name,score\nA,11\n");
        assert_ne!(a, b);
    }

    #[test]
    fn known_digest() {
        let fp = Fingerprint::of_bytes(b"");
        assert_eq!(
            fp.as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(fp.short(), "e3b0c44298fc");
    }
}
