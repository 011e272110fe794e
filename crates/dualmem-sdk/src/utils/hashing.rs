//! Hashing Utilities

use sha2::{Digest, Sha256};

/// Compute SHA-256 hash of content and return as hex string
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash() {
        let hash = content_hash("Use eager loading to avoid N+1 queries");
        assert_eq!(hash.len(), 64); // SHA-256 produces 64 hex chars

        // Same input should produce same hash
        assert_eq!(hash, content_hash("Use eager loading to avoid N+1 queries"));

        // Different input should produce different hash
        assert_ne!(hash, content_hash("Use eager loading to avoid N+1 queries!"));
    }

    #[test]
    fn test_known_hash() {
        // Known SHA-256 hash for "hello"
        let hash = content_hash("hello");
        assert_eq!(
            hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
