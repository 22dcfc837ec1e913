//! Content hashing for fingerprints and digests

/// Compute the BLAKE3 hash of content, hex-encoded.
///
/// Used for malformed-line fingerprints, envelope digests in the message
/// index, and nudge cooldown keys.
pub fn compute_hash(content: &[u8]) -> String {
    blake3::hash(content).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_hash_deterministic() {
        let hash1 = compute_hash(b"deterministic test");
        let hash2 = compute_hash(b"deterministic test");
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_compute_hash_different_content() {
        assert_ne!(compute_hash(b"line 1"), compute_hash(b"line 2"));
    }
}
