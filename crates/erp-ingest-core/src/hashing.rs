// crates/erp-ingest-core/src/hashing.rs
// ============================================================================
// Module: Request Hashing
// Description: Content digests and request fingerprints.
// Purpose: Provide deterministic hashes for signing and idempotency checks.
// Dependencies: serde, sha2
// ============================================================================

//! ## Overview
//! Body hashes feed the canonical signing string and request fingerprints
//! detect idempotency-key reuse with a changed payload. Fingerprints cover the
//! exact bytes of method, path, query, and body, each preceded by its length
//! as a big-endian `u64`. The query string is taken verbatim, so reordered parameters produce
//! a different fingerprint.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

// ============================================================================
// SECTION: Hash Algorithm
// ============================================================================

/// Supported hash algorithms for request digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// SHA-256 hashing.
    Sha256,
}

/// Default hash algorithm for fingerprints and body digests.
pub const DEFAULT_HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha256;

// ============================================================================
// SECTION: Hash Digest
// ============================================================================

/// Deterministic content hash representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashDigest {
    /// Hash algorithm identifier.
    pub algorithm: HashAlgorithm,
    /// Lowercase hex-encoded digest bytes.
    pub value: String,
}

impl HashDigest {
    /// Creates a new digest from raw bytes.
    #[must_use]
    pub fn new(algorithm: HashAlgorithm, bytes: &[u8]) -> Self {
        Self {
            algorithm,
            value: hex_encode(bytes),
        }
    }
}

// ============================================================================
// SECTION: Hashing Helpers
// ============================================================================

/// Hashes raw bytes with the requested algorithm.
#[must_use]
pub fn hash_bytes(algorithm: HashAlgorithm, bytes: &[u8]) -> HashDigest {
    match algorithm {
        HashAlgorithm::Sha256 => {
            let digest = Sha256::digest(bytes);
            HashDigest::new(algorithm, &digest)
        }
    }
}

/// Computes the request fingerprint over method, path, query, and body.
#[must_use]
pub fn fingerprint(method: &str, path: &str, query: &str, body: &[u8]) -> HashDigest {
    let mut hasher = Sha256::new();
    for field in [method.as_bytes(), path.as_bytes(), query.as_bytes(), body] {
        update_framed(&mut hasher, field);
    }
    HashDigest::new(HashAlgorithm::Sha256, &hasher.finalize())
}

/// Feeds a length-prefixed field so field boundaries stay unambiguous.
fn update_framed(hasher: &mut Sha256, field: &[u8]) {
    let len = u64::try_from(field.len()).unwrap_or(u64::MAX);
    hasher.update(len.to_be_bytes());
    hasher.update(field);
}

/// Encodes bytes as lowercase hex.
pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_empty_input_matches_known_vector() {
        let digest = hash_bytes(HashAlgorithm::Sha256, b"");
        assert_eq!(
            digest.value,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let first = fingerprint("POST", "/api/v1/invoices", "a=1", b"{}");
        let second = fingerprint("POST", "/api/v1/invoices", "a=1", b"{}");
        assert_eq!(first, second);
    }

    #[test]
    fn fingerprint_separates_fields() {
        let shifted = fingerprint("POST", "/a", "b", b"");
        let merged = fingerprint("POST", "/ab", "", b"");
        assert_ne!(shifted, merged);
    }

    #[test]
    fn fingerprint_keeps_query_order() {
        let first = fingerprint("POST", "/x", "a=1&b=2", b"");
        let second = fingerprint("POST", "/x", "b=2&a=1", b"");
        assert_ne!(first, second);
    }
}
