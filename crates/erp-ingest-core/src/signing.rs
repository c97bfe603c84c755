// crates/erp-ingest-core/src/signing.rs
// ============================================================================
// Module: Request Signing
// Description: Canonical signing string and HMAC-SHA256 signatures.
// Purpose: Produce and verify signatures that clients and server agree on.
// Dependencies: base64, hmac, sha2, subtle
// ============================================================================

//! ## Overview
//! The canonical string joins eight segments with a single newline:
//! `METHOD\nPATH\nQUERY\nCLIENT_ID\nKEY_ID\nTIMESTAMP\nNONCE\nBODY_HASH_HEX`.
//! Empty segments stay in place as empty strings. Signatures are the unpadded
//! base64url encoding of the HMAC-SHA256 tag and are compared in constant time.

// ============================================================================
// SECTION: Imports
// ============================================================================

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::Hmac;
use hmac::Mac;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::hashing::HashAlgorithm;
use crate::hashing::hash_bytes;

// ============================================================================
// SECTION: Types
// ============================================================================

/// HMAC-SHA256 instance.
type HmacSha256 = Hmac<Sha256>;

/// Fields covered by a request signature.
#[derive(Debug, Clone, Copy)]
pub struct SigningInput<'a> {
    /// Upper-case HTTP method.
    pub method: &'a str,
    /// Request path without query.
    pub path: &'a str,
    /// Raw query string without the leading `?`.
    pub query: &'a str,
    /// External client identifier.
    pub client_id: &'a str,
    /// Key identifier.
    pub key_id: &'a str,
    /// Timestamp segment, empty when timestamp checks are disabled.
    pub timestamp: &'a str,
    /// Nonce segment, empty when nonce checks are disabled.
    pub nonce: &'a str,
    /// Raw request body.
    pub body: &'a [u8],
}

/// Signing failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SigningError {
    /// The secret could not initialize the MAC.
    #[error("invalid signing secret")]
    InvalidSecret,
}

// ============================================================================
// SECTION: Signing
// ============================================================================

/// Builds the canonical signing string.
#[must_use]
pub fn canonical_string(input: &SigningInput<'_>) -> String {
    let body_hash = hash_bytes(HashAlgorithm::Sha256, input.body);
    [
        input.method,
        input.path,
        input.query,
        input.client_id,
        input.key_id,
        input.timestamp,
        input.nonce,
        body_hash.value.as_str(),
    ]
    .join("\n")
}

/// Signs the canonical string with the shared secret.
///
/// # Errors
///
/// Returns [`SigningError::InvalidSecret`] when the MAC rejects the key.
pub fn sign(secret: &[u8], canonical: &str) -> Result<String, SigningError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SigningError::InvalidSecret)?;
    mac.update(canonical.as_bytes());
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

/// Signs a request directly from its fields.
///
/// # Errors
///
/// Returns [`SigningError::InvalidSecret`] when the MAC rejects the key.
pub fn sign_request(secret: &[u8], input: &SigningInput<'_>) -> Result<String, SigningError> {
    sign(secret, &canonical_string(input))
}

/// Verifies a supplied signature in constant time.
///
/// # Errors
///
/// Returns [`SigningError::InvalidSecret`] when the MAC rejects the key.
pub fn verify(secret: &[u8], canonical: &str, supplied: &str) -> Result<bool, SigningError> {
    let expected = sign(secret, canonical)?;
    Ok(constant_time_eq(expected.as_bytes(), supplied.as_bytes()))
}

/// Compares two byte strings in constant time.
#[must_use]
pub fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    left.ct_eq(right).into()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test fixtures use unwrap for clarity."
    )]

    use super::*;

    fn sample() -> SigningInput<'static> {
        SigningInput {
            method: "POST",
            path: "/api/v1/invoices",
            query: "",
            client_id: "acme",
            key_id: "k1",
            timestamp: "1700000000",
            nonce: "n-1",
            body: b"{}",
        }
    }

    #[test]
    fn canonical_string_keeps_empty_segments() {
        let input = SigningInput {
            timestamp: "",
            nonce: "",
            ..sample()
        };
        let canonical = canonical_string(&input);
        let segments: Vec<&str> = canonical.split('\n').collect();
        assert_eq!(segments.len(), 8);
        assert_eq!(segments[2], "");
        assert_eq!(segments[5], "");
        assert_eq!(segments[6], "");
        assert_eq!(
            segments[7],
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }

    #[test]
    fn signature_is_unpadded_base64url() {
        let signature = sign_request(b"secret", &sample()).unwrap();
        assert_eq!(signature.len(), 43);
        assert!(!signature.contains('='));
        assert!(!signature.contains('+'));
        assert!(!signature.contains('/'));
    }

    #[test]
    fn verify_rejects_other_secret() {
        let canonical = canonical_string(&sample());
        let signature = sign(b"secret", &canonical).unwrap();
        assert!(verify(b"secret", &canonical, &signature).unwrap());
        assert!(!verify(b"other", &canonical, &signature).unwrap());
    }

    #[test]
    fn verify_rejects_truncated_signature() {
        let canonical = canonical_string(&sample());
        let signature = sign(b"secret", &canonical).unwrap();
        assert!(!verify(b"secret", &canonical, &signature[.. signature.len() - 1]).unwrap());
    }
}
