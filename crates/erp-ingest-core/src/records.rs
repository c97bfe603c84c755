// crates/erp-ingest-core/src/records.rs
// ============================================================================
// Module: Ingest Records
// Description: Persistent record types for credentials, nonces, and the ledger.
// Purpose: Share one data model between the pipeline and its backing stores.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Records mirror the rows kept by a backing store. Integration clients own
//! signing keys and IP rules. Nonces and idempotency records are keyed by the
//! external client identifier so uniqueness holds across replicas.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::hashing::HashDigest;

// ============================================================================
// SECTION: Credentials
// ============================================================================

/// Calling system identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationClient {
    /// Internal numeric identifier.
    pub internal_id: i64,
    /// Opaque external client identifier.
    pub client_id: String,
    /// Display name.
    pub name: String,
    /// Whether the client may authenticate.
    pub active: bool,
}

/// Signature algorithm tag carried by a signing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// HMAC with SHA-256.
    #[serde(rename = "HS256")]
    Hs256,
}

impl SigningAlgorithm {
    /// Returns the stored label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Hs256 => "HS256",
        }
    }

    /// Parses a stored label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "HS256" => Some(Self::Hs256),
            _ => None,
        }
    }
}

/// Shared-secret credential owned by one client.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKey {
    /// Internal numeric identifier.
    pub internal_id: i64,
    /// Owning client internal identifier.
    pub client_internal_id: i64,
    /// Key identifier, unique per client.
    pub kid: String,
    /// Shared secret.
    pub secret: String,
    /// Signature algorithm.
    pub algorithm: SigningAlgorithm,
    /// Whether the key may be used.
    pub active: bool,
    /// Expiry as unix seconds.
    pub expires_at: Option<i64>,
    /// Last successful use as unix seconds.
    pub last_used_at: Option<i64>,
}

impl SigningKey {
    /// Returns true when the key is active and not expired at `now`.
    #[must_use]
    pub fn is_usable_at(&self, now: i64) -> bool {
        self.active && self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("internal_id", &self.internal_id)
            .field("client_internal_id", &self.client_internal_id)
            .field("kid", &self.kid)
            .field("secret", &"<redacted>")
            .field("algorithm", &self.algorithm)
            .field("active", &self.active)
            .field("expires_at", &self.expires_at)
            .field("last_used_at", &self.last_used_at)
            .finish()
    }
}

/// CIDR allowlist entry owned by one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRule {
    /// Owning client internal identifier.
    pub client_internal_id: i64,
    /// CIDR block in text form.
    pub cidr: String,
}

// ============================================================================
// SECTION: Replay Records
// ============================================================================

/// Single-use nonce observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceRecord {
    /// External client identifier.
    pub client_id: String,
    /// Owning client internal identifier.
    pub client_internal_id: i64,
    /// Nonce value supplied by the caller.
    pub nonce: String,
    /// Request timestamp claimed by the caller.
    pub request_timestamp: i64,
    /// Server receipt time.
    pub received_at: i64,
}

/// Result of recording a nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceOutcome {
    /// Nonce was not seen before and is now recorded.
    Fresh,
    /// Nonce was already recorded for the client.
    Replayed,
}

// ============================================================================
// SECTION: Idempotency Records
// ============================================================================

/// Idempotency ledger record identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(i64);

impl RecordId {
    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

/// Ledger record lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    /// Handler execution claimed but not finished.
    Processing,
    /// Handler finished with a 2xx status.
    Success,
    /// Handler finished with a non-2xx status.
    Fail,
}

impl IdempotencyStatus {
    /// Returns the stored label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Fail => "fail",
        }
    }

    /// Parses a stored label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "processing" => Some(Self::Processing),
            "success" => Some(Self::Success),
            "fail" => Some(Self::Fail),
            _ => None,
        }
    }

    /// Maps an HTTP status to a terminal ledger status.
    #[must_use]
    pub const fn from_http_status(status: u16) -> Self {
        if status >= 200 && status < 300 { Self::Success } else { Self::Fail }
    }
}

/// Claim request for a new ledger slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyClaim {
    /// External client identifier.
    pub client_id: String,
    /// Caller supplied idempotency key.
    pub key: String,
    /// Request fingerprint.
    pub fingerprint: HashDigest,
    /// Claim time as unix seconds.
    pub created_at: i64,
}

/// Stored ledger record.
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyRecord {
    /// Record identifier.
    pub id: RecordId,
    /// External client identifier.
    pub client_id: String,
    /// Caller supplied idempotency key.
    pub key: String,
    /// Lowercase hex request fingerprint.
    pub fingerprint: String,
    /// Lifecycle status.
    pub status: IdempotencyStatus,
    /// Stored HTTP status once finalized.
    pub http_status: Option<u16>,
    /// Stored response body once finalized.
    pub response: Option<Value>,
    /// Creation time as unix seconds.
    pub created_at: i64,
    /// Last update time as unix seconds.
    pub updated_at: i64,
}

/// Result of an atomic ledger claim.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// A new `processing` record was created.
    Claimed(RecordId),
    /// A record already exists for (client, key).
    Existing(IdempotencyRecord),
}
