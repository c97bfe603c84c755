// crates/erp-ingest-core/src/interfaces.rs
// ============================================================================
// Module: Ingest Interfaces
// Description: Backend-agnostic traits for stores and the document sink.
// Purpose: Keep the pipeline independent of persistence and ERP transport.
// Dependencies: async-trait, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The authenticator and ledger coordinate through these traits only.
//! Implementations must provide atomic create-or-detect-conflict semantics
//! for nonces and idempotency claims; a read followed by a separate insert is
//! not an acceptable implementation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::records::ClaimOutcome;
use crate::records::IdempotencyClaim;
use crate::records::IdempotencyStatus;
use crate::records::IntegrationClient;
use crate::records::IpRule;
use crate::records::NonceOutcome;
use crate::records::NonceRecord;
use crate::records::RecordId;
use crate::records::SigningKey;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Backing store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Store I/O error.
    #[error("store io error: {0}")]
    Io(String),
    /// Store engine error.
    #[error("store error: {0}")]
    Store(String),
    /// Stored data failed integrity checks.
    #[error("store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data or request.
    #[error("invalid store data: {0}")]
    Invalid(String),
}

/// Document sink errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SinkError {
    /// The downstream service could not be reached.
    #[error("document sink transport error: {0}")]
    Transport(String),
    /// The downstream service rejected the document.
    #[error("document sink rejected document with status {status}: {message}")]
    Rejected {
        /// Downstream HTTP status.
        status: u16,
        /// Downstream error summary.
        message: String,
    },
    /// The downstream response could not be interpreted.
    #[error("document sink invalid response: {0}")]
    InvalidResponse(String),
}

// ============================================================================
// SECTION: Store Traits
// ============================================================================

/// Read access to client credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns the active client with the given external identifier.
    async fn find_active_client(
        &self,
        client_id: &str,
    ) -> Result<Option<IntegrationClient>, StoreError>;

    /// Returns every IP rule owned by the client.
    async fn ip_rules(&self, client_internal_id: i64) -> Result<Vec<IpRule>, StoreError>;

    /// Returns the active, non-expired key for (client, kid) at `now`.
    async fn find_active_key(
        &self,
        client_internal_id: i64,
        kid: &str,
        now: i64,
    ) -> Result<Option<SigningKey>, StoreError>;

    /// Records a successful use of the key.
    async fn touch_key(&self, key_internal_id: i64, now: i64) -> Result<(), StoreError>;
}

/// Write-once nonce registry.
#[async_trait]
pub trait ReplayGuard: Send + Sync {
    /// Atomically records the nonce, reporting whether it was already present.
    async fn record_nonce(&self, record: &NonceRecord) -> Result<NonceOutcome, StoreError>;
}

/// Persistence for the idempotency ledger.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically creates a `processing` record or returns the existing one.
    async fn claim(&self, claim: &IdempotencyClaim) -> Result<ClaimOutcome, StoreError>;

    /// Stores the terminal outcome of a claimed record.
    async fn finalize(
        &self,
        record_id: RecordId,
        status: IdempotencyStatus,
        http_status: u16,
        response: &Value,
        now: i64,
    ) -> Result<(), StoreError>;

    /// Marks `processing` records created before `cutoff` as failed.
    async fn fail_stale(
        &self,
        cutoff: i64,
        http_status: u16,
        response: &Value,
        now: i64,
    ) -> Result<u64, StoreError>;

    /// Deletes `processing` records created before `cutoff`.
    async fn release_stale(&self, cutoff: i64) -> Result<u64, StoreError>;

    /// Deletes finalized records last updated before `cutoff`.
    async fn purge_finished(&self, cutoff: i64) -> Result<u64, StoreError>;
}

// ============================================================================
// SECTION: Document Sink
// ============================================================================

/// Target-shaped document ready for the downstream ERP.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRequest {
    /// Resource name (for example `invoice`).
    pub resource: String,
    /// Downstream collection name (for example `Invoices`).
    pub collection: String,
    /// Target-shaped payload.
    pub payload: Value,
    /// Idempotency token forwarded downstream.
    pub idempotency_token: Option<String>,
}

/// Reference to a created downstream document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentReference {
    /// Downstream entry identifier.
    pub entry: i64,
    /// Downstream document number when assigned.
    pub number: Option<i64>,
}

/// Downstream document creation endpoint.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Creates the document and returns its downstream reference.
    async fn create_document(
        &self,
        request: &DocumentRequest,
    ) -> Result<DocumentReference, SinkError>;
}
