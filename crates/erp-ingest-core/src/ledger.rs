// crates/erp-ingest-core/src/ledger.rs
// ============================================================================
// Module: Idempotency Ledger
// Description: At-most-once execution per (client, idempotency key).
// Purpose: Claim slots atomically, replay finished results, and reap stale claims.
// Dependencies: serde_json, thiserror, tracing
// ============================================================================

//! ## Overview
//! [`IdempotencyLedger::begin`] claims a `processing` slot through the store's
//! atomic conditional insert. On conflict the existing record decides the
//! outcome, in this order: a different fingerprint is a key-reuse conflict, a
//! record still `processing` is in progress, and a finished record is replayed
//! from storage. A disabled ledger returns [`BeginOutcome::Bypassed`] and the
//! caller must not finalize.
//!
//! Stale `processing` records are handled by [`IdempotencyLedger::reap`]
//! according to [`AbandonedPolicy`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::clock::Clock;
use crate::errors::ErrorEnvelope;
use crate::hashing::HashDigest;
use crate::interfaces::IdempotencyStore;
use crate::interfaces::StoreError;
use crate::records::ClaimOutcome;
use crate::records::IdempotencyClaim;
use crate::records::IdempotencyStatus;
use crate::records::RecordId;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum accepted idempotency key length in bytes.
pub const MAX_IDEMPOTENCY_KEY_BYTES: usize = 128;
/// Default retention for finished records (14 days).
pub const DEFAULT_RETENTION_SECONDS: u64 = 14 * 24 * 60 * 60;
/// Default age after which a `processing` record is abandoned.
pub const DEFAULT_PROCESSING_TIMEOUT_SECONDS: u64 = 300;
/// HTTP status stored for abandoned requests.
pub const ABANDONED_HTTP_STATUS: u16 = 504;
/// Error code stored for abandoned requests.
pub const ABANDONED_ERROR_CODE: &str = "ABANDONED_REQUEST";

// ============================================================================
// SECTION: Policy
// ============================================================================

/// Handling of `processing` records older than the timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbandonedPolicy {
    /// Finalize as a terminal failure; retries replay the failure.
    #[default]
    Fail,
    /// Delete the record so the key can be claimed again.
    Release,
}

/// Ledger toggles and timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerPolicy {
    /// Whether deduplication is active.
    pub enabled: bool,
    /// Whether write requests must carry an idempotency key.
    pub required: bool,
    /// Age in seconds after which `processing` records are abandoned.
    pub processing_timeout_seconds: u64,
    /// Retention in seconds for finished records.
    pub retention_seconds: u64,
    /// Abandoned record handling.
    pub abandoned: AbandonedPolicy,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            required: false,
            processing_timeout_seconds: DEFAULT_PROCESSING_TIMEOUT_SECONDS,
            retention_seconds: DEFAULT_RETENTION_SECONDS,
            abandoned: AbandonedPolicy::Fail,
        }
    }
}

// ============================================================================
// SECTION: Outcomes
// ============================================================================

/// Result of [`IdempotencyLedger::begin`].
#[derive(Debug, Clone, PartialEq)]
pub enum BeginOutcome {
    /// Ledger disabled; run the handler and do not finalize.
    Bypassed,
    /// Slot claimed; run the handler and finalize with this id.
    Claimed(RecordId),
    /// Finished record; replay without running the handler.
    Cached {
        /// Stored HTTP status.
        http_status: u16,
        /// Stored response body.
        body: Value,
    },
}

/// Counts from one reaper pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Abandoned records finalized as failures.
    pub failed: u64,
    /// Abandoned records released for reuse.
    pub released: u64,
    /// Finished records purged after retention.
    pub purged: u64,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Ledger failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Key reused with a different request.
    #[error("conflict: idempotency key reused with a different request")]
    FingerprintMismatch,
    /// Original request still executing.
    #[error("conflict: request in progress")]
    InProgress,
    /// Key is empty or too long.
    #[error("invalid idempotency key: {0}")]
    InvalidKey(String),
    /// Backing store failure.
    #[error("idempotency store failure: {0}")]
    Store(#[from] StoreError),
}

// ============================================================================
// SECTION: Ledger
// ============================================================================

/// Idempotency ledger over an atomic store.
#[derive(Clone)]
pub struct IdempotencyLedger {
    /// Ledger policy.
    policy: LedgerPolicy,
    /// Backing store.
    store: Arc<dyn IdempotencyStore>,
    /// Time source.
    clock: Arc<dyn Clock>,
}

impl IdempotencyLedger {
    /// Creates a ledger.
    #[must_use]
    pub fn new(
        policy: LedgerPolicy,
        store: Arc<dyn IdempotencyStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            policy,
            store,
            clock,
        }
    }

    /// Returns the active policy.
    #[must_use]
    pub const fn policy(&self) -> &LedgerPolicy {
        &self.policy
    }

    /// Claims the (client, key) slot or resolves the existing record.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] on key reuse, in-progress duplicates, invalid
    /// keys, or store failures.
    pub async fn begin(
        &self,
        client_id: &str,
        key: &str,
        fingerprint: &HashDigest,
    ) -> Result<BeginOutcome, LedgerError> {
        if !self.policy.enabled {
            return Ok(BeginOutcome::Bypassed);
        }
        validate_key(key)?;
        let claim = IdempotencyClaim {
            client_id: client_id.to_string(),
            key: key.to_string(),
            fingerprint: fingerprint.clone(),
            created_at: self.clock.now_unix_seconds(),
        };
        match self.store.claim(&claim).await? {
            ClaimOutcome::Claimed(record_id) => Ok(BeginOutcome::Claimed(record_id)),
            ClaimOutcome::Existing(record) => {
                if record.fingerprint != fingerprint.value {
                    return Err(LedgerError::FingerprintMismatch);
                }
                if record.status == IdempotencyStatus::Processing {
                    return Err(LedgerError::InProgress);
                }
                match (record.http_status, record.response) {
                    (Some(http_status), Some(body)) => Ok(BeginOutcome::Cached {
                        http_status,
                        body,
                    }),
                    _ => Err(LedgerError::Store(StoreError::Corrupt(format!(
                        "finished idempotency record {} has no stored response",
                        record.id.get()
                    )))),
                }
            }
        }
    }

    /// Records the outcome of a claimed slot.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Store`] when the update fails.
    pub async fn finalize(
        &self,
        record_id: RecordId,
        http_status: u16,
        body: &Value,
    ) -> Result<(), LedgerError> {
        let status = IdempotencyStatus::from_http_status(http_status);
        let now = self.clock.now_unix_seconds();
        self.store.finalize(record_id, status, http_status, body, now).await?;
        Ok(())
    }

    /// Applies the abandoned policy and purges expired finished records.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Store`] when a store operation fails.
    pub async fn reap(&self) -> Result<ReapReport, LedgerError> {
        let now = self.clock.now_unix_seconds();
        let stale_cutoff =
            now.saturating_sub(seconds_as_i64(self.policy.processing_timeout_seconds));
        let retention_cutoff = now.saturating_sub(seconds_as_i64(self.policy.retention_seconds));
        let mut report = ReapReport::default();
        match self.policy.abandoned {
            AbandonedPolicy::Fail => {
                let body = ErrorEnvelope::new(
                    ABANDONED_ERROR_CODE,
                    "request abandoned before completion",
                    None,
                )
                .to_value();
                report.failed =
                    self.store.fail_stale(stale_cutoff, ABANDONED_HTTP_STATUS, &body, now).await?;
            }
            AbandonedPolicy::Release => {
                report.released = self.store.release_stale(stale_cutoff).await?;
            }
        }
        report.purged = self.store.purge_finished(retention_cutoff).await?;
        if report != ReapReport::default() {
            tracing::info!(
                failed = report.failed,
                released = report.released,
                purged = report.purged,
                "idempotency ledger reaped"
            );
        }
        Ok(report)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Validates an idempotency key.
fn validate_key(key: &str) -> Result<(), LedgerError> {
    if key.trim().is_empty() {
        return Err(LedgerError::InvalidKey("key must be non-empty".to_string()));
    }
    if key.len() > MAX_IDEMPOTENCY_KEY_BYTES {
        return Err(LedgerError::InvalidKey(format!(
            "key exceeds {MAX_IDEMPOTENCY_KEY_BYTES} bytes"
        )));
    }
    Ok(())
}

/// Converts a configured duration to signed seconds.
fn seconds_as_i64(seconds: u64) -> i64 {
    i64::try_from(seconds).unwrap_or(i64::MAX)
}
