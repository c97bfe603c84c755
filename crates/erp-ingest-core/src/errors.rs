// crates/erp-ingest-core/src/errors.rs
// ============================================================================
// Module: Pipeline Errors
// Description: Request-level error taxonomy and the public error envelope.
// Purpose: Map internal failures to stable codes without leaking detail.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Every failure surfaced to a caller becomes a [`PipelineError`] with a
//! stable code and HTTP status. Responses carry only the code, a safe message,
//! and the correlation identifier. Internal and upstream detail stays in logs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::auth::AuthError;
use crate::auth::AuthFailureKind;
use crate::interfaces::SinkError;
use crate::ledger::LedgerError;
use crate::mapping::MappingError;

// ============================================================================
// SECTION: Error Envelope
// ============================================================================

/// Public error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Stable error code.
    pub code: String,
    /// Safe, human-readable message.
    pub message: String,
    /// Correlation identifier of the failing request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl ErrorEnvelope {
    /// Builds an envelope.
    #[must_use]
    pub fn new(code: &str, message: impl Into<String>, correlation_id: Option<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            correlation_id,
        }
    }

    /// Renders the envelope as JSON.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match &self.correlation_id {
            Some(correlation_id) => json!({
                "code": self.code,
                "message": self.message,
                "correlation_id": correlation_id,
            }),
            None => json!({
                "code": self.code,
                "message": self.message,
            }),
        }
    }
}

// ============================================================================
// SECTION: Pipeline Errors
// ============================================================================

/// Request-level failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// Caller identity could not be established.
    #[error("{0}")]
    Unauthorized(String),
    /// Caller is not allowed.
    #[error("{0}")]
    Forbidden(String),
    /// Replay, idempotency-key reuse, or request already in progress.
    #[error("{0}")]
    Conflict(String),
    /// Write request without the required idempotency key.
    #[error("idempotency key required")]
    MissingIdempotencyKey,
    /// Malformed request.
    #[error("{0}")]
    BadRequest(String),
    /// Body exceeds the configured limit.
    #[error("{0}")]
    PayloadTooLarge(String),
    /// Body could not be mapped to a valid document.
    #[error("{0}")]
    Validation(String),
    /// Document sink failed.
    #[error("{0}")]
    Upstream(String),
    /// Persistence or other internal failure. The detail is never shown.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Returns the stable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Conflict(_) => "CONFLICT",
            Self::MissingIdempotencyKey => "MISSING_IDEMPOTENCY_KEY",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Upstream(_) => "UPSTREAM_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the HTTP status.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::Unauthorized(_) => 401,
            Self::Forbidden(_) => 403,
            Self::Conflict(_) => 409,
            Self::MissingIdempotencyKey | Self::BadRequest(_) => 400,
            Self::PayloadTooLarge(_) => 413,
            Self::Validation(_) => 422,
            Self::Upstream(_) => 502,
            Self::Internal(_) => 500,
        }
    }

    /// Returns the message safe to show callers.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }

    /// Builds the public error envelope.
    #[must_use]
    pub fn envelope(&self, correlation_id: &str) -> ErrorEnvelope {
        ErrorEnvelope::new(self.code(), self.public_message(), Some(correlation_id.to_string()))
    }
}

impl From<AuthError> for PipelineError {
    fn from(error: AuthError) -> Self {
        match error.kind() {
            AuthFailureKind::Unauthorized => Self::Unauthorized(error.to_string()),
            AuthFailureKind::Forbidden => Self::Forbidden(error.to_string()),
            AuthFailureKind::Conflict => Self::Conflict(error.to_string()),
            AuthFailureKind::Internal => Self::Internal(error.to_string()),
        }
    }
}

impl From<LedgerError> for PipelineError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::FingerprintMismatch | LedgerError::InProgress => {
                Self::Conflict(error.to_string())
            }
            LedgerError::InvalidKey(_) => Self::BadRequest(error.to_string()),
            LedgerError::Store(_) => Self::Internal(error.to_string()),
        }
    }
}

impl From<MappingError> for PipelineError {
    fn from(error: MappingError) -> Self {
        Self::Validation(error.to_string())
    }
}

impl From<SinkError> for PipelineError {
    fn from(error: SinkError) -> Self {
        match error {
            SinkError::Rejected {
                ..
            } => Self::Upstream("downstream rejected document".to_string()),
            SinkError::Transport(_) => Self::Upstream("downstream unavailable".to_string()),
            SinkError::InvalidResponse(_) => {
                Self::Upstream("downstream returned an invalid response".to_string())
            }
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
