// crates/erp-ingest-core/src/auth.rs
// ============================================================================
// Module: Request Authentication
// Description: HMAC request authentication with replay protection.
// Purpose: Accept or reject signed requests with strict, fail-closed ordering.
// Dependencies: ipnetwork, serde, thiserror, tracing
// ============================================================================

//! ## Overview
//! [`Authenticator`] runs a fixed sequence of checks and stops at the first
//! failure: global toggle, client lookup, IP allowlist, timestamp window,
//! nonce registration, key lookup, and finally the signature. Cheap lookups
//! run before any hashing. Nonce registration is the replay enforcement point
//! and relies on the store's unique insert. Every decision is emitted to an
//! [`AuthAuditSink`]; secrets and signatures never appear in events.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::IpAddr;
use std::sync::Arc;

use bytes::Bytes;
use ipnetwork::IpNetwork;
use serde::Serialize;
use thiserror::Error;

use crate::clock::Clock;
use crate::interfaces::CredentialStore;
use crate::interfaces::ReplayGuard;
use crate::interfaces::StoreError;
use crate::records::IpRule;
use crate::records::NonceOutcome;
use crate::records::NonceRecord;
use crate::request::HEADER_CLIENT_ID;
use crate::request::HEADER_KEY_ID;
use crate::request::HEADER_NONCE;
use crate::request::HEADER_SIGNATURE;
use crate::request::HEADER_TIMESTAMP;
use crate::request::IngestRequest;
use crate::signing::SigningInput;
use crate::signing::canonical_string;
use crate::signing::verify;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum accepted length of any authentication header.
pub const MAX_AUTH_HEADER_BYTES: usize = 256;
/// Default signature freshness window in seconds.
pub const DEFAULT_WINDOW_SECONDS: u64 = 300;
/// Default tolerated clock skew in seconds.
pub const DEFAULT_CLOCK_SKEW_SECONDS: u64 = 60;

// ============================================================================
// SECTION: Policy
// ============================================================================

/// Authentication toggles and limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthPolicy {
    /// Whether HMAC authentication is enabled. Disabled rejects everything.
    pub enabled: bool,
    /// Whether the timestamp header is required and checked.
    pub enable_timestamp: bool,
    /// Freshness window in seconds.
    pub window_seconds: u64,
    /// Additional tolerated clock skew in seconds.
    pub clock_skew_seconds: u64,
    /// Whether the nonce header is required and registered.
    pub enable_nonce: bool,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            enable_timestamp: true,
            window_seconds: DEFAULT_WINDOW_SECONDS,
            clock_skew_seconds: DEFAULT_CLOCK_SKEW_SECONDS,
            enable_nonce: true,
        }
    }
}

// ============================================================================
// SECTION: Auth Context
// ============================================================================

/// Authenticated caller details.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// External client identifier.
    pub client_id: String,
    /// Key identifier used to sign.
    pub key_id: String,
    /// Client internal identifier.
    pub client_internal_id: i64,
    /// Resolved caller IP.
    pub ip: Option<IpAddr>,
    /// Raw body bytes covered by the signature.
    pub body: Bytes,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Category of an authentication failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailureKind {
    /// Caller identity could not be established.
    Unauthorized,
    /// Caller is known but not allowed from this address.
    Forbidden,
    /// Request was already observed.
    Conflict,
    /// Backing store failed.
    Internal,
}

/// Authentication failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Authentication is globally disabled.
    #[error("unauthorized: hmac authentication disabled")]
    Disabled,
    /// A required header is absent.
    #[error("unauthorized: missing {0} header")]
    MissingHeader(&'static str),
    /// A header exceeds the length limit.
    #[error("unauthorized: {0} header too long")]
    HeaderTooLong(&'static str),
    /// Client is unknown or inactive.
    #[error("unauthorized: unknown client")]
    UnknownClient,
    /// Caller IP is outside the client allowlist.
    #[error("forbidden: ip not allowed")]
    IpNotAllowed,
    /// Timestamp header is absent.
    #[error("unauthorized: timestamp missing")]
    TimestampMissing,
    /// Timestamp header is not an integer epoch.
    #[error("unauthorized: timestamp malformed")]
    TimestampMalformed,
    /// Timestamp is outside the accepted window.
    #[error("unauthorized: timestamp expired")]
    TimestampExpired,
    /// Nonce header is absent.
    #[error("unauthorized: nonce missing")]
    NonceMissing,
    /// Nonce was already recorded for the client.
    #[error("conflict: replay detected")]
    ReplayDetected,
    /// No active, non-expired key for (client, kid).
    #[error("unauthorized: key not found")]
    KeyNotFound,
    /// Signature mismatch.
    #[error("unauthorized: invalid signature")]
    InvalidSignature,
    /// Backing store failure.
    #[error("auth store failure: {0}")]
    Store(#[from] StoreError),
}

impl AuthError {
    /// Returns the failure category.
    #[must_use]
    pub const fn kind(&self) -> AuthFailureKind {
        match self {
            Self::IpNotAllowed => AuthFailureKind::Forbidden,
            Self::ReplayDetected => AuthFailureKind::Conflict,
            Self::Store(_) => AuthFailureKind::Internal,
            _ => AuthFailureKind::Unauthorized,
        }
    }
}

// ============================================================================
// SECTION: Audit
// ============================================================================

/// Audit sink for authentication decisions.
pub trait AuthAuditSink: Send + Sync {
    /// Record an auth audit event.
    fn record(&self, event: &AuthAuditEvent);
}

/// Auth audit event payload.
#[derive(Debug, Clone, Serialize)]
pub struct AuthAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Decision outcome.
    pub decision: &'static str,
    /// Claimed client identifier.
    pub client_id: Option<String>,
    /// Claimed key identifier.
    pub key_id: Option<String>,
    /// Caller IP address.
    pub peer_ip: Option<String>,
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Failure reason (deny events only).
    pub reason: Option<String>,
    /// Correlation identifier.
    pub correlation_id: String,
}

impl AuthAuditEvent {
    /// Builds an allow event.
    #[must_use]
    pub fn allowed(request: &IngestRequest, auth: &AuthContext) -> Self {
        Self {
            event: "ingest_auth",
            decision: "allow",
            client_id: Some(auth.client_id.clone()),
            key_id: Some(auth.key_id.clone()),
            peer_ip: auth.ip.map(|ip| ip.to_string()),
            method: request.method.clone(),
            path: request.path.clone(),
            reason: None,
            correlation_id: request.correlation_id.clone(),
        }
    }

    /// Builds a deny event.
    #[must_use]
    pub fn denied(request: &IngestRequest, error: &AuthError) -> Self {
        Self {
            event: "ingest_auth",
            decision: "deny",
            client_id: bounded_header(request, HEADER_CLIENT_ID),
            key_id: bounded_header(request, HEADER_KEY_ID),
            peer_ip: request.client_ip.map(|ip| ip.to_string()),
            method: request.method.clone(),
            path: request.path.clone(),
            reason: Some(error.to_string()),
            correlation_id: request.correlation_id.clone(),
        }
    }
}

/// No-op audit sink for tests.
pub struct NoopAuditSink;

impl AuthAuditSink for NoopAuditSink {
    fn record(&self, _event: &AuthAuditEvent) {}
}

// ============================================================================
// SECTION: Authenticator
// ============================================================================

/// HMAC request authenticator.
#[derive(Clone)]
pub struct Authenticator {
    /// Authentication policy.
    policy: AuthPolicy,
    /// Client, key, and IP rule lookups.
    credentials: Arc<dyn CredentialStore>,
    /// Nonce registry.
    replay_guard: Arc<dyn ReplayGuard>,
    /// Time source.
    clock: Arc<dyn Clock>,
    /// Decision audit sink.
    audit: Arc<dyn AuthAuditSink>,
}

impl Authenticator {
    /// Creates an authenticator over the given stores.
    #[must_use]
    pub fn new(
        policy: AuthPolicy,
        credentials: Arc<dyn CredentialStore>,
        replay_guard: Arc<dyn ReplayGuard>,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuthAuditSink>,
    ) -> Self {
        Self {
            policy,
            credentials,
            replay_guard,
            clock,
            audit,
        }
    }

    /// Returns the active policy.
    #[must_use]
    pub const fn policy(&self) -> &AuthPolicy {
        &self.policy
    }

    /// Authenticates a buffered request.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] for the first failed check.
    pub async fn authenticate(&self, request: &IngestRequest) -> Result<AuthContext, AuthError> {
        match self.run_checks(request).await {
            Ok(context) => {
                self.audit.record(&AuthAuditEvent::allowed(request, &context));
                Ok(context)
            }
            Err(error) => {
                self.audit.record(&AuthAuditEvent::denied(request, &error));
                Err(error)
            }
        }
    }

    /// Runs the ordered authentication checks.
    async fn run_checks(&self, request: &IngestRequest) -> Result<AuthContext, AuthError> {
        if !self.policy.enabled {
            return Err(AuthError::Disabled);
        }
        let client_id = required_header(request, HEADER_CLIENT_ID, "X-Client-Id")?;
        let key_id = required_header(request, HEADER_KEY_ID, "X-Key-Id")?;
        let signature = required_header(request, HEADER_SIGNATURE, "X-Signature")?;
        let now = self.clock.now_unix_seconds();

        let client = self
            .credentials
            .find_active_client(client_id)
            .await?
            .filter(|client| client.active)
            .ok_or(AuthError::UnknownClient)?;

        let rules = self.credentials.ip_rules(client.internal_id).await?;
        if !ip_allowed(request.client_ip, &rules) {
            return Err(AuthError::IpNotAllowed);
        }

        let timestamp_header = optional_header(request, HEADER_TIMESTAMP, "X-Timestamp")?;
        let timestamp = if self.policy.enable_timestamp {
            let raw = timestamp_header.ok_or(AuthError::TimestampMissing)?;
            let value = raw.trim().parse::<i64>().map_err(|_| AuthError::TimestampMalformed)?;
            let limit = self.policy.window_seconds.saturating_add(self.policy.clock_skew_seconds);
            if value.abs_diff(now) > limit {
                return Err(AuthError::TimestampExpired);
            }
            Some(value)
        } else {
            None
        };

        let nonce_header = optional_header(request, HEADER_NONCE, "X-Nonce")?;
        if self.policy.enable_nonce {
            let nonce = nonce_header.ok_or(AuthError::NonceMissing)?;
            let record = NonceRecord {
                client_id: client.client_id.clone(),
                client_internal_id: client.internal_id,
                nonce: nonce.to_string(),
                request_timestamp: timestamp.unwrap_or(now),
                received_at: now,
            };
            if self.replay_guard.record_nonce(&record).await? == NonceOutcome::Replayed {
                return Err(AuthError::ReplayDetected);
            }
        }

        let key = self
            .credentials
            .find_active_key(client.internal_id, key_id, now)
            .await?
            .filter(|key| key.is_usable_at(now))
            .ok_or(AuthError::KeyNotFound)?;

        let input = SigningInput {
            method: &request.method,
            path: &request.path,
            query: &request.query,
            client_id,
            key_id,
            timestamp: signed_segment(self.policy.enable_timestamp, timestamp_header),
            nonce: signed_segment(self.policy.enable_nonce, nonce_header),
            body: &request.body,
        };
        let canonical = canonical_string(&input);
        let valid = verify(key.secret.as_bytes(), &canonical, signature)
            .map_err(|_| AuthError::InvalidSignature)?;
        if !valid {
            return Err(AuthError::InvalidSignature);
        }

        if let Err(err) = self.credentials.touch_key(key.internal_id, now).await {
            tracing::warn!(
                client_id = %client.client_id,
                key_id = %key.kid,
                error = %err,
                "failed to record key use"
            );
        }

        Ok(AuthContext {
            client_id: client.client_id,
            key_id: key.kid,
            client_internal_id: client.internal_id,
            ip: request.client_ip,
            body: request.body.clone(),
        })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Reads a required, length-bounded header.
fn required_header<'a>(
    request: &'a IngestRequest,
    name: &str,
    label: &'static str,
) -> Result<&'a str, AuthError> {
    optional_header(request, name, label)?.ok_or(AuthError::MissingHeader(label))
}

/// Reads an optional, length-bounded header.
fn optional_header<'a>(
    request: &'a IngestRequest,
    name: &str,
    label: &'static str,
) -> Result<Option<&'a str>, AuthError> {
    match request.headers.get_non_empty(name) {
        Some(value) if value.len() > MAX_AUTH_HEADER_BYTES => Err(AuthError::HeaderTooLong(label)),
        other => Ok(other),
    }
}

/// Returns a header value for audit output when within limits.
fn bounded_header(request: &IngestRequest, name: &str) -> Option<String> {
    request
        .headers
        .get_non_empty(name)
        .filter(|value| value.len() <= MAX_AUTH_HEADER_BYTES)
        .map(str::to_string)
}

/// Returns the header value when the segment is signed, else the empty string.
fn signed_segment(enabled: bool, header: Option<&str>) -> &str {
    if enabled { header.unwrap_or("") } else { "" }
}

/// Checks the caller IP against the client rules. No rules means no restriction.
fn ip_allowed(ip: Option<IpAddr>, rules: &[IpRule]) -> bool {
    if rules.is_empty() {
        return true;
    }
    let Some(ip) = ip else {
        return false;
    };
    rules.iter().any(|rule| match rule.cidr.trim().parse::<IpNetwork>() {
        Ok(network) => network.contains(ip),
        Err(_) => {
            tracing::warn!(cidr = %rule.cidr, "skipping unparsable ip rule");
            false
        }
    })
}

// ============================================================================
// SECTION: Tests
// ============================================================================
