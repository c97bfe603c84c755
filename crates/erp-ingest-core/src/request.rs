// crates/erp-ingest-core/src/request.rs
// ============================================================================
// Module: Ingest Request
// Description: Transport-neutral request model and header names.
// Purpose: Hand one buffered request to the authenticator and the handler.
// Dependencies: bytes
// ============================================================================

//! ## Overview
//! The transport buffers the body once into [`Bytes`]; the authenticator and
//! the business handler read the same buffer so they never disagree on what
//! was signed. Header lookups are case-insensitive.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::net::IpAddr;

use bytes::Bytes;

// ============================================================================
// SECTION: Header Names
// ============================================================================

/// Client identifier header.
pub const HEADER_CLIENT_ID: &str = "x-client-id";
/// Key identifier header.
pub const HEADER_KEY_ID: &str = "x-key-id";
/// Request timestamp header (unix seconds).
pub const HEADER_TIMESTAMP: &str = "x-timestamp";
/// Nonce header.
pub const HEADER_NONCE: &str = "x-nonce";
/// Signature header.
pub const HEADER_SIGNATURE: &str = "x-signature";
/// Idempotency key header.
pub const HEADER_IDEMPOTENCY_KEY: &str = "idempotency-key";
/// Mapping profile selector header.
pub const HEADER_MAPPING_PROFILE: &str = "x-mapping-profile";
/// Correlation identifier header.
pub const HEADER_REQUEST_ID: &str = "x-request-id";
/// Proxy forwarding header.
pub const HEADER_FORWARDED_FOR: &str = "x-forwarded-for";
/// Response header flagging a cached idempotent replay.
pub const HEADER_IDEMPOTENT_REPLAYED: &str = "idempotent-replayed";

// ============================================================================
// SECTION: Headers
// ============================================================================

/// Case-insensitive request header map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeaders {
    /// Header values keyed by lowercase name.
    values: BTreeMap<String, String>,
}

impl RequestHeaders {
    /// Creates an empty header map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a header, replacing any previous value.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.values.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Returns the header value when present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Returns the header value when present and not blank.
    #[must_use]
    pub fn get_non_empty(&self, name: &str) -> Option<&str> {
        self.get(name).filter(|value| !value.trim().is_empty())
    }
}

// ============================================================================
// SECTION: Request
// ============================================================================

/// Buffered inbound request.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    /// Upper-case HTTP method.
    pub method: String,
    /// Request path without query.
    pub path: String,
    /// Raw query string without the leading `?`.
    pub query: String,
    /// Resource name resolved from the route.
    pub resource: String,
    /// Request headers.
    pub headers: RequestHeaders,
    /// Resolved caller IP.
    pub client_ip: Option<IpAddr>,
    /// Raw body bytes.
    pub body: Bytes,
    /// Correlation identifier echoed in responses.
    pub correlation_id: String,
}

impl IngestRequest {
    /// Returns true for methods that mutate downstream state.
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(self.method.as_str(), "POST" | "PUT" | "PATCH" | "DELETE")
    }
}

// ============================================================================
// SECTION: Client IP Resolution
// ============================================================================

/// Resolves the caller IP from the peer address and proxy headers.
///
/// When `trust_proxy_headers` is set the first `X-Forwarded-For` entry wins.
/// IPv4-mapped IPv6 addresses are reduced to IPv4.
#[must_use]
pub fn resolve_client_ip(
    peer: Option<IpAddr>,
    forwarded_for: Option<&str>,
    trust_proxy_headers: bool,
) -> Option<IpAddr> {
    if trust_proxy_headers
        && let Some(first) = forwarded_for.and_then(|value| value.split(',').next())
        && let Ok(ip) = first.trim().parse::<IpAddr>()
    {
        return Some(canonical_ip(ip));
    }
    peer.map(canonical_ip)
}

/// Reduces IPv4-mapped IPv6 addresses to IPv4.
fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(IpAddr::V6(v6), IpAddr::V4),
        IpAddr::V4(_) => ip,
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
