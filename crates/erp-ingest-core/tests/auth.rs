// crates/erp-ingest-core/tests/auth.rs
// ============================================================================
// Module: Authentication Tests
// Description: Ordered HMAC authentication checks against in-memory stores.
// Purpose: Validate fail-closed ordering, replay protection, and key rules.
// Dependencies: erp-ingest-core, tokio
// ============================================================================

//! ## Overview
//! Covers each rejection path of [`Authenticator::authenticate`] and the side
//! effects that prove check ordering: IP rejections never register a nonce,
//! while signature failures happen after the nonce is consumed.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

mod common;

use std::net::IpAddr;
use std::net::Ipv4Addr;

use common::CLIENT_ID;
use common::Fixture;
use common::KEY_ID;
use common::NOW;
use common::SECRET;
use common::SignedRequest;
use erp_ingest_core::AuthError;
use erp_ingest_core::AuthPolicy;
use erp_ingest_core::auth::MAX_AUTH_HEADER_BYTES;

// ============================================================================
// SECTION: Accepted Requests
// ============================================================================

#[tokio::test]
async fn valid_request_is_accepted_and_key_use_recorded() {
    let fixture = Fixture::new();
    let auth = fixture.authenticator(AuthPolicy::default());
    let request = SignedRequest::invoice("nonce-1", "{}").build();

    let context = auth.authenticate(&request).await.unwrap();

    assert_eq!(context.client_id, CLIENT_ID);
    assert_eq!(context.key_id, KEY_ID);
    assert_eq!(context.client_internal_id, fixture.client_internal_id);
    assert_eq!(context.body.as_ref(), b"{}");
    let key = fixture.store.key(fixture.client_internal_id, KEY_ID).unwrap().unwrap();
    assert_eq!(key.last_used_at, Some(NOW));
    assert_eq!(fixture.audit.decisions(), vec![("allow".to_string(), None)]);
}

#[tokio::test]
async fn timestamp_at_window_edge_is_accepted() {
    let fixture = Fixture::new();
    let auth = fixture.authenticator(AuthPolicy::default());
    fixture.clock.advance(360);
    let request = SignedRequest::invoice("nonce-edge", "{}").build();
    assert!(auth.authenticate(&request).await.is_ok());
}

#[tokio::test]
async fn disabled_timestamp_and_nonce_are_not_required() {
    let fixture = Fixture::new();
    let policy = AuthPolicy {
        enable_timestamp: false,
        enable_nonce: false,
        ..AuthPolicy::default()
    };
    let auth = fixture.authenticator(policy);
    let mut signed = SignedRequest::invoice("unused", "{}");
    signed.timestamp = None;
    signed.nonce = None;

    auth.authenticate(&signed.build()).await.unwrap();
    auth.authenticate(&signed.build()).await.unwrap();
    assert_eq!(fixture.store.nonce_count().unwrap(), 0);
}

// ============================================================================
// SECTION: Rejections
// ============================================================================

#[tokio::test]
async fn disabled_authentication_rejects_everything() {
    let fixture = Fixture::new();
    let auth = fixture.authenticator(AuthPolicy {
        enabled: false,
        ..AuthPolicy::default()
    });
    let request = SignedRequest::invoice("nonce-1", "{}").build();
    assert_eq!(auth.authenticate(&request).await.unwrap_err(), AuthError::Disabled);
}

#[tokio::test]
async fn missing_signature_header_is_rejected() {
    let fixture = Fixture::new();
    let auth = fixture.authenticator(AuthPolicy::default());
    let mut request = SignedRequest::invoice("nonce-1", "{}").build();
    request.headers.insert("X-Signature", "");
    assert_eq!(
        auth.authenticate(&request).await.unwrap_err(),
        AuthError::MissingHeader("X-Signature")
    );
}

#[tokio::test]
async fn oversized_header_is_rejected() {
    let fixture = Fixture::new();
    let auth = fixture.authenticator(AuthPolicy::default());
    let signed = SignedRequest::invoice(&"n".repeat(MAX_AUTH_HEADER_BYTES + 1), "{}");
    assert_eq!(
        auth.authenticate(&signed.build()).await.unwrap_err(),
        AuthError::HeaderTooLong("X-Nonce")
    );
}

#[tokio::test]
async fn unknown_and_inactive_clients_are_rejected() {
    let fixture = Fixture::new();
    let auth = fixture.authenticator(AuthPolicy::default());
    let mut signed = SignedRequest::invoice("nonce-1", "{}");
    signed.client_id = "ghost".to_string();
    assert_eq!(auth.authenticate(&signed.build()).await.unwrap_err(), AuthError::UnknownClient);

    fixture.store.upsert_client(CLIENT_ID, "Acme Corp", false).unwrap();
    let request = SignedRequest::invoice("nonce-2", "{}").build();
    assert_eq!(auth.authenticate(&request).await.unwrap_err(), AuthError::UnknownClient);
}

#[tokio::test]
async fn ip_outside_allowlist_is_forbidden_before_nonce_registration() {
    let fixture = Fixture::new();
    fixture.store.add_ip_rule(fixture.client_internal_id, "10.0.0.0/8").unwrap();
    let auth = fixture.authenticator(AuthPolicy::default());

    let request = SignedRequest::invoice("nonce-1", "{}").build();
    assert_eq!(auth.authenticate(&request).await.unwrap_err(), AuthError::IpNotAllowed);
    assert_eq!(fixture.store.nonce_count().unwrap(), 0);

    let mut allowed = SignedRequest::invoice("nonce-1", "{}");
    allowed.ip = Some(IpAddr::V4(Ipv4Addr::new(10, 20, 30, 40)));
    assert!(auth.authenticate(&allowed.build()).await.is_ok());
}

#[tokio::test]
async fn stale_and_future_timestamps_are_expired() {
    let fixture = Fixture::new();
    let auth = fixture.authenticator(AuthPolicy::default());

    fixture.clock.set(NOW + 361);
    let stale = SignedRequest::invoice("nonce-1", "{}").build();
    assert_eq!(auth.authenticate(&stale).await.unwrap_err(), AuthError::TimestampExpired);

    fixture.clock.set(NOW - 361);
    let future = SignedRequest::invoice("nonce-2", "{}").build();
    assert_eq!(auth.authenticate(&future).await.unwrap_err(), AuthError::TimestampExpired);
    assert_eq!(fixture.store.nonce_count().unwrap(), 0);
}

#[tokio::test]
async fn malformed_or_missing_timestamp_is_rejected() {
    let fixture = Fixture::new();
    let auth = fixture.authenticator(AuthPolicy::default());

    let mut malformed = SignedRequest::invoice("nonce-1", "{}");
    malformed.timestamp = Some("yesterday".to_string());
    assert_eq!(
        auth.authenticate(&malformed.build()).await.unwrap_err(),
        AuthError::TimestampMalformed
    );

    let mut missing = SignedRequest::invoice("nonce-2", "{}");
    missing.timestamp = None;
    assert_eq!(
        auth.authenticate(&missing.build()).await.unwrap_err(),
        AuthError::TimestampMissing
    );
}

#[tokio::test]
async fn missing_nonce_is_rejected() {
    let fixture = Fixture::new();
    let auth = fixture.authenticator(AuthPolicy::default());
    let mut signed = SignedRequest::invoice("unused", "{}");
    signed.nonce = None;
    assert_eq!(auth.authenticate(&signed.build()).await.unwrap_err(), AuthError::NonceMissing);
}

#[tokio::test]
async fn replayed_nonce_is_a_conflict() {
    let fixture = Fixture::new();
    let auth = fixture.authenticator(AuthPolicy::default());
    let request = SignedRequest::invoice("nonce-1", "{}").build();

    auth.authenticate(&request).await.unwrap();
    assert_eq!(auth.authenticate(&request).await.unwrap_err(), AuthError::ReplayDetected);

    let decisions = fixture.audit.decisions();
    assert_eq!(decisions.len(), 2);
    assert_eq!(decisions[1].0, "deny");
    assert_eq!(decisions[1].1.as_deref(), Some("conflict: replay detected"));
}

#[tokio::test]
async fn nonces_are_scoped_per_client() {
    let fixture = Fixture::new();
    let other = fixture.store.upsert_client("globex", "Globex", true).unwrap();
    fixture.store.upsert_key(other.internal_id, "g1", "globex-secret", None).unwrap();
    let auth = fixture.authenticator(AuthPolicy::default());

    auth.authenticate(&SignedRequest::invoice("shared", "{}").build()).await.unwrap();
    let mut globex = SignedRequest::invoice("shared", "{}");
    globex.client_id = "globex".to_string();
    globex.key_id = "g1".to_string();
    globex.secret = "globex-secret".to_string();
    assert!(auth.authenticate(&globex.build()).await.is_ok());
}

#[tokio::test]
async fn expired_or_inactive_keys_are_not_found() {
    let fixture = Fixture::new();
    let auth = fixture.authenticator(AuthPolicy::default());

    fixture.store.upsert_key(fixture.client_internal_id, KEY_ID, SECRET, Some(NOW)).unwrap();
    let expired = SignedRequest::invoice("nonce-1", "{}").build();
    assert_eq!(auth.authenticate(&expired).await.unwrap_err(), AuthError::KeyNotFound);

    fixture.store.upsert_key(fixture.client_internal_id, KEY_ID, SECRET, None).unwrap();
    fixture.store.set_key_active(fixture.client_internal_id, KEY_ID, false).unwrap();
    let inactive = SignedRequest::invoice("nonce-2", "{}").build();
    assert_eq!(auth.authenticate(&inactive).await.unwrap_err(), AuthError::KeyNotFound);
}

#[tokio::test]
async fn tampered_body_or_query_fails_signature_after_nonce_is_consumed() {
    let fixture = Fixture::new();
    let auth = fixture.authenticator(AuthPolicy::default());

    let signed = SignedRequest::invoice("nonce-1", r#"{"a":1}"#);
    let mut tampered = signed.build();
    tampered.body = bytes::Bytes::from_static(br#"{"a":2}"#);
    assert_eq!(auth.authenticate(&tampered).await.unwrap_err(), AuthError::InvalidSignature);
    assert_eq!(fixture.store.nonce_count().unwrap(), 1);

    let signed = SignedRequest::invoice("nonce-2", "{}");
    let mut tampered = signed.build();
    tampered.query = "debug=1".to_string();
    assert_eq!(auth.authenticate(&tampered).await.unwrap_err(), AuthError::InvalidSignature);
}

#[tokio::test]
async fn signature_from_wrong_secret_is_rejected() {
    let fixture = Fixture::new();
    let auth = fixture.authenticator(AuthPolicy::default());
    let mut signed = SignedRequest::invoice("nonce-1", "{}");
    signed.secret = "not-the-secret".to_string();
    assert_eq!(auth.authenticate(&signed.build()).await.unwrap_err(), AuthError::InvalidSignature);
    let key = fixture.store.key(fixture.client_internal_id, KEY_ID).unwrap().unwrap();
    assert_eq!(key.last_used_at, None);
}
