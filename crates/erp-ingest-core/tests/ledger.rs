// crates/erp-ingest-core/tests/ledger.rs
// ============================================================================
// Module: Idempotency Ledger Tests
// Description: Claim, replay, conflict, and reaping behavior of the ledger.
// Purpose: Validate at-most-once semantics over the in-memory store.
// Dependencies: erp-ingest-core, tokio
// ============================================================================

//! ## Overview
//! Exercises [`IdempotencyLedger`] decisions for fresh claims, finished
//! records, fingerprint mismatches, and stale `processing` records.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

mod common;

use std::sync::Arc;

use common::Fixture;
use common::NOW;
use erp_ingest_core::AbandonedPolicy;
use erp_ingest_core::BeginOutcome;
use erp_ingest_core::IdempotencyStatus;
use erp_ingest_core::LedgerError;
use erp_ingest_core::LedgerPolicy;
use erp_ingest_core::ReapReport;
use erp_ingest_core::fingerprint;
use erp_ingest_core::ledger::ABANDONED_HTTP_STATUS;
use erp_ingest_core::ledger::MAX_IDEMPOTENCY_KEY_BYTES;
use serde_json::json;

// ============================================================================
// SECTION: Claims
// ============================================================================

#[tokio::test]
async fn first_claim_wins_and_finished_record_replays() {
    let fixture = Fixture::new();
    let ledger = fixture.ledger(LedgerPolicy::default());
    let digest = fingerprint("POST", "/api/v1/invoices", "", b"{}");

    let BeginOutcome::Claimed(record_id) = ledger.begin("acme", "key-1", &digest).await.unwrap()
    else {
        panic!("expected a fresh claim");
    };
    let body = json!({"status": "posted"});
    ledger.finalize(record_id, 201, &body).await.unwrap();

    let replay = ledger.begin("acme", "key-1", &digest).await.unwrap();
    assert_eq!(
        replay,
        BeginOutcome::Cached {
            http_status: 201,
            body,
        }
    );
    let record = fixture.store.idempotency_record("acme", "key-1").unwrap().unwrap();
    assert_eq!(record.status, IdempotencyStatus::Success);
    assert_eq!(record.fingerprint, digest.value);
}

#[tokio::test]
async fn in_progress_duplicate_is_a_conflict() {
    let fixture = Fixture::new();
    let ledger = fixture.ledger(LedgerPolicy::default());
    let digest = fingerprint("POST", "/api/v1/invoices", "", b"{}");

    assert!(matches!(
        ledger.begin("acme", "key-1", &digest).await.unwrap(),
        BeginOutcome::Claimed(_)
    ));
    assert_eq!(
        ledger.begin("acme", "key-1", &digest).await.unwrap_err(),
        LedgerError::InProgress
    );
}

#[tokio::test]
async fn key_reuse_with_different_request_is_a_mismatch_even_while_processing() {
    let fixture = Fixture::new();
    let ledger = fixture.ledger(LedgerPolicy::default());
    let first = fingerprint("POST", "/api/v1/invoices", "", br#"{"a":1}"#);
    let second = fingerprint("POST", "/api/v1/invoices", "", br#"{"a":2}"#);

    ledger.begin("acme", "key-1", &first).await.unwrap();
    assert_eq!(
        ledger.begin("acme", "key-1", &second).await.unwrap_err(),
        LedgerError::FingerprintMismatch
    );
}

#[tokio::test]
async fn separator_bytes_moved_between_query_and_body_are_a_mismatch() {
    let fixture = Fixture::new();
    let ledger = fixture.ledger(LedgerPolicy::default());
    let first = fingerprint("POST", "/api/v1/invoices", "a=1|", b"{}");
    let second = fingerprint("POST", "/api/v1/invoices", "a=1", b"|{}");
    assert_ne!(first, second);

    ledger.begin("acme", "key-1", &first).await.unwrap();
    assert_eq!(
        ledger.begin("acme", "key-1", &second).await.unwrap_err(),
        LedgerError::FingerprintMismatch
    );
}

#[tokio::test]
async fn keys_are_scoped_per_client() {
    let fixture = Fixture::new();
    let ledger = fixture.ledger(LedgerPolicy::default());
    let digest = fingerprint("POST", "/api/v1/invoices", "", b"{}");

    assert!(matches!(
        ledger.begin("acme", "key-1", &digest).await.unwrap(),
        BeginOutcome::Claimed(_)
    ));
    assert!(matches!(
        ledger.begin("globex", "key-1", &digest).await.unwrap(),
        BeginOutcome::Claimed(_)
    ));
}

#[tokio::test]
async fn failed_outcome_replays_the_stored_failure() {
    let fixture = Fixture::new();
    let ledger = fixture.ledger(LedgerPolicy::default());
    let digest = fingerprint("POST", "/api/v1/invoices", "", b"{}");

    let BeginOutcome::Claimed(record_id) = ledger.begin("acme", "key-1", &digest).await.unwrap()
    else {
        panic!("expected a fresh claim");
    };
    let body = json!({"code": "UPSTREAM_ERROR"});
    ledger.finalize(record_id, 502, &body).await.unwrap();

    let record = fixture.store.idempotency_record("acme", "key-1").unwrap().unwrap();
    assert_eq!(record.status, IdempotencyStatus::Fail);
    assert_eq!(
        ledger.begin("acme", "key-1", &digest).await.unwrap(),
        BeginOutcome::Cached {
            http_status: 502,
            body,
        }
    );
}

#[tokio::test]
async fn disabled_ledger_bypasses_the_store() {
    let fixture = Fixture::new();
    let ledger = fixture.ledger(LedgerPolicy {
        enabled: false,
        ..LedgerPolicy::default()
    });
    let digest = fingerprint("POST", "/api/v1/invoices", "", b"{}");

    assert_eq!(ledger.begin("acme", "key-1", &digest).await.unwrap(), BeginOutcome::Bypassed);
    assert!(fixture.store.idempotency_record("acme", "key-1").unwrap().is_none());
}

#[tokio::test]
async fn blank_or_oversized_keys_are_invalid() {
    let fixture = Fixture::new();
    let ledger = fixture.ledger(LedgerPolicy::default());
    let digest = fingerprint("POST", "/api/v1/invoices", "", b"{}");

    assert!(matches!(
        ledger.begin("acme", "   ", &digest).await.unwrap_err(),
        LedgerError::InvalidKey(_)
    ));
    let long_key = "k".repeat(MAX_IDEMPOTENCY_KEY_BYTES + 1);
    assert!(matches!(
        ledger.begin("acme", &long_key, &digest).await.unwrap_err(),
        LedgerError::InvalidKey(_)
    ));
    let max_key = "k".repeat(MAX_IDEMPOTENCY_KEY_BYTES);
    assert!(matches!(
        ledger.begin("acme", &max_key, &digest).await.unwrap(),
        BeginOutcome::Claimed(_)
    ));
}

#[tokio::test]
async fn concurrent_claims_yield_exactly_one_winner() {
    let fixture = Fixture::new();
    let ledger = Arc::new(fixture.ledger(LedgerPolicy::default()));
    let digest = fingerprint("POST", "/api/v1/invoices", "", b"{}");

    let mut tasks = Vec::new();
    for _ in 0 .. 16 {
        let ledger = Arc::clone(&ledger);
        let digest = digest.clone();
        tasks.push(tokio::spawn(async move { ledger.begin("acme", "race", &digest).await }));
    }
    let mut claimed = 0;
    let mut in_progress = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(BeginOutcome::Claimed(_)) => claimed += 1,
            Err(LedgerError::InProgress) => in_progress += 1,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
    assert_eq!(claimed, 1);
    assert_eq!(in_progress, 15);
}

// ============================================================================
// SECTION: Reaping
// ============================================================================

#[tokio::test]
async fn reaper_fails_abandoned_records_by_default() {
    let fixture = Fixture::new();
    let ledger = fixture.ledger(LedgerPolicy::default());
    let digest = fingerprint("POST", "/api/v1/invoices", "", b"{}");
    ledger.begin("acme", "stuck", &digest).await.unwrap();

    fixture.clock.advance(299);
    assert_eq!(ledger.reap().await.unwrap(), ReapReport::default());

    fixture.clock.advance(2);
    let report = ledger.reap().await.unwrap();
    assert_eq!(report.failed, 1);

    let BeginOutcome::Cached {
        http_status,
        body,
    } = ledger.begin("acme", "stuck", &digest).await.unwrap()
    else {
        panic!("expected a cached failure");
    };
    assert_eq!(http_status, ABANDONED_HTTP_STATUS);
    assert_eq!(body["code"], "ABANDONED_REQUEST");
}

#[tokio::test]
async fn reaper_can_release_abandoned_records() {
    let fixture = Fixture::new();
    let ledger = fixture.ledger(LedgerPolicy {
        abandoned: AbandonedPolicy::Release,
        ..LedgerPolicy::default()
    });
    let digest = fingerprint("POST", "/api/v1/invoices", "", b"{}");
    ledger.begin("acme", "stuck", &digest).await.unwrap();

    fixture.clock.advance(301);
    let report = ledger.reap().await.unwrap();
    assert_eq!(report.released, 1);
    assert!(matches!(
        ledger.begin("acme", "stuck", &digest).await.unwrap(),
        BeginOutcome::Claimed(_)
    ));
}

#[tokio::test]
async fn reaper_purges_finished_records_after_retention() {
    let fixture = Fixture::new();
    let ledger = fixture.ledger(LedgerPolicy {
        retention_seconds: 3600,
        ..LedgerPolicy::default()
    });
    let digest = fingerprint("POST", "/api/v1/invoices", "", b"{}");
    let BeginOutcome::Claimed(record_id) = ledger.begin("acme", "done", &digest).await.unwrap()
    else {
        panic!("expected a fresh claim");
    };
    ledger.finalize(record_id, 201, &json!({})).await.unwrap();

    fixture.clock.set(NOW + 3599);
    assert_eq!(ledger.reap().await.unwrap().purged, 0);
    fixture.clock.set(NOW + 3601);
    assert_eq!(ledger.reap().await.unwrap().purged, 1);
    assert!(fixture.store.idempotency_record("acme", "done").unwrap().is_none());
}
