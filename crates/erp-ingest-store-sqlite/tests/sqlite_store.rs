// crates/erp-ingest-store-sqlite/tests/sqlite_store.rs
// ============================================================================
// Module: SQLite Store Tests
// Description: Validate SQLite credential, nonce, and idempotency stores.
// Purpose: Ensure durable persistence, atomic claims, and integrity checks.
// Dependencies: erp-ingest-store-sqlite, erp-ingest-core, rusqlite, serde_json, tempfile
// ============================================================================

//! ## Overview
//! Conformance tests for the SQLite-backed ingest store. Covers provisioning,
//! nonce uniqueness, ledger claims across handles, reaping, and fail-closed
//! decoding of tampered rows.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use erp_ingest_core::ClaimOutcome;
use erp_ingest_core::CredentialStore;
use erp_ingest_core::IdempotencyClaim;
use erp_ingest_core::IdempotencyStatus;
use erp_ingest_core::IdempotencyStore;
use erp_ingest_core::NonceOutcome;
use erp_ingest_core::NonceRecord;
use erp_ingest_core::ReplayGuard;
use erp_ingest_core::StoreError;
use erp_ingest_core::fingerprint;
use erp_ingest_store_sqlite::SqliteIngestStore;
use erp_ingest_store_sqlite::SqliteStoreConfig;
use erp_ingest_store_sqlite::SqliteStoreError;
use erp_ingest_store_sqlite::SqliteStoreMode;
use erp_ingest_store_sqlite::SqliteSyncMode;
use serde_json::json;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const NOW: i64 = 1_700_000_000;

fn store_for(path: &Path) -> SqliteIngestStore {
    let config = SqliteStoreConfig {
        path: path.to_path_buf(),
        busy_timeout_ms: 1_000,
        journal_mode: SqliteStoreMode::Wal,
        sync_mode: SqliteSyncMode::Full,
    };
    SqliteIngestStore::new(config).expect("store init")
}

fn claim(key: &str, body: &[u8], created_at: i64) -> IdempotencyClaim {
    IdempotencyClaim {
        client_id: "acme".to_string(),
        key: key.to_string(),
        fingerprint: fingerprint("POST", "/api/v1/invoices", "", body),
        created_at,
    }
}

fn nonce(client_id: &str, value: &str) -> NonceRecord {
    NonceRecord {
        client_id: client_id.to_string(),
        client_internal_id: 1,
        nonce: value.to_string(),
        request_timestamp: NOW,
        received_at: NOW,
    }
}

// ============================================================================
// SECTION: Setup
// ============================================================================

#[test]
fn sqlite_store_rejects_version_mismatch() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("ingest.sqlite");
    let _store = store_for(&path);

    let connection = rusqlite::Connection::open(&path).unwrap();
    connection.execute("UPDATE store_meta SET version = 999", rusqlite::params![]).unwrap();

    let result = SqliteIngestStore::new(SqliteStoreConfig::new(path));
    assert!(matches!(result, Err(SqliteStoreError::VersionMismatch(_))));
}

#[test]
fn sqlite_store_rejects_directory_path() {
    let temp = TempDir::new().unwrap();
    let result = SqliteIngestStore::new(SqliteStoreConfig::new(temp.path()));
    assert!(matches!(result, Err(SqliteStoreError::Invalid(_))));
}

#[test]
fn sqlite_store_rejects_overlong_path_component() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("x".repeat(300)).join("ingest.sqlite");
    let result = SqliteIngestStore::new(SqliteStoreConfig::new(path));
    assert!(matches!(result, Err(SqliteStoreError::Invalid(_))));
}

#[test]
fn sqlite_store_creates_missing_parent_directories() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("nested").join("data").join("ingest.sqlite");
    let _store = store_for(&path);
    assert!(path.exists());
}

// ============================================================================
// SECTION: Credentials
// ============================================================================

#[tokio::test]
async fn sqlite_store_round_trips_clients_keys_and_rules() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("ingest.sqlite"));

    let client = store.upsert_client("acme", "Acme Corp", true).unwrap();
    store.upsert_key(client.internal_id, "k1", "secret", Some(NOW + 60)).unwrap();
    store.add_ip_rule(client.internal_id, "10.0.0.0/8").unwrap();
    store.add_ip_rule(client.internal_id, "10.0.0.0/8").unwrap();
    store.add_ip_rule(client.internal_id, "192.168.1.1").unwrap();

    let found = store.find_active_client("acme").await.unwrap().unwrap();
    assert_eq!(found, client);
    let rules = store.ip_rules(client.internal_id).await.unwrap();
    let cidrs: Vec<&str> = rules.iter().map(|rule| rule.cidr.as_str()).collect();
    assert_eq!(cidrs, vec!["10.0.0.0/8", "192.168.1.1"]);

    let key = store.find_active_key(client.internal_id, "k1", NOW).await.unwrap().unwrap();
    assert_eq!(key.secret, "secret");
    assert!(store.find_active_key(client.internal_id, "k1", NOW + 60).await.unwrap().is_none());
    assert!(store.find_active_key(client.internal_id, "k2", NOW).await.unwrap().is_none());

    store.touch_key(key.internal_id, NOW + 5).await.unwrap();
    let stored = store.key(client.internal_id, "k1").unwrap().unwrap();
    assert_eq!(stored.last_used_at, Some(NOW + 5));
}

#[tokio::test]
async fn sqlite_store_hides_inactive_clients_and_keys() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("ingest.sqlite"));

    let client = store.upsert_client("acme", "Acme Corp", true).unwrap();
    store.upsert_key(client.internal_id, "k1", "secret", None).unwrap();
    store.set_key_active(client.internal_id, "k1", false).unwrap();
    assert!(store.find_active_key(client.internal_id, "k1", NOW).await.unwrap().is_none());

    store.upsert_key(client.internal_id, "k1", "rotated", None).unwrap();
    let key = store.find_active_key(client.internal_id, "k1", NOW).await.unwrap().unwrap();
    assert_eq!(key.secret, "rotated");

    let updated = store.upsert_client("acme", "Acme Renamed", false).unwrap();
    assert_eq!(updated.internal_id, client.internal_id);
    assert!(store.find_active_client("acme").await.unwrap().is_none());
    assert_eq!(store.client("acme").unwrap().unwrap().name, "Acme Renamed");

    assert!(matches!(
        store.set_key_active(client.internal_id, "missing", true),
        Err(SqliteStoreError::Invalid(_))
    ));
}

// ============================================================================
// SECTION: Nonces
// ============================================================================

#[tokio::test]
async fn sqlite_store_detects_nonce_replay_per_client() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("ingest.sqlite"));

    assert_eq!(store.record_nonce(&nonce("acme", "n-1")).await.unwrap(), NonceOutcome::Fresh);
    assert_eq!(store.record_nonce(&nonce("acme", "n-1")).await.unwrap(), NonceOutcome::Replayed);
    assert_eq!(store.record_nonce(&nonce("globex", "n-1")).await.unwrap(), NonceOutcome::Fresh);
    assert_eq!(store.nonce_count().unwrap(), 2);
}

#[tokio::test(flavor = "current_thread")]
async fn sqlite_store_waits_for_write_lock_without_stalling_runtime() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("ingest.sqlite");
    let store = Arc::new(store_for(&path));

    let holder = rusqlite::Connection::open(&path).unwrap();
    holder.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let waiting = Arc::clone(&store);
    let task = tokio::spawn(async move { waiting.record_nonce(&nonce("acme", "n-1")).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!task.is_finished());

    holder.execute_batch("COMMIT;").unwrap();
    assert_eq!(task.await.unwrap().unwrap(), NonceOutcome::Fresh);
}

// ============================================================================
// SECTION: Idempotency
// ============================================================================

#[tokio::test]
async fn sqlite_store_claims_once_and_returns_finalized_record() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("ingest.sqlite"));

    let ClaimOutcome::Claimed(record_id) = store.claim(&claim("inv-1", b"{}", NOW)).await.unwrap()
    else {
        panic!("expected a fresh claim");
    };
    let ClaimOutcome::Existing(pending) = store.claim(&claim("inv-1", b"{}", NOW)).await.unwrap()
    else {
        panic!("expected the existing record");
    };
    assert_eq!(pending.status, IdempotencyStatus::Processing);
    assert_eq!(pending.http_status, None);

    let body = json!({"resource": "invoice", "status": "posted"});
    store.finalize(record_id, IdempotencyStatus::Success, 201, &body, NOW + 1).await.unwrap();

    let record = store.idempotency_record("acme", "inv-1").unwrap().unwrap();
    assert_eq!(record.id, record_id);
    assert_eq!(record.status, IdempotencyStatus::Success);
    assert_eq!(record.http_status, Some(201));
    assert_eq!(record.response, Some(body));
    assert_eq!(record.updated_at, NOW + 1);
}

#[tokio::test]
async fn sqlite_store_claims_are_exclusive_across_handles() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("ingest.sqlite");
    let first = Arc::new(store_for(&path));
    let second = Arc::new(store_for(&path));

    let mut tasks = Vec::new();
    for index in 0 .. 8 {
        let store = if index % 2 == 0 { Arc::clone(&first) } else { Arc::clone(&second) };
        tasks.push(tokio::spawn(async move { store.claim(&claim("race", b"{}", NOW)).await }));
    }
    let mut claimed = 0;
    let mut existing = 0;
    for task in tasks {
        match task.await.unwrap().unwrap() {
            ClaimOutcome::Claimed(_) => claimed += 1,
            ClaimOutcome::Existing(_) => existing += 1,
        }
    }
    assert_eq!(claimed, 1);
    assert_eq!(existing, 7);
}

#[tokio::test]
async fn sqlite_store_persists_across_instances() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("ingest.sqlite");
    {
        let store = store_for(&path);
        let ClaimOutcome::Claimed(record_id) =
            store.claim(&claim("inv-1", b"{}", NOW)).await.unwrap()
        else {
            panic!("expected a fresh claim");
        };
        store.finalize(record_id, IdempotencyStatus::Fail, 502, &json!({}), NOW).await.unwrap();
        store.record_nonce(&nonce("acme", "n-1")).await.unwrap();
    }

    let reopened = store_for(&path);
    let record = reopened.idempotency_record("acme", "inv-1").unwrap().unwrap();
    assert_eq!(record.status, IdempotencyStatus::Fail);
    assert_eq!(record.http_status, Some(502));
    assert_eq!(
        reopened.record_nonce(&nonce("acme", "n-1")).await.unwrap(),
        NonceOutcome::Replayed
    );
}

#[tokio::test]
async fn sqlite_store_reaps_stale_and_expired_records() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("ingest.sqlite"));

    store.claim(&claim("stale", b"{}", NOW - 600)).await.unwrap();
    store.claim(&claim("fresh", b"{}", NOW)).await.unwrap();
    let failure = json!({"code": "ABANDONED_REQUEST"});
    assert_eq!(store.fail_stale(NOW - 300, 504, &failure, NOW).await.unwrap(), 1);

    let stale = store.idempotency_record("acme", "stale").unwrap().unwrap();
    assert_eq!(stale.status, IdempotencyStatus::Fail);
    assert_eq!(stale.http_status, Some(504));
    assert_eq!(stale.response, Some(failure));

    store.claim(&claim("orphan", b"{}", NOW - 600)).await.unwrap();
    assert_eq!(store.release_stale(NOW - 300).await.unwrap(), 1);
    assert!(store.idempotency_record("acme", "orphan").unwrap().is_none());

    assert_eq!(store.purge_finished(NOW).await.unwrap(), 0);
    assert_eq!(store.purge_finished(NOW + 1).await.unwrap(), 1);
    assert!(store.idempotency_record("acme", "stale").unwrap().is_none());
    assert!(store.idempotency_record("acme", "fresh").unwrap().is_some());
}

#[tokio::test]
async fn sqlite_store_fails_closed_on_tampered_rows() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("ingest.sqlite");
    let store = store_for(&path);
    store.claim(&claim("inv-1", b"{}", NOW)).await.unwrap();

    let connection = rusqlite::Connection::open(&path).unwrap();
    connection
        .execute(
            "UPDATE idempotency_records SET status = 'done', response_json = 'not json'",
            rusqlite::params![],
        )
        .unwrap();

    let result = store.claim(&claim("inv-1", b"{}", NOW)).await;
    assert!(matches!(result, Err(StoreError::Corrupt(_))));
}

#[tokio::test]
async fn sqlite_store_rejects_finalize_of_unknown_record() {
    let temp = TempDir::new().unwrap();
    let store = store_for(&temp.path().join("ingest.sqlite"));
    let result = store
        .finalize(
            erp_ingest_core::RecordId::new(42),
            IdempotencyStatus::Success,
            201,
            &json!({}),
            NOW,
        )
        .await;
    assert!(matches!(result, Err(StoreError::Invalid(_))));
}
