// crates/erp-ingest-core/tests/common/mod.rs
// ============================================================================
// Module: Common Test Fixtures
// Description: Shared fixtures for ingest core tests.
// Purpose: Build seeded stores, signed requests, and wired pipelines.
// Dependencies: erp-ingest-core
// ============================================================================

//! ## Overview
//! Fixtures seed client `acme` with key `k1` and sign requests against a
//! [`FixedClock`] so timestamp checks are deterministic.

#![allow(dead_code, reason = "Shared test helpers may be unused in some cases.")]
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::unwrap_in_result,
    reason = "Test fixtures favor direct unwraps for setup clarity."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::Mutex;

use bytes::Bytes;
use erp_ingest_core::AuthAuditEvent;
use erp_ingest_core::AuthAuditSink;
use erp_ingest_core::AuthPolicy;
use erp_ingest_core::Authenticator;
use erp_ingest_core::DocumentIngestHandler;
use erp_ingest_core::FixedClock;
use erp_ingest_core::IdempotencyLedger;
use erp_ingest_core::InMemoryDocumentSink;
use erp_ingest_core::InMemoryIngestStore;
use erp_ingest_core::IngestRequest;
use erp_ingest_core::LedgerPolicy;
use erp_ingest_core::Pipeline;
use erp_ingest_core::RequestHeaders;
use erp_ingest_core::SigningInput;
use erp_ingest_core::TransformerRegistry;
use erp_ingest_core::sign_request;

// ============================================================================
// SECTION: Constants
// ============================================================================

pub const NOW: i64 = 1_700_000_000;
pub const CLIENT_ID: &str = "acme";
pub const KEY_ID: &str = "k1";
pub const SECRET: &str = "s3cret-shared-key";
pub const INVOICE_PATH: &str = "/api/v1/invoices";

// ============================================================================
// SECTION: Audit Capture
// ============================================================================

/// Audit sink that keeps every event in memory.
#[derive(Default)]
pub struct CapturingAudit {
    pub events: Mutex<Vec<AuthAuditEvent>>,
}

impl CapturingAudit {
    pub fn decisions(&self) -> Vec<(String, Option<String>)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|event| (event.decision.to_string(), event.reason.clone()))
            .collect()
    }
}

impl AuthAuditSink for CapturingAudit {
    fn record(&self, event: &AuthAuditEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

// ============================================================================
// SECTION: Fixture
// ============================================================================

/// Seeded stores, clock, and audit capture.
pub struct Fixture {
    pub store: InMemoryIngestStore,
    pub clock: Arc<FixedClock>,
    pub audit: Arc<CapturingAudit>,
    pub client_internal_id: i64,
}

impl Fixture {
    pub fn new() -> Self {
        let store = InMemoryIngestStore::new();
        let client = store.upsert_client(CLIENT_ID, "Acme Corp", true).unwrap();
        store.upsert_key(client.internal_id, KEY_ID, SECRET, None).unwrap();
        Self {
            store,
            clock: Arc::new(FixedClock::new(NOW)),
            audit: Arc::new(CapturingAudit::default()),
            client_internal_id: client.internal_id,
        }
    }

    pub fn authenticator(&self, policy: AuthPolicy) -> Authenticator {
        Authenticator::new(
            policy,
            Arc::new(self.store.clone()),
            Arc::new(self.store.clone()),
            self.clock.clone(),
            self.audit.clone(),
        )
    }

    pub fn ledger(&self, policy: LedgerPolicy) -> IdempotencyLedger {
        IdempotencyLedger::new(policy, Arc::new(self.store.clone()), self.clock.clone())
    }

    pub fn pipeline(&self, ledger: LedgerPolicy, sink: InMemoryDocumentSink) -> Pipeline {
        let registry = Arc::new(TransformerRegistry::with_defaults());
        let handler = DocumentIngestHandler::new(registry, Arc::new(sink));
        Pipeline::new(
            self.authenticator(AuthPolicy::default()),
            self.ledger(ledger),
            Arc::new(handler),
        )
    }
}

// ============================================================================
// SECTION: Requests
// ============================================================================

/// Builder for signed requests.
#[derive(Clone)]
pub struct SignedRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    pub resource: String,
    pub client_id: String,
    pub key_id: String,
    pub secret: String,
    pub timestamp: Option<String>,
    pub nonce: Option<String>,
    pub body: Vec<u8>,
    pub idempotency_key: Option<String>,
    pub ip: Option<IpAddr>,
}

impl SignedRequest {
    pub fn invoice(nonce: &str, body: &str) -> Self {
        Self {
            method: "POST".to_string(),
            path: INVOICE_PATH.to_string(),
            query: String::new(),
            resource: "invoice".to_string(),
            client_id: CLIENT_ID.to_string(),
            key_id: KEY_ID.to_string(),
            secret: SECRET.to_string(),
            timestamp: Some(NOW.to_string()),
            nonce: Some(nonce.to_string()),
            body: body.as_bytes().to_vec(),
            idempotency_key: None,
            ip: Some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7))),
        }
    }

    pub fn with_key(mut self, key: &str) -> Self {
        self.idempotency_key = Some(key.to_string());
        self
    }

    pub fn signature(&self) -> String {
        let input = SigningInput {
            method: &self.method,
            path: &self.path,
            query: &self.query,
            client_id: &self.client_id,
            key_id: &self.key_id,
            timestamp: self.timestamp.as_deref().unwrap_or(""),
            nonce: self.nonce.as_deref().unwrap_or(""),
            body: &self.body,
        };
        sign_request(self.secret.as_bytes(), &input).unwrap()
    }

    pub fn build(&self) -> IngestRequest {
        let signature = self.signature();
        self.build_with_signature(&signature)
    }

    pub fn build_with_signature(&self, signature: &str) -> IngestRequest {
        let mut headers = RequestHeaders::new()
            .with("X-Client-Id", self.client_id.as_str())
            .with("X-Key-Id", self.key_id.as_str())
            .with("X-Signature", signature);
        if let Some(timestamp) = &self.timestamp {
            headers.insert("X-Timestamp", timestamp.as_str());
        }
        if let Some(nonce) = &self.nonce {
            headers.insert("X-Nonce", nonce.as_str());
        }
        if let Some(key) = &self.idempotency_key {
            headers.insert("Idempotency-Key", key.as_str());
        }
        IngestRequest {
            method: self.method.clone(),
            path: self.path.clone(),
            query: self.query.clone(),
            resource: self.resource.clone(),
            headers,
            client_ip: self.ip,
            body: Bytes::from(self.body.clone()),
            correlation_id: "corr-test".to_string(),
        }
    }
}

// ============================================================================
// SECTION: Documents
// ============================================================================

pub const INVOICE_BODY: &str = concat!(
    r#"{"customer_code":"C001","currency":"EUR","#,
    r#""lines":[{"sku":"A1","qty":2,"unit_price":10.5}]}"#
);
