// crates/erp-ingest-server/src/sink/log.rs
// ============================================================================
// Module: Log Document Sink
// Description: Log-only sink returning synthetic document references.
// Purpose: Run the full pipeline locally without an ERP service layer.
// Dependencies: erp-ingest-core, tracing
// ============================================================================

//! ## Overview
//! `LogDocumentSink` logs each document and hands out sequential references.
//! It does not deliver payloads to external systems.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use erp_ingest_core::DocumentReference;
use erp_ingest_core::DocumentRequest;
use erp_ingest_core::DocumentSink;
use erp_ingest_core::SinkError;

// ============================================================================
// SECTION: Log Sink
// ============================================================================

/// Log-only document sink.
#[derive(Debug, Default)]
pub struct LogDocumentSink {
    /// Last issued entry number.
    next_entry: AtomicI64,
}

impl LogDocumentSink {
    /// Creates a log sink starting at entry 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentSink for LogDocumentSink {
    async fn create_document(
        &self,
        request: &DocumentRequest,
    ) -> Result<DocumentReference, SinkError> {
        let entry = self.next_entry.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        let payload_bytes = serde_json::to_vec(&request.payload).map_or(0, |bytes| bytes.len());
        tracing::info!(
            resource = %request.resource,
            collection = %request.collection,
            idempotency_token = request.idempotency_token.as_deref().unwrap_or(""),
            payload_bytes,
            entry,
            "document logged"
        );
        Ok(DocumentReference {
            entry,
            number: Some(entry),
        })
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
