// crates/erp-ingest-server/src/lib.rs
// ============================================================================
// Module: ERP Ingest Server Library
// Description: HTTP surface for the authenticated, idempotent ingest pipeline.
// Purpose: Wire configuration, stores, sinks, and audit into an axum router.
// Dependencies: axum, erp-ingest-config, erp-ingest-core, reqwest, tokio
// ============================================================================

//! ## Overview
//! `erp-ingest-server` builds the ingest pipeline from an [`IngestConfig`]
//! and serves it over HTTP. Document sinks deliver mapped documents to the
//! ERP service layer, audit sinks record authentication decisions, and a
//! background reaper keeps the idempotency ledger bounded.
//!
//! [`IngestConfig`]: erp_ingest_config::IngestConfig

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod reaper;
pub mod server;
pub mod sink;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::FileAuditSink;
pub use audit::TracingAuditSink;
pub use reaper::spawn_reaper;
pub use server::IngestServer;
pub use server::ServerError;
pub use sink::HttpDocumentSink;
pub use sink::HttpSinkConfig;
pub use sink::LogDocumentSink;
