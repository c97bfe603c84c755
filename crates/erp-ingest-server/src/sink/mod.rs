// crates/erp-ingest-server/src/sink/mod.rs
// ============================================================================
// Module: Document Sinks
// Description: Downstream ERP delivery implementations.
// Purpose: Provide HTTP and log-only document sinks.
// Dependencies: erp-ingest-core
// ============================================================================

//! ## Overview
//! Sinks implement [`erp_ingest_core::DocumentSink`]. [`HttpDocumentSink`]
//! posts to the ERP service layer and [`LogDocumentSink`] records documents
//! locally for development.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod http;
mod log;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use http::HttpDocumentSink;
pub use http::HttpSinkConfig;
pub use log::LogDocumentSink;
