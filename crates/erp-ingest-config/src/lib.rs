// crates/erp-ingest-config/src/lib.rs
// ============================================================================
// Module: ERP Ingest Config Library
// Description: Canonical config model and validation.
// Purpose: Single source of truth for erp-ingest.toml semantics.
// Dependencies: erp-ingest-core, erp-ingest-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! `erp-ingest-config` defines the configuration model for the ingest
//! gateway and converts validated sections into the policies consumed by
//! the core pipeline. Validation is strict and fails closed.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
