// crates/erp-ingest-store-sqlite/src/lib.rs
// ============================================================================
// Module: ERP Ingest SQLite Store
// Description: Durable ingest stores backed by SQLite WAL.
// Purpose: Persist clients, keys, nonces, and idempotency records.
// Dependencies: erp-ingest-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate provides a SQLite-backed implementation of the ingest store
//! traits. Nonce registration and idempotency claims rely on unique indexes,
//! so concurrent writers in separate processes sharing one database file get
//! the same at-most-once guarantees as a single process.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::SqliteIngestStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
