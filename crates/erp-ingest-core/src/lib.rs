// crates/erp-ingest-core/src/lib.rs
// ============================================================================
// Module: ERP Ingest Core Library
// Description: Authentication, idempotency, and mapping for document ingest.
// Purpose: Provide the transport-agnostic ingest pipeline and its store seams.
// Dependencies: async-trait, hmac, ipnetwork, serde_json, sha2, tracing
// ============================================================================

//! ## Overview
//! ERP Ingest Core accepts signed document submissions, executes each
//! (client, idempotency key) at most once, and maps client documents through a
//! canonical shape into the target ERP shape before handing them to a
//! [`DocumentSink`].
//! Invariants:
//! - Authentication checks run in a fixed order and stop at the first failure.
//! - A nonce is accepted at most once per client.
//! - A claimed idempotency slot is finalized at most once.
//! - Mapping is pure and deterministic for a given spec and input.
//!
//! Persistence and transport live in sibling crates behind the traits in
//! [`interfaces`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod auth;
pub mod clock;
pub mod documents;
pub mod errors;
pub mod hashing;
pub mod ingest;
pub mod interfaces;
pub mod ledger;
pub mod mapping;
pub mod memory;
pub mod pipeline;
pub mod records;
pub mod request;
pub mod signing;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use auth::AuthAuditEvent;
pub use auth::AuthAuditSink;
pub use auth::AuthContext;
pub use auth::AuthError;
pub use auth::AuthFailureKind;
pub use auth::AuthPolicy;
pub use auth::Authenticator;
pub use auth::NoopAuditSink;
pub use clock::Clock;
pub use clock::FixedClock;
pub use clock::SystemClock;
pub use documents::DEFAULT_PROFILE;
pub use documents::DocumentTransformer;
pub use documents::RegistryError;
pub use documents::TransformerRegistry;
pub use errors::ErrorEnvelope;
pub use errors::PipelineError;
pub use hashing::HashDigest;
pub use hashing::fingerprint;
pub use ingest::DocumentIngestHandler;
pub use interfaces::CredentialStore;
pub use interfaces::DocumentReference;
pub use interfaces::DocumentRequest;
pub use interfaces::DocumentSink;
pub use interfaces::IdempotencyStore;
pub use interfaces::ReplayGuard;
pub use interfaces::SinkError;
pub use interfaces::StoreError;
pub use ledger::AbandonedPolicy;
pub use ledger::BeginOutcome;
pub use ledger::IdempotencyLedger;
pub use ledger::LedgerError;
pub use ledger::LedgerPolicy;
pub use ledger::ReapReport;
pub use mapping::FieldSpec;
pub use mapping::MappingContext;
pub use mapping::MappingError;
pub use mapping::MappingSpec;
pub use mapping::Transform;
pub use mapping::ValueKind;
pub use mapping::map_document;
pub use memory::InMemoryDocumentSink;
pub use memory::InMemoryIngestStore;
pub use pipeline::HandlerOutput;
pub use pipeline::Pipeline;
pub use pipeline::PipelineResponse;
pub use pipeline::RequestHandler;
pub use records::ClaimOutcome;
pub use records::IdempotencyClaim;
pub use records::IdempotencyRecord;
pub use records::IdempotencyStatus;
pub use records::IntegrationClient;
pub use records::IpRule;
pub use records::NonceOutcome;
pub use records::NonceRecord;
pub use records::RecordId;
pub use records::SigningAlgorithm;
pub use records::SigningKey;
pub use request::IngestRequest;
pub use request::RequestHeaders;
pub use request::resolve_client_ip;
pub use signing::SigningInput;
pub use signing::canonical_string;
pub use signing::sign_request;
