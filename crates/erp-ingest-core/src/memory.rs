// crates/erp-ingest-core/src/memory.rs
// ============================================================================
// Module: In-Memory Stores
// Description: In-memory credential, nonce, and idempotency stores plus a sink.
// Purpose: Provide deterministic backends for tests and single-process runs.
// Dependencies: async-trait, serde_json
// ============================================================================

//! ## Overview
//! [`InMemoryIngestStore`] implements every store trait behind one mutex, so
//! each conditional insert is atomic within the process. It does not
//! coordinate across replicas; use the `SQLite` store for that.
//! [`InMemoryDocumentSink`] records posted documents and returns sequential
//! references.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use async_trait::async_trait;
use serde_json::Value;

use crate::interfaces::CredentialStore;
use crate::interfaces::DocumentReference;
use crate::interfaces::DocumentRequest;
use crate::interfaces::DocumentSink;
use crate::interfaces::IdempotencyStore;
use crate::interfaces::ReplayGuard;
use crate::interfaces::SinkError;
use crate::interfaces::StoreError;
use crate::records::ClaimOutcome;
use crate::records::IdempotencyClaim;
use crate::records::IdempotencyRecord;
use crate::records::IdempotencyStatus;
use crate::records::IntegrationClient;
use crate::records::IpRule;
use crate::records::NonceOutcome;
use crate::records::NonceRecord;
use crate::records::RecordId;
use crate::records::SigningAlgorithm;
use crate::records::SigningKey;

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// Mutable store contents.
#[derive(Debug, Default)]
struct StoreState {
    /// Last allocated internal identifier.
    next_id: i64,
    /// Clients keyed by external identifier.
    clients: BTreeMap<String, IntegrationClient>,
    /// Keys keyed by (client internal id, kid).
    keys: BTreeMap<(i64, String), SigningKey>,
    /// IP rules in insertion order.
    ip_rules: Vec<IpRule>,
    /// Nonces keyed by (client id, nonce).
    nonces: BTreeMap<(String, String), NonceRecord>,
    /// Idempotency records keyed by (client id, key).
    records: BTreeMap<(String, String), IdempotencyRecord>,
}

impl StoreState {
    /// Allocates the next internal identifier.
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory implementation of every ingest store trait.
#[derive(Debug, Default, Clone)]
pub struct InMemoryIngestStore {
    /// Store contents protected by a mutex.
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryIngestStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the store state.
    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Store("in-memory store mutex poisoned".to_string()))
    }

    /// Creates or updates a client and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store is unavailable.
    pub fn upsert_client(
        &self,
        client_id: &str,
        name: &str,
        active: bool,
    ) -> Result<IntegrationClient, StoreError> {
        let mut guard = self.lock()?;
        let existing = guard.clients.get(client_id).map(|client| client.internal_id);
        let internal_id = match existing {
            Some(internal_id) => internal_id,
            None => guard.allocate_id(),
        };
        let client = IntegrationClient {
            internal_id,
            client_id: client_id.to_string(),
            name: name.to_string(),
            active,
        };
        guard.clients.insert(client_id.to_string(), client.clone());
        Ok(client)
    }

    /// Creates or replaces the key `kid` for the client.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store is unavailable.
    pub fn upsert_key(
        &self,
        client_internal_id: i64,
        kid: &str,
        secret: &str,
        expires_at: Option<i64>,
    ) -> Result<SigningKey, StoreError> {
        let mut guard = self.lock()?;
        let slot = (client_internal_id, kid.to_string());
        let existing = guard.keys.get(&slot).map(|key| key.internal_id);
        let internal_id = match existing {
            Some(internal_id) => internal_id,
            None => guard.allocate_id(),
        };
        let key = SigningKey {
            internal_id,
            client_internal_id,
            kid: kid.to_string(),
            secret: secret.to_string(),
            algorithm: SigningAlgorithm::Hs256,
            active: true,
            expires_at,
            last_used_at: None,
        };
        guard.keys.insert(slot, key.clone());
        Ok(key)
    }

    /// Sets the active flag of a key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] when the key does not exist.
    pub fn set_key_active(
        &self,
        client_internal_id: i64,
        kid: &str,
        active: bool,
    ) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let key = guard
            .keys
            .get_mut(&(client_internal_id, kid.to_string()))
            .ok_or_else(|| StoreError::Invalid(format!("unknown key {kid}")))?;
        key.active = active;
        Ok(())
    }

    /// Adds an IP rule unless it already exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store is unavailable.
    pub fn add_ip_rule(&self, client_internal_id: i64, cidr: &str) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let rule = IpRule {
            client_internal_id,
            cidr: cidr.to_string(),
        };
        if !guard.ip_rules.contains(&rule) {
            guard.ip_rules.push(rule);
        }
        Ok(())
    }

    /// Returns the stored key for (client, kid).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store is unavailable.
    pub fn key(
        &self,
        client_internal_id: i64,
        kid: &str,
    ) -> Result<Option<SigningKey>, StoreError> {
        Ok(self.lock()?.keys.get(&(client_internal_id, kid.to_string())).cloned())
    }

    /// Returns the idempotency record for (client, key).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store is unavailable.
    pub fn idempotency_record(
        &self,
        client_id: &str,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        Ok(self.lock()?.records.get(&(client_id.to_string(), key.to_string())).cloned())
    }

    /// Returns the number of recorded nonces.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store is unavailable.
    pub fn nonce_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.nonces.len())
    }
}

#[async_trait]
impl CredentialStore for InMemoryIngestStore {
    async fn find_active_client(
        &self,
        client_id: &str,
    ) -> Result<Option<IntegrationClient>, StoreError> {
        Ok(self.lock()?.clients.get(client_id).filter(|client| client.active).cloned())
    }

    async fn ip_rules(&self, client_internal_id: i64) -> Result<Vec<IpRule>, StoreError> {
        Ok(self
            .lock()?
            .ip_rules
            .iter()
            .filter(|rule| rule.client_internal_id == client_internal_id)
            .cloned()
            .collect())
    }

    async fn find_active_key(
        &self,
        client_internal_id: i64,
        kid: &str,
        now: i64,
    ) -> Result<Option<SigningKey>, StoreError> {
        Ok(self
            .lock()?
            .keys
            .get(&(client_internal_id, kid.to_string()))
            .filter(|key| key.is_usable_at(now))
            .cloned())
    }

    async fn touch_key(&self, key_internal_id: i64, now: i64) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        if let Some(key) = guard.keys.values_mut().find(|key| key.internal_id == key_internal_id) {
            key.last_used_at = Some(now);
        }
        Ok(())
    }
}

#[async_trait]
impl ReplayGuard for InMemoryIngestStore {
    async fn record_nonce(&self, record: &NonceRecord) -> Result<NonceOutcome, StoreError> {
        let mut guard = self.lock()?;
        let slot = (record.client_id.clone(), record.nonce.clone());
        if guard.nonces.contains_key(&slot) {
            return Ok(NonceOutcome::Replayed);
        }
        guard.nonces.insert(slot, record.clone());
        Ok(NonceOutcome::Fresh)
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIngestStore {
    async fn claim(&self, claim: &IdempotencyClaim) -> Result<ClaimOutcome, StoreError> {
        let mut guard = self.lock()?;
        let slot = (claim.client_id.clone(), claim.key.clone());
        if let Some(existing) = guard.records.get(&slot) {
            return Ok(ClaimOutcome::Existing(existing.clone()));
        }
        let id = RecordId::new(guard.allocate_id());
        guard.records.insert(
            slot,
            IdempotencyRecord {
                id,
                client_id: claim.client_id.clone(),
                key: claim.key.clone(),
                fingerprint: claim.fingerprint.value.clone(),
                status: IdempotencyStatus::Processing,
                http_status: None,
                response: None,
                created_at: claim.created_at,
                updated_at: claim.created_at,
            },
        );
        Ok(ClaimOutcome::Claimed(id))
    }

    async fn finalize(
        &self,
        record_id: RecordId,
        status: IdempotencyStatus,
        http_status: u16,
        response: &Value,
        now: i64,
    ) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let record = guard
            .records
            .values_mut()
            .find(|record| record.id == record_id)
            .ok_or_else(|| {
                StoreError::Invalid(format!("unknown idempotency record {}", record_id.get()))
            })?;
        record.status = status;
        record.http_status = Some(http_status);
        record.response = Some(response.clone());
        record.updated_at = now;
        Ok(())
    }

    async fn fail_stale(
        &self,
        cutoff: i64,
        http_status: u16,
        response: &Value,
        now: i64,
    ) -> Result<u64, StoreError> {
        let mut guard = self.lock()?;
        let mut count = 0;
        for record in guard.records.values_mut() {
            if record.status == IdempotencyStatus::Processing && record.created_at < cutoff {
                record.status = IdempotencyStatus::Fail;
                record.http_status = Some(http_status);
                record.response = Some(response.clone());
                record.updated_at = now;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn release_stale(&self, cutoff: i64) -> Result<u64, StoreError> {
        let mut guard = self.lock()?;
        let before = guard.records.len();
        guard.records.retain(|_, record| {
            !(record.status == IdempotencyStatus::Processing && record.created_at < cutoff)
        });
        Ok(count_removed(before, guard.records.len()))
    }

    async fn purge_finished(&self, cutoff: i64) -> Result<u64, StoreError> {
        let mut guard = self.lock()?;
        let before = guard.records.len();
        guard.records.retain(|_, record| {
            record.status == IdempotencyStatus::Processing || record.updated_at >= cutoff
        });
        Ok(count_removed(before, guard.records.len()))
    }
}

/// Converts a removal delta into a count.
fn count_removed(before: usize, after: usize) -> u64 {
    u64::try_from(before.saturating_sub(after)).unwrap_or(u64::MAX)
}

// ============================================================================
// SECTION: In-Memory Sink
// ============================================================================

/// Document sink that records requests and returns sequential references.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDocumentSink {
    /// Posted documents in arrival order.
    posted: Arc<Mutex<Vec<DocumentRequest>>>,
}

impl InMemoryDocumentSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every posted document.
    #[must_use]
    pub fn posted(&self) -> Vec<DocumentRequest> {
        self.posted.lock().map(|guard| guard.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DocumentSink for InMemoryDocumentSink {
    async fn create_document(
        &self,
        request: &DocumentRequest,
    ) -> Result<DocumentReference, SinkError> {
        let mut guard = self
            .posted
            .lock()
            .map_err(|_| SinkError::Transport("in-memory sink mutex poisoned".to_string()))?;
        guard.push(request.clone());
        let entry = i64::try_from(guard.len()).unwrap_or(i64::MAX);
        Ok(DocumentReference {
            entry,
            number: Some(entry),
        })
    }
}
