// crates/erp-ingest-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Ingest Store
// Description: Durable credential, nonce, and idempotency stores on SQLite.
// Purpose: Back the ingest pipeline with crash-safe, cross-process storage.
// Dependencies: erp-ingest-core, rusqlite, serde, serde_json, thiserror, tokio
// ============================================================================

//! ## Overview
//! [`SqliteIngestStore`] implements [`CredentialStore`], [`ReplayGuard`], and
//! [`IdempotencyStore`] over one `SQLite` database. Nonces and idempotency
//! claims use `INSERT ... ON CONFLICT DO NOTHING` against unique indexes, so
//! the database decides the winner even when several processes share the
//! file. Stored responses are parsed on read and fail closed as corruption.
//! Trait methods run their statements on the tokio blocking pool so a busy
//! database never stalls async workers.
//! Security posture: database contents are untrusted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use erp_ingest_core::ClaimOutcome;
use erp_ingest_core::CredentialStore;
use erp_ingest_core::IdempotencyClaim;
use erp_ingest_core::IdempotencyRecord;
use erp_ingest_core::IdempotencyStatus;
use erp_ingest_core::IdempotencyStore;
use erp_ingest_core::IntegrationClient;
use erp_ingest_core::IpRule;
use erp_ingest_core::NonceOutcome;
use erp_ingest_core::NonceRecord;
use erp_ingest_core::RecordId;
use erp_ingest_core::ReplayGuard;
use erp_ingest_core::SigningAlgorithm;
use erp_ingest_core::SigningKey;
use erp_ingest_core::StoreError;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::TransactionBehavior;
use rusqlite::params;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

/// Columns selected for idempotency records, in [`map_record_row`] order.
const RECORD_COLUMNS: &str = "id, client_id, idempotency_key, fingerprint, status, http_status, \
                              response_json, created_at, updated_at";

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` ingest store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `busy_timeout_ms` is interpreted as milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl SqliteStoreConfig {
    /// Creates a config for `path` with default pragmas.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
///
/// # Invariants
/// - Error messages never embed secrets or stored response bodies.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Stored data failed to decode.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data or request.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Store(message),
            SqliteStoreError::Corrupt(message) => Self::Corrupt(message),
            SqliteStoreError::VersionMismatch(message) => Self::VersionMismatch(message),
            SqliteStoreError::Invalid(message) => Self::Invalid(message),
        }
    }
}

/// Maps a rusqlite error into a store error.
fn db_error(err: &rusqlite::Error) -> SqliteStoreError {
    SqliteStoreError::Db(err.to_string())
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed ingest store.
///
/// # Invariants
/// - `SQLite` connection access is serialized through a mutex.
/// - Nonce and claim inserts are decided by unique indexes, never by a prior read.
#[derive(Clone)]
pub struct SqliteIngestStore {
    /// Store configuration.
    config: SqliteStoreConfig,
    /// Shared `SQLite` connection.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteIngestStore {
    /// Opens (or creates) the store and migrates its schema.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the path is invalid, the database
    /// cannot be opened, or the schema version is unsupported.
    pub fn new(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(&config)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            config,
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Returns the store configuration.
    #[must_use]
    pub const fn config(&self) -> &SqliteStoreConfig {
        &self.config
    }

    /// Runs `op` with exclusive access to the connection.
    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, SqliteStoreError>,
    ) -> Result<T, SqliteStoreError> {
        let mut guard = self
            .connection
            .lock()
            .map_err(|_| SqliteStoreError::Db("mutex poisoned".to_string()))?;
        op(&mut guard)
    }

    /// Runs `op` with exclusive access to the connection on the blocking pool.
    async fn with_connection_blocking<T, F>(&self, op: F) -> Result<T, SqliteStoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, SqliteStoreError> + Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || {
            let mut guard = connection
                .lock()
                .map_err(|_| SqliteStoreError::Db("mutex poisoned".to_string()))?;
            op(&mut guard)
        })
        .await
        .map_err(|err| SqliteStoreError::Db(format!("blocking task join failed: {err}")))?
    }

    // ------------------------------------------------------------------------
    // Provisioning
    // ------------------------------------------------------------------------

    /// Creates or updates a client and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the write fails.
    pub fn upsert_client(
        &self,
        client_id: &str,
        name: &str,
        active: bool,
    ) -> Result<IntegrationClient, SqliteStoreError> {
        if client_id.trim().is_empty() {
            return Err(SqliteStoreError::Invalid("client_id must be non-empty".to_string()));
        }
        self.with_connection(|connection| {
            connection
                .execute(
                    "INSERT INTO integration_clients (client_id, name, active, created_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT (client_id) DO UPDATE SET
                        name = excluded.name,
                        active = excluded.active",
                    params![client_id, name, active, unix_seconds()],
                )
                .map_err(|err| db_error(&err))?;
            query_client(connection, client_id)?.ok_or_else(|| {
                SqliteStoreError::Corrupt(format!("client {client_id} missing after upsert"))
            })
        })
    }

    /// Returns a client by external identifier regardless of its active flag.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the read fails.
    pub fn client(&self, client_id: &str) -> Result<Option<IntegrationClient>, SqliteStoreError> {
        self.with_connection(|connection| query_client(connection, client_id))
    }

    /// Creates or replaces the key `kid` for a client. Replacing reactivates it.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the client is unknown or the write fails.
    pub fn upsert_key(
        &self,
        client_internal_id: i64,
        kid: &str,
        secret: &str,
        expires_at: Option<i64>,
    ) -> Result<SigningKey, SqliteStoreError> {
        if kid.trim().is_empty() || secret.is_empty() {
            return Err(SqliteStoreError::Invalid(
                "key id and secret must be non-empty".to_string(),
            ));
        }
        self.with_connection(|connection| {
            connection
                .execute(
                    "INSERT INTO signing_keys
                        (client_internal_id, kid, secret, algorithm, active, expires_at, created_at)
                     VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6)
                     ON CONFLICT (client_internal_id, kid) DO UPDATE SET
                        secret = excluded.secret,
                        algorithm = excluded.algorithm,
                        active = 1,
                        expires_at = excluded.expires_at",
                    params![
                        client_internal_id,
                        kid,
                        secret,
                        SigningAlgorithm::Hs256.label(),
                        expires_at,
                        unix_seconds()
                    ],
                )
                .map_err(|err| db_error(&err))?;
            query_key(connection, client_internal_id, kid)?.ok_or_else(|| {
                SqliteStoreError::Corrupt(format!("key {kid} missing after upsert"))
            })
        })
    }

    /// Returns the stored key for (client, kid) regardless of state.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the read fails.
    pub fn key(
        &self,
        client_internal_id: i64,
        kid: &str,
    ) -> Result<Option<SigningKey>, SqliteStoreError> {
        self.with_connection(|connection| query_key(connection, client_internal_id, kid))
    }

    /// Sets the active flag of a key.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::Invalid`] when the key does not exist.
    pub fn set_key_active(
        &self,
        client_internal_id: i64,
        kid: &str,
        active: bool,
    ) -> Result<(), SqliteStoreError> {
        let updated = self.with_connection(|connection| {
            connection
                .execute(
                    "UPDATE signing_keys SET active = ?3
                     WHERE client_internal_id = ?1 AND kid = ?2",
                    params![client_internal_id, kid, active],
                )
                .map_err(|err| db_error(&err))
        })?;
        if updated == 0 {
            return Err(SqliteStoreError::Invalid(format!("unknown key {kid}")));
        }
        Ok(())
    }

    /// Adds an IP rule unless it already exists.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the client is unknown or the write fails.
    pub fn add_ip_rule(&self, client_internal_id: i64, cidr: &str) -> Result<(), SqliteStoreError> {
        self.with_connection(|connection| {
            connection
                .execute(
                    "INSERT INTO ip_rules (client_internal_id, cidr) VALUES (?1, ?2)
                     ON CONFLICT (client_internal_id, cidr) DO NOTHING",
                    params![client_internal_id, cidr.trim()],
                )
                .map_err(|err| db_error(&err))?;
            Ok(())
        })
    }

    /// Returns the ledger record for (client, key).
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the read fails or the row is corrupt.
    pub fn idempotency_record(
        &self,
        client_id: &str,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, SqliteStoreError> {
        self.with_connection(|connection| query_record(connection, client_id, key))
    }

    /// Returns the number of recorded nonces.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the read fails.
    pub fn nonce_count(&self) -> Result<u64, SqliteStoreError> {
        self.with_connection(|connection| {
            let count: i64 = connection
                .query_row("SELECT COUNT(1) FROM security_nonces", params![], |row| row.get(0))
                .map_err(|err| db_error(&err))?;
            u64::try_from(count)
                .map_err(|_| SqliteStoreError::Corrupt("negative count".to_string()))
        })
    }
}

// ============================================================================
// SECTION: Trait Implementations
// ============================================================================

#[async_trait]
impl CredentialStore for SqliteIngestStore {
    async fn find_active_client(
        &self,
        client_id: &str,
    ) -> Result<Option<IntegrationClient>, StoreError> {
        let client_id = client_id.to_string();
        let client = self
            .with_connection_blocking(move |connection| query_client(connection, &client_id))
            .await?;
        Ok(client.filter(|client| client.active))
    }

    async fn ip_rules(&self, client_internal_id: i64) -> Result<Vec<IpRule>, StoreError> {
        let rules = self
            .with_connection_blocking(move |connection| {
                let mut stmt = connection
                    .prepare("SELECT cidr FROM ip_rules WHERE client_internal_id = ?1 ORDER BY id")
                    .map_err(|err| db_error(&err))?;
                let rows = stmt
                    .query_map(params![client_internal_id], |row| row.get::<_, String>(0))
                    .map_err(|err| db_error(&err))?;
                let mut rules = Vec::new();
                for row in rows {
                    rules.push(IpRule {
                        client_internal_id,
                        cidr: row.map_err(|err| db_error(&err))?,
                    });
                }
                Ok(rules)
            })
            .await?;
        Ok(rules)
    }

    async fn find_active_key(
        &self,
        client_internal_id: i64,
        kid: &str,
        now: i64,
    ) -> Result<Option<SigningKey>, StoreError> {
        let kid = kid.to_string();
        let key = self
            .with_connection_blocking(move |connection| {
                query_key(connection, client_internal_id, &kid)
            })
            .await?;
        Ok(key.filter(|key| key.is_usable_at(now)))
    }

    async fn touch_key(&self, key_internal_id: i64, now: i64) -> Result<(), StoreError> {
        self.with_connection_blocking(move |connection| {
            connection
                .execute(
                    "UPDATE signing_keys SET last_used_at = ?2 WHERE id = ?1",
                    params![key_internal_id, now],
                )
                .map_err(|err| db_error(&err))?;
            Ok(())
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ReplayGuard for SqliteIngestStore {
    async fn record_nonce(&self, record: &NonceRecord) -> Result<NonceOutcome, StoreError> {
        let record = record.clone();
        let inserted = self
            .with_connection_blocking(move |connection| {
                connection
                    .execute(
                        "INSERT INTO security_nonces
                            (client_id, client_internal_id, nonce, request_timestamp, received_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)
                         ON CONFLICT (client_id, nonce) DO NOTHING",
                        params![
                            record.client_id,
                            record.client_internal_id,
                            record.nonce,
                            record.request_timestamp,
                            record.received_at
                        ],
                    )
                    .map_err(|err| db_error(&err))
            })
            .await?;
        Ok(if inserted == 1 { NonceOutcome::Fresh } else { NonceOutcome::Replayed })
    }
}

#[async_trait]
impl IdempotencyStore for SqliteIngestStore {
    async fn claim(&self, claim: &IdempotencyClaim) -> Result<ClaimOutcome, StoreError> {
        let claim = claim.clone();
        let outcome = self
            .with_connection_blocking(move |connection| {
                let tx = connection
                    .transaction_with_behavior(TransactionBehavior::Immediate)
                    .map_err(|err| db_error(&err))?;
                let inserted = tx
                    .execute(
                        "INSERT INTO idempotency_records
                            (client_id, idempotency_key, fingerprint, status,
                             created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                         ON CONFLICT (client_id, idempotency_key) DO NOTHING",
                        params![
                            claim.client_id,
                            claim.key,
                            claim.fingerprint.value,
                            IdempotencyStatus::Processing.label(),
                            claim.created_at
                        ],
                    )
                    .map_err(|err| db_error(&err))?;
                let outcome = if inserted == 1 {
                    ClaimOutcome::Claimed(RecordId::new(tx.last_insert_rowid()))
                } else {
                    let record =
                        query_record(&tx, &claim.client_id, &claim.key)?.ok_or_else(|| {
                            SqliteStoreError::Corrupt(
                                "conflicting idempotency record missing".to_string(),
                            )
                        })?;
                    ClaimOutcome::Existing(record)
                };
                tx.commit().map_err(|err| db_error(&err))?;
                Ok(outcome)
            })
            .await?;
        Ok(outcome)
    }

    async fn finalize(
        &self,
        record_id: RecordId,
        status: IdempotencyStatus,
        http_status: u16,
        response: &Value,
        now: i64,
    ) -> Result<(), StoreError> {
        let response_json = serde_json::to_string(response)
            .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        let updated = self
            .with_connection_blocking(move |connection| {
                connection
                    .execute(
                        "UPDATE idempotency_records
                         SET status = ?2, http_status = ?3, response_json = ?4, updated_at = ?5
                         WHERE id = ?1",
                        params![
                            record_id.get(),
                            status.label(),
                            i64::from(http_status),
                            response_json,
                            now
                        ],
                    )
                    .map_err(|err| db_error(&err))
            })
            .await?;
        if updated == 0 {
            return Err(StoreError::Invalid(format!(
                "unknown idempotency record {}",
                record_id.get()
            )));
        }
        Ok(())
    }

    async fn fail_stale(
        &self,
        cutoff: i64,
        http_status: u16,
        response: &Value,
        now: i64,
    ) -> Result<u64, StoreError> {
        let response_json = serde_json::to_string(response)
            .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
        let updated = self
            .with_connection_blocking(move |connection| {
                connection
                    .execute(
                        "UPDATE idempotency_records
                         SET status = ?2, http_status = ?3, response_json = ?4, updated_at = ?5
                         WHERE status = ?6 AND created_at < ?1",
                        params![
                            cutoff,
                            IdempotencyStatus::Fail.label(),
                            i64::from(http_status),
                            response_json,
                            now,
                            IdempotencyStatus::Processing.label()
                        ],
                    )
                    .map_err(|err| db_error(&err))
            })
            .await?;
        Ok(row_count(updated))
    }

    async fn release_stale(&self, cutoff: i64) -> Result<u64, StoreError> {
        let deleted = self
            .with_connection_blocking(move |connection| {
                connection
                    .execute(
                        "DELETE FROM idempotency_records WHERE status = ?2 AND created_at < ?1",
                        params![cutoff, IdempotencyStatus::Processing.label()],
                    )
                    .map_err(|err| db_error(&err))
            })
            .await?;
        Ok(row_count(deleted))
    }

    async fn purge_finished(&self, cutoff: i64) -> Result<u64, StoreError> {
        let deleted = self
            .with_connection_blocking(move |connection| {
                connection
                    .execute(
                        "DELETE FROM idempotency_records WHERE status != ?2 AND updated_at < ?1",
                        params![cutoff, IdempotencyStatus::Processing.label()],
                    )
                    .map_err(|err| db_error(&err))
            })
            .await?;
        Ok(row_count(deleted))
    }
}

// ============================================================================
// SECTION: Queries
// ============================================================================

/// Loads a client by external identifier.
fn query_client(
    connection: &Connection,
    client_id: &str,
) -> Result<Option<IntegrationClient>, SqliteStoreError> {
    connection
        .query_row(
            "SELECT id, client_id, name, active FROM integration_clients WHERE client_id = ?1",
            params![client_id],
            |row| {
                Ok(IntegrationClient {
                    internal_id: row.get(0)?,
                    client_id: row.get(1)?,
                    name: row.get(2)?,
                    active: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(|err| db_error(&err))
}

/// Raw signing key row before algorithm parsing.
struct KeyRow {
    /// Key internal identifier.
    internal_id: i64,
    /// Owning client internal identifier.
    client_internal_id: i64,
    /// Key identifier.
    kid: String,
    /// Shared secret.
    secret: String,
    /// Stored algorithm label.
    algorithm: String,
    /// Active flag.
    active: bool,
    /// Optional expiry.
    expires_at: Option<i64>,
    /// Last successful use.
    last_used_at: Option<i64>,
}

/// Loads a key by (client, kid).
fn query_key(
    connection: &Connection,
    client_internal_id: i64,
    kid: &str,
) -> Result<Option<SigningKey>, SqliteStoreError> {
    let row = connection
        .query_row(
            "SELECT id, client_internal_id, kid, secret, algorithm, active, expires_at, \
             last_used_at
             FROM signing_keys WHERE client_internal_id = ?1 AND kid = ?2",
            params![client_internal_id, kid],
            |row| {
                Ok(KeyRow {
                    internal_id: row.get(0)?,
                    client_internal_id: row.get(1)?,
                    kid: row.get(2)?,
                    secret: row.get(3)?,
                    algorithm: row.get(4)?,
                    active: row.get(5)?,
                    expires_at: row.get(6)?,
                    last_used_at: row.get(7)?,
                })
            },
        )
        .optional()
        .map_err(|err| db_error(&err))?;
    let Some(row) = row else {
        return Ok(None);
    };
    let algorithm = SigningAlgorithm::parse(&row.algorithm).ok_or_else(|| {
        SqliteStoreError::Corrupt(format!("unsupported signing algorithm: {}", row.algorithm))
    })?;
    Ok(Some(SigningKey {
        internal_id: row.internal_id,
        client_internal_id: row.client_internal_id,
        kid: row.kid,
        secret: row.secret,
        algorithm,
        active: row.active,
        expires_at: row.expires_at,
        last_used_at: row.last_used_at,
    }))
}

/// Raw ledger row before status and response parsing.
struct RecordRow {
    /// Record identifier.
    id: i64,
    /// External client identifier.
    client_id: String,
    /// Idempotency key.
    key: String,
    /// Request fingerprint.
    fingerprint: String,
    /// Stored status label.
    status: String,
    /// Stored HTTP status.
    http_status: Option<i64>,
    /// Stored response JSON.
    response_json: Option<String>,
    /// Creation time.
    created_at: i64,
    /// Last update time.
    updated_at: i64,
}

/// Maps a ledger row selected with [`RECORD_COLUMNS`].
fn map_record_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok(RecordRow {
        id: row.get(0)?,
        client_id: row.get(1)?,
        key: row.get(2)?,
        fingerprint: row.get(3)?,
        status: row.get(4)?,
        http_status: row.get(5)?,
        response_json: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

/// Loads the ledger record for (client, key).
fn query_record(
    connection: &Connection,
    client_id: &str,
    key: &str,
) -> Result<Option<IdempotencyRecord>, SqliteStoreError> {
    let row = connection
        .query_row(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM idempotency_records
                 WHERE client_id = ?1 AND idempotency_key = ?2"
            ),
            params![client_id, key],
            map_record_row,
        )
        .optional()
        .map_err(|err| db_error(&err))?;
    row.map(decode_record).transpose()
}

/// Decodes a raw ledger row, failing closed on invalid data.
fn decode_record(row: RecordRow) -> Result<IdempotencyRecord, SqliteStoreError> {
    let status = IdempotencyStatus::parse(&row.status).ok_or_else(|| {
        SqliteStoreError::Corrupt(format!("record {} has unknown status {}", row.id, row.status))
    })?;
    let http_status = row
        .http_status
        .map(|value| {
            u16::try_from(value).map_err(|_| {
                SqliteStoreError::Corrupt(format!("record {} has invalid http status", row.id))
            })
        })
        .transpose()?;
    let response = row
        .response_json
        .map(|json| {
            serde_json::from_str::<Value>(&json).map_err(|_| {
                SqliteStoreError::Corrupt(format!("record {} has invalid response json", row.id))
            })
        })
        .transpose()?;
    Ok(IdempotencyRecord {
        id: RecordId::new(row.id),
        client_id: row.client_id,
        key: row.key,
        fingerprint: row.fingerprint,
        status,
        http_status,
        response,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    if path.as_os_str().is_empty() {
        return Err(SqliteStoreError::Invalid("store path must not be empty".to_string()));
    }
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.exists() && path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with secure defaults.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection =
        Connection::open_with_flags(&config.path, flags).map_err(|err| db_error(&err))?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteStoreConfig,
) -> Result<(), SqliteStoreError> {
    connection.execute_batch("PRAGMA foreign_keys = ON;").map_err(|err| db_error(&err))?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(|err| db_error(&err))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(|err| db_error(&err))?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| db_error(&err))?;
    Ok(())
}

/// Initializes the `SQLite` schema or validates existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|err| db_error(&err))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| db_error(&err))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| db_error(&err))?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| db_error(&err))?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS integration_clients (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    client_id TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL,
                    active INTEGER NOT NULL DEFAULT 1,
                    created_at INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS signing_keys (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    client_internal_id INTEGER NOT NULL
                        REFERENCES integration_clients(id) ON DELETE CASCADE,
                    kid TEXT NOT NULL,
                    secret TEXT NOT NULL,
                    algorithm TEXT NOT NULL,
                    active INTEGER NOT NULL DEFAULT 1,
                    expires_at INTEGER,
                    last_used_at INTEGER,
                    created_at INTEGER NOT NULL,
                    UNIQUE (client_internal_id, kid)
                );
                CREATE TABLE IF NOT EXISTS ip_rules (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    client_internal_id INTEGER NOT NULL
                        REFERENCES integration_clients(id) ON DELETE CASCADE,
                    cidr TEXT NOT NULL,
                    UNIQUE (client_internal_id, cidr)
                );
                CREATE TABLE IF NOT EXISTS security_nonces (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    client_id TEXT NOT NULL,
                    client_internal_id INTEGER NOT NULL,
                    nonce TEXT NOT NULL,
                    request_timestamp INTEGER NOT NULL,
                    received_at INTEGER NOT NULL,
                    UNIQUE (client_id, nonce)
                );
                CREATE TABLE IF NOT EXISTS idempotency_records (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    client_id TEXT NOT NULL,
                    idempotency_key TEXT NOT NULL,
                    fingerprint TEXT NOT NULL,
                    status TEXT NOT NULL,
                    http_status INTEGER,
                    response_json TEXT,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    UNIQUE (client_id, idempotency_key)
                );
                CREATE INDEX IF NOT EXISTS idx_idempotency_status_created
                    ON idempotency_records (status, created_at);",
            )
            .map_err(|err| db_error(&err))?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(|err| db_error(&err))?;
    Ok(())
}

/// Converts an affected-row count.
fn row_count(rows: usize) -> u64 {
    u64::try_from(rows).unwrap_or(u64::MAX)
}

/// Returns the current unix time in seconds.
fn unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| i64::try_from(duration.as_secs()).unwrap_or(i64::MAX))
}
