// crates/erp-ingest-config/src/config.rs
// ============================================================================
// Module: ERP Ingest Configuration
// Description: Configuration loading and validation for the ingest gateway.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: erp-ingest-core, erp-ingest-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Every section has defaults, so an empty file is a valid local setup using
//! the in-memory store and the log sink. Missing or invalid configuration
//! fails closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;

use erp_ingest_core::AbandonedPolicy;
use erp_ingest_core::AuthPolicy;
use erp_ingest_core::LedgerPolicy;
use erp_ingest_core::auth::DEFAULT_CLOCK_SKEW_SECONDS;
use erp_ingest_core::auth::DEFAULT_WINDOW_SECONDS;
use erp_ingest_core::ledger::DEFAULT_PROCESSING_TIMEOUT_SECONDS;
use erp_ingest_store_sqlite::SqliteStoreConfig;
use erp_ingest_store_sqlite::SqliteStoreMode;
use erp_ingest_store_sqlite::SqliteSyncMode;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "erp-ingest.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "ERP_INGEST_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Default bind address.
pub(crate) const DEFAULT_BIND: &str = "127.0.0.1:8080";
/// Largest accepted request body limit in bytes.
pub(crate) const MAX_BODY_BYTES_LIMIT: usize = 16 * 1024 * 1024;
/// Largest accepted freshness window in seconds.
pub(crate) const MAX_WINDOW_SECONDS: u64 = 86_400;
/// Largest accepted clock skew in seconds.
pub(crate) const MAX_CLOCK_SKEW_SECONDS: u64 = 3_600;
/// Default retention of finished idempotency records in days.
pub(crate) const DEFAULT_RETENTION_DAYS: u64 = 14;
/// Largest accepted retention in days.
pub(crate) const MAX_RETENTION_DAYS: u64 = 365;
/// Largest accepted processing timeout in seconds.
pub(crate) const MAX_PROCESSING_TIMEOUT_SECONDS: u64 = 86_400;
/// Default reaper interval in seconds.
pub(crate) const DEFAULT_REAPER_INTERVAL_SECONDS: u64 = 60;
/// Largest accepted reaper interval in seconds.
pub(crate) const MAX_REAPER_INTERVAL_SECONDS: u64 = 3_600;
/// Default `SQLite` busy timeout in milliseconds.
pub(crate) const DEFAULT_STORE_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default sink request timeout in milliseconds.
pub(crate) const DEFAULT_SINK_TIMEOUT_MS: u64 = 10_000;
/// Minimum sink request timeout in milliseconds.
pub(crate) const MIN_SINK_TIMEOUT_MS: u64 = 100;
/// Maximum sink request timeout in milliseconds.
pub(crate) const MAX_SINK_TIMEOUT_MS: u64 = 120_000;
/// Headroom a `processing` claim keeps beyond the sink timeout, in milliseconds.
pub(crate) const PROCESSING_TIMEOUT_MARGIN_MS: u64 = 5_000;
/// Maximum length of an environment variable name.
pub(crate) const MAX_ENV_NAME_LENGTH: usize = 128;
/// Seconds per day.
const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// ERP ingest gateway configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Request authentication configuration.
    #[serde(default)]
    pub security: SecurityConfig,
    /// Idempotency ledger configuration.
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    /// Backing store configuration.
    #[serde(default)]
    pub store: StoreConfig,
    /// Downstream document sink configuration.
    #[serde(default)]
    pub sink: SinkConfig,
}

impl IngestConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.security.validate()?;
        self.idempotency.validate()?;
        self.store.validate()?;
        self.sink.validate()?;
        self.validate_processing_timeout()?;
        Ok(())
    }

    /// Rejects processing timeouts that an in-flight sink call could outlive.
    fn validate_processing_timeout(&self) -> Result<(), ConfigError> {
        if !self.idempotency.enabled || self.sink.sink_type != SinkType::Http {
            return Ok(());
        }
        let processing_ms = self.idempotency.processing_timeout_seconds.saturating_mul(1_000);
        let required_ms = self.sink.timeout_ms.saturating_add(PROCESSING_TIMEOUT_MARGIN_MS);
        if processing_ms <= required_ms {
            return Err(ConfigError::Invalid(format!(
                "idempotency.processing_timeout_seconds must exceed sink.timeout_ms plus \
                 {PROCESSING_TIMEOUT_MARGIN_MS} ms"
            )));
        }
        Ok(())
    }

    /// Returns the authentication policy for the core authenticator.
    #[must_use]
    pub const fn auth_policy(&self) -> AuthPolicy {
        AuthPolicy {
            enabled: self.security.enable_hmac,
            enable_timestamp: self.security.enable_timestamp,
            window_seconds: self.security.window_seconds,
            clock_skew_seconds: self.security.clock_skew_seconds,
            enable_nonce: self.security.enable_nonce,
        }
    }

    /// Returns the ledger policy for the core idempotency ledger.
    #[must_use]
    pub const fn ledger_policy(&self) -> LedgerPolicy {
        LedgerPolicy {
            enabled: self.idempotency.enabled,
            required: self.idempotency.required,
            processing_timeout_seconds: self.idempotency.processing_timeout_seconds,
            retention_seconds: self.idempotency.retention_days.saturating_mul(SECONDS_PER_DAY),
            abandoned: self.idempotency.abandoned_policy,
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Use the first `X-Forwarded-For` entry as the caller IP.
    #[serde(default)]
    pub trust_proxy_headers: bool,
    /// Optional JSON-lines audit log path.
    #[serde(default)]
    pub audit_log_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_body_bytes: default_max_body_bytes(),
            trust_proxy_headers: false,
            audit_log_path: None,
        }
    }
}

impl ServerConfig {
    /// Returns the parsed bind address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the bind address does not parse.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid("invalid bind address".to_string()))
    }

    /// Validates server configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_body_bytes must be greater than zero".to_string(),
            ));
        }
        if self.max_body_bytes > MAX_BODY_BYTES_LIMIT {
            return Err(ConfigError::Invalid("max_body_bytes exceeds limit".to_string()));
        }
        if let Some(path) = &self.audit_log_path {
            validate_path_string("server.audit_log_path", &path.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Request authentication configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SecurityConfig {
    /// Enables HMAC authentication. When off every request is rejected.
    #[serde(default = "default_true")]
    pub enable_hmac: bool,
    /// Requires and checks `X-Timestamp`.
    #[serde(default = "default_true")]
    pub enable_timestamp: bool,
    /// Freshness window in seconds.
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    /// Extra tolerated clock skew in seconds.
    #[serde(default = "default_clock_skew_seconds")]
    pub clock_skew_seconds: u64,
    /// Requires and registers `X-Nonce`.
    #[serde(default = "default_true")]
    pub enable_nonce: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_hmac: true,
            enable_timestamp: true,
            window_seconds: default_window_seconds(),
            clock_skew_seconds: default_clock_skew_seconds(),
            enable_nonce: true,
        }
    }
}

impl SecurityConfig {
    /// Validates security configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.window_seconds == 0 || self.window_seconds > MAX_WINDOW_SECONDS {
            return Err(ConfigError::Invalid(format!(
                "security.window_seconds must be between 1 and {MAX_WINDOW_SECONDS}"
            )));
        }
        if self.clock_skew_seconds > MAX_CLOCK_SKEW_SECONDS {
            return Err(ConfigError::Invalid(format!(
                "security.clock_skew_seconds must be at most {MAX_CLOCK_SKEW_SECONDS}"
            )));
        }
        Ok(())
    }
}

/// Idempotency ledger configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct IdempotencyConfig {
    /// Enables deduplication.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Requires `Idempotency-Key` on write requests.
    #[serde(default)]
    pub required: bool,
    /// Retention of finished records in days.
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
    /// Age in seconds after which `processing` records are abandoned.
    #[serde(default = "default_processing_timeout_seconds")]
    pub processing_timeout_seconds: u64,
    /// Handling of abandoned records.
    #[serde(default)]
    pub abandoned_policy: AbandonedPolicy,
    /// Interval between reaper passes in seconds.
    #[serde(default = "default_reaper_interval_seconds")]
    pub reaper_interval_seconds: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            required: false,
            retention_days: default_retention_days(),
            processing_timeout_seconds: default_processing_timeout_seconds(),
            abandoned_policy: AbandonedPolicy::default(),
            reaper_interval_seconds: default_reaper_interval_seconds(),
        }
    }
}

impl IdempotencyConfig {
    /// Validates idempotency configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.required && !self.enabled {
            return Err(ConfigError::Invalid(
                "idempotency.required needs idempotency.enabled".to_string(),
            ));
        }
        if self.retention_days == 0 || self.retention_days > MAX_RETENTION_DAYS {
            return Err(ConfigError::Invalid(format!(
                "idempotency.retention_days must be between 1 and {MAX_RETENTION_DAYS}"
            )));
        }
        if self.processing_timeout_seconds == 0
            || self.processing_timeout_seconds > MAX_PROCESSING_TIMEOUT_SECONDS
        {
            return Err(ConfigError::Invalid(format!(
                "idempotency.processing_timeout_seconds must be between 1 and \
                 {MAX_PROCESSING_TIMEOUT_SECONDS}"
            )));
        }
        if self.reaper_interval_seconds == 0
            || self.reaper_interval_seconds > MAX_REAPER_INTERVAL_SECONDS
        {
            return Err(ConfigError::Invalid(format!(
                "idempotency.reaper_interval_seconds must be between 1 and \
                 {MAX_REAPER_INTERVAL_SECONDS}"
            )));
        }
        Ok(())
    }
}

/// Backing store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Store backend type.
    #[serde(rename = "type", default)]
    pub store_type: StoreType,
    /// `SQLite` database path when using the sqlite backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_store_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` synchronous mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_type: StoreType::default(),
            path: None,
            busy_timeout_ms: default_store_busy_timeout_ms(),
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

impl StoreConfig {
    /// Returns the `SQLite` store config when the sqlite backend is selected.
    #[must_use]
    pub fn sqlite_config(&self) -> Option<SqliteStoreConfig> {
        match self.store_type {
            StoreType::Memory => None,
            StoreType::Sqlite => self.path.as_ref().map(|path| SqliteStoreConfig {
                path: path.clone(),
                busy_timeout_ms: self.busy_timeout_ms,
                journal_mode: self.journal_mode,
                sync_mode: self.sync_mode,
            }),
        }
    }

    /// Validates store configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match self.store_type {
            StoreType::Memory => {
                if self.path.is_some() {
                    return Err(ConfigError::Invalid("memory store must not set path".to_string()));
                }
                Ok(())
            }
            StoreType::Sqlite => {
                let path = self.path.as_ref().ok_or_else(|| {
                    ConfigError::Invalid("sqlite store requires path".to_string())
                })?;
                validate_path_string("store.path", &path.to_string_lossy())
            }
        }
    }
}

/// Store backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreType {
    /// Use the in-memory store. State is lost on restart.
    #[default]
    Memory,
    /// Use the `SQLite`-backed durable store.
    Sqlite,
}

/// Downstream document sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    /// Sink type.
    #[serde(rename = "type", default)]
    pub sink_type: SinkType,
    /// Service layer base URL for the http sink.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Request timeout in milliseconds.
    #[serde(default = "default_sink_timeout_ms")]
    pub timeout_ms: u64,
    /// Environment variable carrying a bearer token for the http sink.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            sink_type: SinkType::default(),
            base_url: None,
            timeout_ms: default_sink_timeout_ms(),
            api_key_env: None,
        }
    }
}

impl SinkConfig {
    /// Validates sink configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        match self.sink_type {
            SinkType::Log => {
                if self.base_url.is_some() {
                    return Err(ConfigError::Invalid("log sink must not set base_url".to_string()));
                }
            }
            SinkType::Http => {
                let base_url = self.base_url.as_deref().unwrap_or_default().trim();
                if base_url.is_empty() {
                    return Err(ConfigError::Invalid("http sink requires base_url".to_string()));
                }
                if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
                    return Err(ConfigError::Invalid(
                        "sink.base_url must include http:// or https://".to_string(),
                    ));
                }
                if !(MIN_SINK_TIMEOUT_MS ..= MAX_SINK_TIMEOUT_MS).contains(&self.timeout_ms) {
                    return Err(ConfigError::Invalid(format!(
                        "sink.timeout_ms must be between {MIN_SINK_TIMEOUT_MS} and \
                         {MAX_SINK_TIMEOUT_MS}"
                    )));
                }
            }
        }
        if let Some(name) = &self.api_key_env {
            validate_env_name("sink.api_key_env", name)?;
        }
        Ok(())
    }
}

/// Document sink type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SinkType {
    /// Log documents and return synthetic references.
    #[default]
    Log,
    /// POST documents to the ERP service layer.
    Http,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from CLI or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against security limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        let component_value = component.as_os_str().to_string_lossy();
        if component_value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

/// Validates an environment variable name.
fn validate_env_name(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() || value.len() > MAX_ENV_NAME_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} must be 1-{MAX_ENV_NAME_LENGTH} bytes")));
    }
    let valid = value.chars().all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit() || ch == '_')
        && !value.starts_with(|ch: char| ch.is_ascii_digit());
    if !valid {
        return Err(ConfigError::Invalid(format!(
            "{field} must contain only A-Z, 0-9, and _ and not start with a digit"
        )));
    }
    Ok(())
}

/// Returns true for serde boolean defaults.
const fn default_true() -> bool {
    true
}

/// Default bind address.
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

/// Default maximum request body size in bytes.
pub(crate) const fn default_max_body_bytes() -> usize {
    1024 * 1024
}

/// Default freshness window in seconds.
const fn default_window_seconds() -> u64 {
    DEFAULT_WINDOW_SECONDS
}

/// Default clock skew in seconds.
const fn default_clock_skew_seconds() -> u64 {
    DEFAULT_CLOCK_SKEW_SECONDS
}

/// Default retention in days.
const fn default_retention_days() -> u64 {
    DEFAULT_RETENTION_DAYS
}

/// Default processing timeout in seconds.
const fn default_processing_timeout_seconds() -> u64 {
    DEFAULT_PROCESSING_TIMEOUT_SECONDS
}

/// Default reaper interval in seconds.
const fn default_reaper_interval_seconds() -> u64 {
    DEFAULT_REAPER_INTERVAL_SECONDS
}

/// Default store busy timeout in milliseconds.
const fn default_store_busy_timeout_ms() -> u64 {
    DEFAULT_STORE_BUSY_TIMEOUT_MS
}

/// Default sink timeout in milliseconds.
const fn default_sink_timeout_ms() -> u64 {
    DEFAULT_SINK_TIMEOUT_MS
}

// ============================================================================
// SECTION: Tests
// ============================================================================
