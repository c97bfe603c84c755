// crates/erp-ingest-cli/src/main.rs
// ============================================================================
// Module: ERP Ingest CLI Entry Point
// Description: Command dispatcher for the ingest server and its stores.
// Purpose: Run the server, validate config, manage credentials, sign requests.
// Dependencies: clap, erp-ingest-config, erp-ingest-server, thiserror, tokio
// ============================================================================

//! ## Overview
//! `erp-ingest` starts the HTTP server, validates configuration, seeds and
//! revokes client credentials in the SQLite store, runs a one-off ledger
//! reaper pass, and signs requests for manual testing.
//! Security posture: command-line inputs are untrusted and validated before
//! they reach the store.

// ============================================================================
// SECTION: Modules
// ============================================================================


// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use erp_ingest_config::IngestConfig;
use erp_ingest_config::StoreType;
use erp_ingest_core::IdempotencyLedger;
use erp_ingest_core::SigningInput;
use erp_ingest_core::SystemClock;
use erp_ingest_core::request::HEADER_CLIENT_ID;
use erp_ingest_core::request::HEADER_KEY_ID;
use erp_ingest_core::request::HEADER_NONCE;
use erp_ingest_core::request::HEADER_SIGNATURE;
use erp_ingest_core::request::HEADER_TIMESTAMP;
use erp_ingest_core::sign_request;
use erp_ingest_server::IngestServer;
use erp_ingest_store_sqlite::SqliteIngestStore;
use ipnetwork::IpNetwork;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum size of a body file passed to `sign`.
const MAX_BODY_FILE_BYTES: u64 = 16 * 1024 * 1024;
/// Default log filter when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "info";

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "erp-ingest", version, disable_help_subcommand = true)]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the ingest HTTP server.
    Serve(ConfigArgs),
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Client credential administration.
    Client {
        /// Selected client subcommand.
        #[command(subcommand)]
        command: ClientCommand,
    },
    /// Idempotency ledger maintenance.
    Ledger {
        /// Selected ledger subcommand.
        #[command(subcommand)]
        command: LedgerCommand,
    },
    /// Print signed request headers for a body.
    Sign(SignCommand),
}

/// Shared `--config` argument.
#[derive(Args, Debug)]
struct ConfigArgs {
    /// Config file path (defaults to `ERP_INGEST_CONFIG` or `erp-ingest.toml`).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Configuration subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Load and validate a config file.
    Validate(ConfigArgs),
}

/// Client subcommands.
#[derive(Subcommand, Debug)]
enum ClientCommand {
    /// Create or update a client and its signing key.
    Seed(SeedCommand),
    /// Deactivate one signing key.
    RevokeKey(RevokeKeyCommand),
}

/// Arguments for `client seed`.
#[derive(Args, Debug)]
struct SeedCommand {
    #[command(flatten)]
    config: ConfigArgs,
    /// External client identifier.
    #[arg(long)]
    client_id: String,
    /// Display name.
    #[arg(long)]
    name: String,
    /// Key identifier.
    #[arg(long)]
    kid: String,
    /// Shared secret.
    #[arg(long, conflicts_with = "secret_env", required_unless_present = "secret_env")]
    secret: Option<String>,
    /// Environment variable holding the shared secret.
    #[arg(long, value_name = "NAME")]
    secret_env: Option<String>,
    /// Allowed caller CIDR; repeat for several.
    #[arg(long = "cidr", value_name = "CIDR")]
    cidrs: Vec<String>,
    /// Key expiry as unix seconds.
    #[arg(long)]
    expires_at: Option<i64>,
}

/// Arguments for `client revoke-key`.
#[derive(Args, Debug)]
struct RevokeKeyCommand {
    #[command(flatten)]
    config: ConfigArgs,
    /// External client identifier.
    #[arg(long)]
    client_id: String,
    /// Key identifier.
    #[arg(long)]
    kid: String,
}

/// Ledger subcommands.
#[derive(Subcommand, Debug)]
enum LedgerCommand {
    /// Run one reaper pass against the configured store.
    Reap(ConfigArgs),
}

/// Arguments for `sign`.
#[derive(Args, Debug)]
struct SignCommand {
    /// Shared secret.
    #[arg(long, conflicts_with = "secret_env", required_unless_present = "secret_env")]
    secret: Option<String>,
    /// Environment variable holding the shared secret.
    #[arg(long, value_name = "NAME")]
    secret_env: Option<String>,
    /// HTTP method.
    #[arg(long, default_value = "POST")]
    method: String,
    /// Request path without query.
    #[arg(long)]
    path: String,
    /// Raw query string without the leading `?`.
    #[arg(long, default_value = "")]
    query: String,
    /// External client identifier.
    #[arg(long)]
    client_id: String,
    /// Key identifier.
    #[arg(long)]
    key_id: String,
    /// Timestamp in unix seconds (defaults to now).
    #[arg(long, conflicts_with = "no_timestamp")]
    timestamp: Option<i64>,
    /// Nonce (defaults to a random UUID).
    #[arg(long, conflicts_with = "no_nonce")]
    nonce: Option<String>,
    /// Omit the timestamp for servers with timestamp checks disabled.
    #[arg(long)]
    no_timestamp: bool,
    /// Omit the nonce for servers with nonce checks disabled.
    #[arg(long)]
    no_nonce: bool,
    /// File holding the request body; empty body when omitted.
    #[arg(long, value_name = "PATH")]
    body_file: Option<PathBuf>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(args) => command_serve(args).await,
        Commands::Config {
            command: ConfigCommand::Validate(args),
        } => command_config_validate(&args),
        Commands::Client {
            command,
        } => match command {
            ClientCommand::Seed(command) => command_client_seed(&command),
            ClientCommand::RevokeKey(command) => command_client_revoke_key(&command),
        },
        Commands::Ledger {
            command: LedgerCommand::Reap(args),
        } => command_ledger_reap(&args).await,
        Commands::Sign(command) => command_sign(&command),
    }
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Executes the `serve` command.
async fn command_serve(args: ConfigArgs) -> CliResult<ExitCode> {
    init_logging()?;
    let config = load_config(args.config.as_deref())?;
    let server = tokio::task::spawn_blocking(move || IngestServer::from_config(config))
        .await
        .map_err(|err| CliError::new(format!("server init join failed: {err}")))?
        .map_err(|err| CliError::new(format!("server init failed: {err}")))?;
    server.serve().await.map_err(|err| CliError::new(format!("server failed: {err}")))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes the `config validate` command.
fn command_config_validate(args: &ConfigArgs) -> CliResult<ExitCode> {
    let _config = load_config(args.config.as_deref())?;
    write_stdout_line("config ok")?;
    Ok(ExitCode::SUCCESS)
}

/// Executes the `client seed` command.
fn command_client_seed(command: &SeedCommand) -> CliResult<ExitCode> {
    let secret = resolve_secret(command.secret.as_deref(), command.secret_env.as_deref())?;
    let cidrs = command
        .cidrs
        .iter()
        .map(String::as_str)
        .map(validate_cidr)
        .collect::<CliResult<Vec<String>>>()?;
    let store = open_sqlite_store(command.config.config.as_deref())?;
    let client = store
        .upsert_client(&command.client_id, &command.name, true)
        .map_err(|err| CliError::new(format!("client upsert failed: {err}")))?;
    store
        .upsert_key(client.internal_id, &command.kid, &secret, command.expires_at)
        .map_err(|err| CliError::new(format!("key upsert failed: {err}")))?;
    for cidr in &cidrs {
        store
            .add_ip_rule(client.internal_id, cidr)
            .map_err(|err| CliError::new(format!("ip rule insert failed: {err}")))?;
    }
    write_stdout_line(&format!(
        "seeded client {} with key {} ({} ip rules)",
        client.client_id,
        command.kid,
        cidrs.len()
    ))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes the `client revoke-key` command.
fn command_client_revoke_key(command: &RevokeKeyCommand) -> CliResult<ExitCode> {
    let store = open_sqlite_store(command.config.config.as_deref())?;
    let client = store
        .client(&command.client_id)
        .map_err(|err| CliError::new(format!("client lookup failed: {err}")))?
        .ok_or_else(|| CliError::new(format!("unknown client {}", command.client_id)))?;
    store
        .set_key_active(client.internal_id, &command.kid, false)
        .map_err(|err| CliError::new(format!("key revoke failed: {err}")))?;
    write_stdout_line(&format!("revoked key {} for client {}", command.kid, client.client_id))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes the `ledger reap` command.
async fn command_ledger_reap(args: &ConfigArgs) -> CliResult<ExitCode> {
    let config = load_config(args.config.as_deref())?;
    let store = open_store_for(&config)?;
    let ledger =
        IdempotencyLedger::new(config.ledger_policy(), Arc::new(store), Arc::new(SystemClock));
    let report =
        ledger.reap().await.map_err(|err| CliError::new(format!("reaper pass failed: {err}")))?;
    write_stdout_line(&format!(
        "reaped ledger: failed={} released={} purged={}",
        report.failed, report.released, report.purged
    ))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes the `sign` command.
fn command_sign(command: &SignCommand) -> CliResult<ExitCode> {
    let secret = resolve_secret(command.secret.as_deref(), command.secret_env.as_deref())?;
    let body = match &command.body_file {
        Some(path) => read_body_file(path)?,
        None => Vec::new(),
    };
    let timestamp = if command.no_timestamp {
        None
    } else {
        Some(command.timestamp.unwrap_or_else(unix_now))
    };
    let nonce = if command.no_nonce {
        None
    } else {
        Some(command.nonce.clone().unwrap_or_else(|| Uuid::new_v4().to_string()))
    };
    let headers = signed_headers(command, &secret, &body, timestamp, nonce.as_deref())?;
    for (name, value) in headers {
        write_stdout_line(&format!("{name}: {value}"))?;
    }
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds the authentication headers for a request.
fn signed_headers(
    command: &SignCommand,
    secret: &str,
    body: &[u8],
    timestamp: Option<i64>,
    nonce: Option<&str>,
) -> CliResult<Vec<(&'static str, String)>> {
    let method = command.method.to_ascii_uppercase();
    let timestamp = timestamp.map(|value| value.to_string());
    let signature = sign_request(
        secret.as_bytes(),
        &SigningInput {
            method: &method,
            path: &command.path,
            query: &command.query,
            client_id: &command.client_id,
            key_id: &command.key_id,
            timestamp: timestamp.as_deref().unwrap_or(""),
            nonce: nonce.unwrap_or(""),
            body,
        },
    )
    .map_err(|err| CliError::new(format!("signing failed: {err}")))?;

    let mut headers = vec![
        (display_header(HEADER_CLIENT_ID), command.client_id.clone()),
        (display_header(HEADER_KEY_ID), command.key_id.clone()),
    ];
    if let Some(timestamp) = timestamp {
        headers.push((display_header(HEADER_TIMESTAMP), timestamp));
    }
    if let Some(nonce) = nonce {
        headers.push((display_header(HEADER_NONCE), nonce.to_string()));
    }
    headers.push((display_header(HEADER_SIGNATURE), signature));
    Ok(headers)
}

/// Maps a lowercase header constant to its conventional display casing.
fn display_header(name: &'static str) -> &'static str {
    match name {
        HEADER_CLIENT_ID => "X-Client-Id",
        HEADER_KEY_ID => "X-Key-Id",
        HEADER_TIMESTAMP => "X-Timestamp",
        HEADER_NONCE => "X-Nonce",
        HEADER_SIGNATURE => "X-Signature",
        other => other,
    }
}

/// Resolves a secret from the flag or the named environment variable.
fn resolve_secret(secret: Option<&str>, secret_env: Option<&str>) -> CliResult<String> {
    let secret = match (secret, secret_env) {
        (Some(secret), _) => secret.to_string(),
        (None, Some(name)) => std::env::var(name)
            .map_err(|_| CliError::new(format!("secret variable {name} is not set")))?,
        (None, None) => return Err(CliError::new("a secret is required")),
    };
    if secret.is_empty() {
        return Err(CliError::new("secret must be non-empty"));
    }
    Ok(secret)
}

/// Normalizes a CIDR argument, rejecting malformed blocks.
fn validate_cidr(cidr: &str) -> CliResult<String> {
    let trimmed = cidr.trim();
    trimmed
        .parse::<IpNetwork>()
        .map_err(|_| CliError::new(format!("invalid cidr {trimmed}")))?;
    Ok(trimmed.to_string())
}

/// Reads a body file with a size limit.
fn read_body_file(path: &Path) -> CliResult<Vec<u8>> {
    let metadata = fs::metadata(path)
        .map_err(|err| CliError::new(format!("body file {}: {err}", path.display())))?;
    if metadata.len() > MAX_BODY_FILE_BYTES {
        return Err(CliError::new(format!("body file {} exceeds size limit", path.display())));
    }
    fs::read(path).map_err(|err| CliError::new(format!("body file {}: {err}", path.display())))
}

/// Loads and validates configuration.
fn load_config(path: Option<&Path>) -> CliResult<IngestConfig> {
    IngestConfig::load(path).map_err(|err| CliError::new(format!("config load failed: {err}")))
}

/// Opens the configured SQLite store for administration commands.
fn open_sqlite_store(path: Option<&Path>) -> CliResult<SqliteIngestStore> {
    let config = load_config(path)?;
    open_store_for(&config)
}

/// Opens the SQLite store named by `config`, rejecting the in-memory store.
fn open_store_for(config: &IngestConfig) -> CliResult<SqliteIngestStore> {
    if matches!(config.store.store_type, StoreType::Memory) {
        return Err(CliError::new("store.type must be sqlite for administration commands"));
    }
    let sqlite_config = config
        .store
        .sqlite_config()
        .ok_or_else(|| CliError::new("sqlite store requires path"))?;
    SqliteIngestStore::new(sqlite_config)
        .map_err(|err| CliError::new(format!("store open failed: {err}")))
}

/// Installs the stderr log subscriber.
fn init_logging() -> CliResult<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| CliError::new(format!("log init failed: {err}")))
}

/// Current unix time in seconds.
fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
}

/// Writes a line to stdout.
fn write_stdout_line(message: &str) -> CliResult<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
        .map_err(|err| CliError::new(format!("failed to write stdout: {err}")))
}

/// Writes a line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
