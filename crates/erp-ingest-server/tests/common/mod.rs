// crates/erp-ingest-server/tests/common/mod.rs
// ============================================================================
// Module: Server Test Helpers
// Description: Shared fixtures for HTTP ingestion tests.
// Purpose: Seed a SQLite store, spawn the server, and sign requests.
// Dependencies: erp-ingest-server, erp-ingest-store-sqlite, reqwest, tempfile
// ============================================================================

#![allow(dead_code, reason = "Shared test helpers may be unused in some suites.")]
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test fixtures favor direct unwraps for setup clarity."
)]

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use erp_ingest_config::IngestConfig;
use erp_ingest_core::SigningInput;
use erp_ingest_core::sign_request;
use erp_ingest_server::IngestServer;
use erp_ingest_store_sqlite::SqliteIngestStore;
use erp_ingest_store_sqlite::SqliteStoreConfig;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const CLIENT_ID: &str = "acme";
pub const KEY_ID: &str = "k1";
pub const SECRET: &str = "s3cret-shared-key";
pub const INVOICE_PATH: &str = "/api/v1/invoices";
pub const BUSINESS_PARTNERS_PATH: &str = "/api/v1/business-partners";

/// Running server bound to an ephemeral port.
pub struct TestServer {
    pub base_url: String,
    pub temp: TempDir,
    handle: JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Renders a SQLite-backed config rooted in `temp`.
pub fn sqlite_config(temp: &TempDir, extra: &str) -> IngestConfig {
    let db_path = temp.path().join("ingest.db");
    let text = format!(
        "[store]\ntype = \"sqlite\"\npath = \"{}\"\n\n{extra}",
        db_path.display().to_string().replace('\\', "/")
    );
    toml::from_str(&text).unwrap()
}

/// Seeds client `acme` with key `k1` into the configured SQLite store.
pub fn seed(config: &IngestConfig) {
    let store = SqliteIngestStore::new(config.store.sqlite_config().unwrap()).unwrap();
    let client = store.upsert_client(CLIENT_ID, "Acme Corp", true).unwrap();
    store.upsert_key(client.internal_id, KEY_ID, SECRET, None).unwrap();
}

/// Seeds and spawns a server with the provided extra TOML.
pub async fn spawn_server(extra: &str) -> TestServer {
    let temp = TempDir::new().unwrap();
    let config = sqlite_config(&temp, extra);
    seed(&config);
    let server = IngestServer::from_config(config).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let _ = server.serve_on(listener).await;
    });
    TestServer {
        base_url: format!("http://{addr}"),
        temp,
        handle,
    }
}

/// Opens the server's SQLite store for inspection.
pub fn open_store(server: &TestServer) -> SqliteIngestStore {
    SqliteIngestStore::new(SqliteStoreConfig::new(server.temp.path().join("ingest.db"))).unwrap()
}

/// Current unix time in seconds.
pub fn now() -> i64 {
    let elapsed = SystemTime::now().duration_since(UNIX_EPOCH).unwrap();
    i64::try_from(elapsed.as_secs()).unwrap()
}

/// Builds a signed POST to `path` with the given nonce.
pub fn signed_post(
    client: &reqwest::Client,
    server: &TestServer,
    path: &str,
    body: &[u8],
    nonce: &str,
) -> reqwest::RequestBuilder {
    let timestamp = now().to_string();
    let signature = sign_request(
        SECRET.as_bytes(),
        &SigningInput {
            method: "POST",
            path,
            query: "",
            client_id: CLIENT_ID,
            key_id: KEY_ID,
            timestamp: &timestamp,
            nonce,
            body,
        },
    )
    .unwrap();
    client
        .post(format!("{}{path}", server.base_url))
        .header("Content-Type", "application/json")
        .header("X-Client-Id", CLIENT_ID)
        .header("X-Key-Id", KEY_ID)
        .header("X-Timestamp", timestamp)
        .header("X-Nonce", nonce)
        .header("X-Signature", signature)
        .body(body.to_vec())
}
