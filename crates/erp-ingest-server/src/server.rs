// crates/erp-ingest-server/src/server.rs
// ============================================================================
// Module: Ingest Server
// Description: axum HTTP server for the document ingestion routes.
// Purpose: Buffer requests, run the pipeline, and render its responses.
// Dependencies: axum, erp-ingest-config, erp-ingest-core, tokio, uuid
// ============================================================================

//! ## Overview
//! [`IngestServer`] assembles the pipeline from configuration: backing
//! stores, audit sink, document sink, transformer registry, and the ledger
//! reaper. Each request body is buffered once under the configured limit and
//! handed to [`Pipeline::execute`]. Every response carries `X-Request-Id`,
//! and ledger replays add `Idempotent-Replayed: true`.
//! Security posture: request headers and bodies are untrusted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::HeaderName;
use axum::http::HeaderValue;
use axum::http::Method;
use axum::http::StatusCode;
use axum::http::Uri;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use erp_ingest_config::IngestConfig;
use erp_ingest_config::ServerConfig;
use erp_ingest_config::SinkConfig;
use erp_ingest_config::SinkType;
use erp_ingest_config::StoreConfig;
use erp_ingest_config::StoreType;
use erp_ingest_core::AuthAuditSink;
use erp_ingest_core::Authenticator;
use erp_ingest_core::CredentialStore;
use erp_ingest_core::DocumentIngestHandler;
use erp_ingest_core::DocumentSink;
use erp_ingest_core::ErrorEnvelope;
use erp_ingest_core::IdempotencyLedger;
use erp_ingest_core::IdempotencyStore;
use erp_ingest_core::InMemoryIngestStore;
use erp_ingest_core::IngestRequest;
use erp_ingest_core::Pipeline;
use erp_ingest_core::PipelineError;
use erp_ingest_core::PipelineResponse;
use erp_ingest_core::ReplayGuard;
use erp_ingest_core::RequestHeaders;
use erp_ingest_core::SystemClock;
use erp_ingest_core::TransformerRegistry;
use erp_ingest_core::documents::BUSINESS_PARTNER_RESOURCE;
use erp_ingest_core::documents::INVOICE_RESOURCE;
use erp_ingest_core::request::HEADER_FORWARDED_FOR;
use erp_ingest_core::request::HEADER_IDEMPOTENT_REPLAYED;
use erp_ingest_core::request::HEADER_REQUEST_ID;
use erp_ingest_core::resolve_client_ip;
use erp_ingest_store_sqlite::SqliteIngestStore;
use http_body_util::LengthLimitError;
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpListener;
use uuid::Uuid;

use crate::audit::FileAuditSink;
use crate::audit::TracingAuditSink;
use crate::reaper::spawn_reaper;
use crate::sink::HttpDocumentSink;
use crate::sink::HttpSinkConfig;
use crate::sink::LogDocumentSink;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Invoice ingestion route.
pub const INVOICES_ROUTE: &str = "/api/v1/invoices";
/// Business partner ingestion route.
pub const BUSINESS_PARTNERS_ROUTE: &str = "/api/v1/business-partners";
/// Health route.
pub const HEALTH_ROUTE: &str = "/healthz";
/// Longest caller-supplied request id echoed back.
const MAX_REQUEST_ID_BYTES: usize = 128;

// ============================================================================
// SECTION: Store Handles
// ============================================================================

/// Backing store handles used by the pipeline.
#[derive(Clone)]
pub struct StoreHandles {
    /// Credential lookups.
    pub credentials: Arc<dyn CredentialStore>,
    /// Nonce registration.
    pub replay_guard: Arc<dyn ReplayGuard>,
    /// Idempotency ledger persistence.
    pub idempotency: Arc<dyn IdempotencyStore>,
}

impl StoreHandles {
    /// Shares one store implementing every store trait.
    #[must_use]
    pub fn from_store<S>(store: S) -> Self
    where
        S: CredentialStore + ReplayGuard + IdempotencyStore + 'static,
    {
        let store = Arc::new(store);
        Self {
            credentials: store.clone(),
            replay_guard: store.clone(),
            idempotency: store,
        }
    }
}

// ============================================================================
// SECTION: Server
// ============================================================================

/// HTTP ingestion server.
pub struct IngestServer {
    /// Validated configuration.
    config: IngestConfig,
    /// Request pipeline.
    pipeline: Pipeline,
}

impl IngestServer {
    /// Builds the server and its collaborators from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when configuration is invalid or a store,
    /// sink, or audit log cannot be opened.
    pub fn from_config(config: IngestConfig) -> Result<Self, ServerError> {
        config.validate().map_err(|err| ServerError::Config(err.to_string()))?;
        let stores = build_stores(&config.store)?;
        let audit = build_audit_sink(&config.server)?;
        let sink = build_document_sink(&config.sink)?;
        Ok(Self::from_parts(config, stores, sink, audit))
    }

    /// Builds the server from explicit collaborators.
    #[must_use]
    pub fn from_parts(
        config: IngestConfig,
        stores: StoreHandles,
        sink: Arc<dyn DocumentSink>,
        audit: Arc<dyn AuthAuditSink>,
    ) -> Self {
        if !config.security.enable_hmac {
            tracing::warn!("hmac authentication disabled; every ingest request will be rejected");
        }
        let clock = Arc::new(SystemClock);
        let authenticator = Authenticator::new(
            config.auth_policy(),
            stores.credentials,
            stores.replay_guard,
            clock.clone(),
            audit,
        );
        let ledger = IdempotencyLedger::new(config.ledger_policy(), stores.idempotency, clock);
        let registry = Arc::new(TransformerRegistry::with_defaults());
        let handler = Arc::new(DocumentIngestHandler::new(registry, sink));
        let pipeline = Pipeline::new(authenticator, ledger, handler);
        Self {
            config,
            pipeline,
        }
    }

    /// Returns the server configuration.
    #[must_use]
    pub const fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Builds the axum router. Serve it with connect info enabled.
    #[must_use]
    pub fn router(&self) -> Router {
        let state = Arc::new(ServerState {
            pipeline: self.pipeline.clone(),
            max_body_bytes: self.config.server.max_body_bytes,
            trust_proxy_headers: self.config.server.trust_proxy_headers,
        });
        Router::new()
            .route(HEALTH_ROUTE, get(handle_health))
            .route(INVOICES_ROUTE, post(handle_invoice))
            .route(BUSINESS_PARTNERS_ROUTE, post(handle_business_partner))
            .fallback(handle_not_found)
            .with_state(state)
    }

    /// Binds the configured address and serves until the server fails.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when binding or serving fails.
    pub async fn serve(self) -> Result<(), ServerError> {
        let addr =
            self.config.server.bind_addr().map_err(|err| ServerError::Config(err.to_string()))?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|_| ServerError::Transport("http bind failed".to_string()))?;
        self.serve_on(listener).await
    }

    /// Serves on an already bound listener.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Transport`] when serving fails.
    pub async fn serve_on(self, listener: TcpListener) -> Result<(), ServerError> {
        let reaper = self.config.idempotency.enabled.then(|| {
            spawn_reaper(
                self.pipeline.ledger().clone(),
                Duration::from_secs(self.config.idempotency.reaper_interval_seconds),
            )
        });
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(addr = %addr, "erp ingest server listening");
        }
        let app = self.router();
        let result =
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .map_err(|_| ServerError::Transport("http server failed".to_string()));
        if let Some(handle) = reaper {
            handle.abort();
        }
        result
    }
}

/// Builds the backing stores from configuration.
fn build_stores(config: &StoreConfig) -> Result<StoreHandles, ServerError> {
    match config.store_type {
        StoreType::Memory => {
            tracing::warn!("using in-memory store; credentials and ledger are lost on restart");
            Ok(StoreHandles::from_store(InMemoryIngestStore::new()))
        }
        StoreType::Sqlite => {
            let sqlite_config = config.sqlite_config().ok_or_else(|| {
                ServerError::Config("sqlite store requires path".to_string())
            })?;
            let store = SqliteIngestStore::new(sqlite_config)
                .map_err(|err| ServerError::Init(err.to_string()))?;
            Ok(StoreHandles::from_store(store))
        }
    }
}

/// Builds the audit sink from configuration.
fn build_audit_sink(config: &ServerConfig) -> Result<Arc<dyn AuthAuditSink>, ServerError> {
    match &config.audit_log_path {
        Some(path) => {
            let sink = FileAuditSink::new(path)
                .map_err(|err| ServerError::Init(format!("audit log: {err}")))?;
            Ok(Arc::new(sink))
        }
        None => Ok(Arc::new(TracingAuditSink)),
    }
}

/// Builds the document sink from configuration.
fn build_document_sink(config: &SinkConfig) -> Result<Arc<dyn DocumentSink>, ServerError> {
    match config.sink_type {
        SinkType::Log => Ok(Arc::new(LogDocumentSink::new())),
        SinkType::Http => {
            let base_url = config
                .base_url
                .clone()
                .ok_or_else(|| ServerError::Config("http sink requires base_url".to_string()))?;
            let bearer_token = match &config.api_key_env {
                Some(name) => Some(std::env::var(name).map_err(|_| {
                    ServerError::Config(format!("sink token variable {name} is not set"))
                })?),
                None => None,
            };
            let sink = HttpDocumentSink::new(HttpSinkConfig {
                base_url,
                timeout: Duration::from_millis(config.timeout_ms),
                bearer_token,
            })
            .map_err(|err| ServerError::Init(err.to_string()))?;
            Ok(Arc::new(sink))
        }
    }
}

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// Shared server state for handlers.
struct ServerState {
    /// Request pipeline.
    pipeline: Pipeline,
    /// Maximum buffered body size.
    max_body_bytes: usize,
    /// Trust `X-Forwarded-For` for the caller IP.
    trust_proxy_headers: bool,
}

/// Handles `GET /healthz`.
async fn handle_health(headers: HeaderMap) -> Response {
    render(PipelineResponse {
        status: StatusCode::OK.as_u16(),
        body: json!({"status": "ok"}),
        replayed: false,
        correlation_id: correlation_id(&headers),
    })
}

/// Handles invoice ingestion.
async fn handle_invoice(
    State(state): State<Arc<ServerState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    ingest(&state, INVOICE_RESOURCE, peer, &method, &uri, &headers, body).await
}

/// Handles business partner ingestion.
async fn handle_business_partner(
    State(state): State<Arc<ServerState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    ingest(&state, BUSINESS_PARTNER_RESOURCE, peer, &method, &uri, &headers, body).await
}

/// Renders unknown routes as an error envelope.
async fn handle_not_found(headers: HeaderMap) -> Response {
    let correlation_id = correlation_id(&headers);
    let body = ErrorEnvelope::new("NOT_FOUND", "route not found", Some(correlation_id.clone()));
    render(PipelineResponse {
        status: StatusCode::NOT_FOUND.as_u16(),
        body: body.to_value(),
        replayed: false,
        correlation_id,
    })
}

/// Buffers the request, runs the pipeline, and renders the response.
async fn ingest(
    state: &ServerState,
    resource: &str,
    peer: SocketAddr,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Body,
) -> Response {
    let started = Instant::now();
    let correlation_id = correlation_id(headers);
    let response = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => {
            let forwarded_for =
                headers.get(HEADER_FORWARDED_FOR).and_then(|value| value.to_str().ok());
            let request = IngestRequest {
                method: method.as_str().to_ascii_uppercase(),
                path: uri.path().to_string(),
                query: uri.query().unwrap_or_default().to_string(),
                resource: resource.to_string(),
                headers: request_headers(headers),
                client_ip: resolve_client_ip(
                    Some(peer.ip()),
                    forwarded_for,
                    state.trust_proxy_headers,
                ),
                body: bytes,
                correlation_id,
            };
            state.pipeline.execute(request).await
        }
        Err(err) => {
            let error = body_read_error(err, state.max_body_bytes);
            PipelineResponse {
                status: error.http_status(),
                body: error.envelope(&correlation_id).to_value(),
                replayed: false,
                correlation_id,
            }
        }
    };
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    tracing::info!(
        method = %method,
        path = %uri.path(),
        resource,
        status = response.status,
        replayed = response.replayed,
        correlation_id = %response.correlation_id,
        elapsed_ms,
        "ingest request handled"
    );
    render(response)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the caller's request id or a fresh UUID v4.
fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(HEADER_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= MAX_REQUEST_ID_BYTES)
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_string)
}

/// Maps a failed body read to 413 for the size limit and 400 otherwise.
fn body_read_error(error: axum::Error, max_body_bytes: usize) -> PipelineError {
    let inner = error.into_inner();
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(inner.as_ref());
    while let Some(err) = current {
        if err.is::<LengthLimitError>() {
            return PipelineError::PayloadTooLarge(format!(
                "request body exceeds {max_body_bytes} bytes"
            ));
        }
        current = err.source();
    }
    PipelineError::BadRequest(format!("failed to read request body: {inner}"))
}

/// Copies UTF-8 header values into pipeline headers.
fn request_headers(headers: &HeaderMap) -> RequestHeaders {
    let mut converted = RequestHeaders::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            converted.insert(name.as_str(), value);
        }
    }
    converted
}

/// Renders a pipeline response with correlation and replay headers.
fn render(response: PipelineResponse) -> Response {
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut http = (status, Json(response.body)).into_response();
    let headers = http.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&response.correlation_id) {
        headers.insert(HeaderName::from_static(HEADER_REQUEST_ID), value);
    }
    if response.replayed {
        headers.insert(
            HeaderName::from_static(HEADER_IDEMPOTENT_REPLAYED),
            HeaderValue::from_static("true"),
        );
    }
    http
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Ingest server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),
    /// Initialization errors.
    #[error("init error: {0}")]
    Init(String),
    /// Transport errors.
    #[error("transport error: {0}")]
    Transport(String),
}

// ============================================================================
// SECTION: Tests
// ============================================================================
