// crates/erp-ingest-server/src/sink/http.rs
// ============================================================================
// Module: HTTP Document Sink
// Description: Posts mapped documents to the ERP service layer.
// Purpose: Deliver target-shaped payloads with the caller's idempotency token.
// Dependencies: erp-ingest-core, reqwest, serde_json
// ============================================================================

//! ## Overview
//! `HttpDocumentSink` sends `POST {base_url}/{collection}` with the payload
//! as JSON. The idempotency token travels as `Idempotency-Key` so the service
//! layer can deduplicate too. Redirects are refused. The created document's
//! `DocEntry` and `DocNum` become the [`DocumentReference`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use erp_ingest_core::DocumentReference;
use erp_ingest_core::DocumentRequest;
use erp_ingest_core::DocumentSink;
use erp_ingest_core::SinkError;
use reqwest::Client;
use reqwest::redirect::Policy;
use serde_json::Value;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Header carrying the idempotency token downstream.
const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
/// Maximum characters of a downstream error kept in [`SinkError::Rejected`].
const MAX_ERROR_MESSAGE_CHARS: usize = 512;

// ============================================================================
// SECTION: Config
// ============================================================================

/// HTTP sink settings.
#[derive(Clone)]
pub struct HttpSinkConfig {
    /// Service layer base URL, without a trailing collection.
    pub base_url: String,
    /// Whole-request timeout.
    pub timeout: Duration,
    /// Optional bearer token.
    pub bearer_token: Option<String>,
}

impl std::fmt::Debug for HttpSinkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSinkConfig")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// ============================================================================
// SECTION: Sink
// ============================================================================

/// Document sink backed by the ERP service layer.
pub struct HttpDocumentSink {
    /// HTTP client.
    client: Client,
    /// Base URL without trailing slash.
    base_url: String,
    /// Optional bearer token.
    bearer_token: Option<String>,
}

impl HttpDocumentSink {
    /// Builds the sink.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Transport`] when the HTTP client cannot be built.
    pub fn new(config: HttpSinkConfig) -> Result<Self, SinkError> {
        let client = Client::builder()
            .redirect(Policy::none())
            .timeout(config.timeout)
            .build()
            .map_err(|err| SinkError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bearer_token: config.bearer_token,
        })
    }

    /// Returns the collection URL for a request.
    fn url_for(&self, request: &DocumentRequest) -> String {
        format!("{}/{}", self.base_url, request.collection)
    }
}

#[async_trait]
impl DocumentSink for HttpDocumentSink {
    async fn create_document(
        &self,
        request: &DocumentRequest,
    ) -> Result<DocumentReference, SinkError> {
        let mut builder = self.client.post(self.url_for(request)).json(&request.payload);
        if let Some(token) = &request.idempotency_token {
            builder = builder.header(IDEMPOTENCY_HEADER, token);
        }
        if let Some(token) = &self.bearer_token {
            builder = builder.bearer_auth(token);
        }
        let response =
            builder.send().await.map_err(|err| SinkError::Transport(err.to_string()))?;
        let status = response.status();
        if status.is_redirection() {
            return Err(SinkError::InvalidResponse(format!("unexpected redirect {status}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }
        let body: Value =
            response.json().await.map_err(|err| SinkError::InvalidResponse(err.to_string()))?;
        parse_reference(&body)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Reads `DocEntry` and `DocNum` from a created document.
fn parse_reference(body: &Value) -> Result<DocumentReference, SinkError> {
    let entry = body
        .get("DocEntry")
        .and_then(Value::as_i64)
        .ok_or_else(|| SinkError::InvalidResponse("response missing DocEntry".to_string()))?;
    Ok(DocumentReference {
        entry,
        number: body.get("DocNum").and_then(Value::as_i64),
    })
}

/// Extracts a bounded error summary from a downstream error body.
///
/// Understands `{"error": {"message": {"value": ".."}}}` and
/// `{"error": {"message": ".."}}`, otherwise keeps the raw text.
fn error_message(text: &str) -> String {
    let parsed = serde_json::from_str::<Value>(text).ok();
    let message = parsed
        .as_ref()
        .and_then(|value| value.pointer("/error/message"))
        .and_then(|message| message.get("value").unwrap_or(message).as_str())
        .unwrap_or(text);
    message.chars().take(MAX_ERROR_MESSAGE_CHARS).collect()
}

// ============================================================================
// SECTION: Tests
// ============================================================================
