// crates/erp-ingest-core/src/pipeline.rs
// ============================================================================
// Module: Ingest Pipeline
// Description: Authentication and idempotency wrapped around a request handler.
// Purpose: Drive the end-to-end lifecycle of one inbound request.
// Dependencies: async-trait, serde_json, tracing
// ============================================================================

//! ## Overview
//! [`Pipeline::execute`] authenticates, claims an idempotency slot for write
//! requests that carry a key, runs the inner [`RequestHandler`], and records
//! the outcome. Authentication failures and ledger conflicts never reach the
//! handler. Handler failures inside a claimed slot are finalized as terminal
//! failures so retries with the same key replay them.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::auth::AuthContext;
use crate::auth::Authenticator;
use crate::errors::PipelineError;
use crate::hashing::fingerprint;
use crate::ledger::BeginOutcome;
use crate::ledger::IdempotencyLedger;
use crate::request::HEADER_IDEMPOTENCY_KEY;
use crate::request::IngestRequest;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Handler result rendered as a response.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerOutput {
    /// HTTP status.
    pub status: u16,
    /// JSON body.
    pub body: Value,
}

/// Final pipeline response.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResponse {
    /// HTTP status.
    pub status: u16,
    /// JSON body.
    pub body: Value,
    /// True when served from the idempotency ledger.
    pub replayed: bool,
    /// Correlation identifier.
    pub correlation_id: String,
}

/// Inner business handler protected by the pipeline.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handles an authenticated request.
    async fn handle(
        &self,
        auth: &AuthContext,
        request: &IngestRequest,
    ) -> Result<HandlerOutput, PipelineError>;
}

// ============================================================================
// SECTION: Pipeline
// ============================================================================

/// Authenticated, idempotent request pipeline.
#[derive(Clone)]
pub struct Pipeline {
    /// Request authenticator.
    authenticator: Authenticator,
    /// Idempotency ledger.
    ledger: IdempotencyLedger,
    /// Protected handler.
    handler: Arc<dyn RequestHandler>,
}

impl Pipeline {
    /// Creates a pipeline.
    #[must_use]
    pub fn new(
        authenticator: Authenticator,
        ledger: IdempotencyLedger,
        handler: Arc<dyn RequestHandler>,
    ) -> Self {
        Self {
            authenticator,
            ledger,
            handler,
        }
    }

    /// Returns the idempotency ledger.
    #[must_use]
    pub const fn ledger(&self) -> &IdempotencyLedger {
        &self.ledger
    }

    /// Executes the request lifecycle.
    pub async fn execute(&self, request: IngestRequest) -> PipelineResponse {
        match self.run(&request).await {
            Ok(response) => response,
            Err(error) => {
                log_failure(&request, &error);
                let body = error.envelope(&request.correlation_id).to_value();
                respond(&request, error.http_status(), body, false)
            }
        }
    }

    /// Runs authentication, the ledger, and the handler.
    async fn run(&self, request: &IngestRequest) -> Result<PipelineResponse, PipelineError> {
        let auth = self.authenticator.authenticate(request).await?;

        let key = if request.is_write() {
            request.headers.get_non_empty(HEADER_IDEMPOTENCY_KEY)
        } else {
            None
        };
        let policy = self.ledger.policy();
        if request.is_write() && key.is_none() && policy.enabled && policy.required {
            return Err(PipelineError::MissingIdempotencyKey);
        }

        let record_id = match key {
            Some(key) => {
                let digest =
                    fingerprint(&request.method, &request.path, &request.query, &request.body);
                match self.ledger.begin(&auth.client_id, key, &digest).await? {
                    BeginOutcome::Bypassed => None,
                    BeginOutcome::Claimed(record_id) => Some(record_id),
                    BeginOutcome::Cached {
                        http_status,
                        body,
                    } => {
                        tracing::info!(
                            correlation_id = %request.correlation_id,
                            client_id = %auth.client_id,
                            http_status,
                            "idempotent replay"
                        );
                        return Ok(respond(request, http_status, body, true));
                    }
                }
            }
            None => None,
        };

        let (status, body) = match self.handler.handle(&auth, request).await {
            Ok(output) => (output.status, output.body),
            Err(error) => {
                log_failure(request, &error);
                (error.http_status(), error.envelope(&request.correlation_id).to_value())
            }
        };

        if let Some(record_id) = record_id
            && let Err(err) = self.ledger.finalize(record_id, status, &body).await
        {
            tracing::error!(
                correlation_id = %request.correlation_id,
                record_id = record_id.get(),
                error = %err,
                "failed to finalize idempotency record"
            );
        }

        Ok(respond(request, status, body, false))
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds a response for the request.
fn respond(request: &IngestRequest, status: u16, body: Value, replayed: bool) -> PipelineResponse {
    PipelineResponse {
        status,
        body,
        replayed,
        correlation_id: request.correlation_id.clone(),
    }
}

/// Logs a request failure with internal detail.
fn log_failure(request: &IngestRequest, error: &PipelineError) {
    if error.http_status() >= 500 {
        tracing::error!(
            correlation_id = %request.correlation_id,
            path = %request.path,
            code = error.code(),
            error = %error,
            "request failed"
        );
    } else {
        tracing::warn!(
            correlation_id = %request.correlation_id,
            path = %request.path,
            code = error.code(),
            error = %error,
            "request rejected"
        );
    }
}
