// crates/erp-ingest-core/src/ingest.rs
// ============================================================================
// Module: Document Ingest Handler
// Description: Business handler mapping documents and posting them downstream.
// Purpose: Run client -> canonical -> target mapping and call the document sink.
// Dependencies: async-trait, serde_json, tracing
// ============================================================================

//! ## Overview
//! [`DocumentIngestHandler`] parses the authenticated body, picks the
//! transformer for the route resource and the `X-Mapping-Profile` header
//! (default `default`), maps the document in two stages, and hands the
//! target payload to the [`DocumentSink`]. The idempotency key, when present,
//! is forwarded as the downstream idempotency token.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use serde_json::json;

use crate::auth::AuthContext;
use crate::documents::DEFAULT_PROFILE;
use crate::documents::TransformerRegistry;
use crate::errors::PipelineError;
use crate::interfaces::DocumentRequest;
use crate::interfaces::DocumentSink;
use crate::mapping::MappingContext;
use crate::mapping::map_document;
use crate::pipeline::HandlerOutput;
use crate::pipeline::RequestHandler;
use crate::request::HEADER_IDEMPOTENCY_KEY;
use crate::request::HEADER_MAPPING_PROFILE;
use crate::request::IngestRequest;

// ============================================================================
// SECTION: Handler
// ============================================================================

/// Maps inbound documents and posts them to the document sink.
#[derive(Clone)]
pub struct DocumentIngestHandler {
    /// Transformer registry.
    registry: Arc<TransformerRegistry>,
    /// Downstream document sink.
    sink: Arc<dyn DocumentSink>,
}

impl DocumentIngestHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(registry: Arc<TransformerRegistry>, sink: Arc<dyn DocumentSink>) -> Self {
        Self {
            registry,
            sink,
        }
    }

    /// Maps a client document to the target shape for (resource, profile).
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Validation`] for unknown transformers or
    /// invalid documents.
    pub fn map_to_target(
        &self,
        resource: &str,
        profile: &str,
        document: &Value,
    ) -> Result<(String, Value), PipelineError> {
        let transformer = self
            .registry
            .get(resource, profile)
            .map_err(|err| PipelineError::Validation(err.to_string()))?;
        let ctx = MappingContext::new(resource, profile);
        let canonical = map_document(document, &transformer.to_canonical, &ctx)?;
        let target = map_document(&canonical, &transformer.to_target, &ctx)?;
        Ok((transformer.collection.clone(), target))
    }
}

#[async_trait]
impl RequestHandler for DocumentIngestHandler {
    async fn handle(
        &self,
        auth: &AuthContext,
        request: &IngestRequest,
    ) -> Result<HandlerOutput, PipelineError> {
        let document: Value = serde_json::from_slice(&auth.body).map_err(|_| {
            PipelineError::Validation("request body must be valid json".to_string())
        })?;
        if !document.is_object() {
            return Err(PipelineError::Validation(
                "request body must be a json object".to_string(),
            ));
        }
        let profile =
            request.headers.get_non_empty(HEADER_MAPPING_PROFILE).unwrap_or(DEFAULT_PROFILE);
        let (collection, payload) = self.map_to_target(&request.resource, profile, &document)?;

        let sink_request = DocumentRequest {
            resource: request.resource.clone(),
            collection,
            payload,
            idempotency_token: request
                .headers
                .get_non_empty(HEADER_IDEMPOTENCY_KEY)
                .map(str::to_string),
        };
        let reference = self.sink.create_document(&sink_request).await.map_err(|err| {
            tracing::error!(
                correlation_id = %request.correlation_id,
                client_id = %auth.client_id,
                resource = %request.resource,
                error = %err,
                "document sink failed"
            );
            PipelineError::from(err)
        })?;
        tracing::info!(
            correlation_id = %request.correlation_id,
            client_id = %auth.client_id,
            resource = %request.resource,
            entry = reference.entry,
            "document posted"
        );

        Ok(HandlerOutput {
            status: 201,
            body: json!({
                "resource": request.resource,
                "status": "posted",
                "document": reference,
            }),
        })
    }
}
