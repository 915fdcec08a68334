//! HTTP trigger.
//!
//! Transport-agnostic: the embedding server converts its request into an
//! [`HttpRequest`] and writes the returned [`HttpResponse`] back.

use crate::messaging::MessageEnvelope;
use crate::pipeline::{ExecutionOutcome, PipelineRouter, DEFAULT_PIPELINE_ID};
use std::collections::HashMap;
use tracing::{debug, error};

/// Header carrying the correlation id in both directions.
pub const CORRELATION_HEADER: &str = "X-Correlation-ID";

/// An inbound HTTP request.
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    /// Request body.
    pub body: Vec<u8>,
    /// `Content-Type` header value.
    pub content_type: String,
    /// Request headers; names compare case-insensitively.
    pub headers: HashMap<String, String>,
    /// Query parameters.
    pub query_params: HashMap<String, String>,
}

impl HttpRequest {
    /// Creates a request with `body` and `content_type`.
    #[must_use]
    pub fn new(body: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            content_type: content_type.into(),
            ..Self::default()
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The response to write back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// `Content-Type` header value, when there is a body.
    pub content_type: Option<String>,
    /// Response body.
    pub body: Vec<u8>,
    /// Correlation id of the processed message.
    pub correlation_id: String,
}

impl HttpResponse {
    fn error(status: u16, message: impl Into<String>, correlation_id: &str) -> Self {
        Self {
            status,
            content_type: Some(crate::messaging::CONTENT_TYPE_TEXT.to_string()),
            body: message.into().into_bytes(),
            correlation_id: correlation_id.to_string(),
        }
    }
}

/// Runs each request through the default pipeline.
#[derive(Debug, Clone)]
pub struct HttpTrigger {
    router: PipelineRouter,
}

impl HttpTrigger {
    /// Status returned when no default pipeline is registered.
    pub const NO_PIPELINE: u16 = 503;
    /// Status returned when the request body cannot be decoded.
    pub const DECODE_FAILURE: u16 = 500;

    /// Creates a trigger over `router`.
    #[must_use]
    pub const fn new(router: PipelineRouter) -> Self {
        Self { router }
    }

    /// Processes one request.
    pub async fn handle(&self, request: HttpRequest) -> HttpResponse {
        let mut envelope = MessageEnvelope::new(request.body.clone(), request.content_type.clone())
            .with_query_params(request.query_params.clone());
        if let Some(id) = request.header(CORRELATION_HEADER).filter(|v| !v.is_empty()) {
            envelope = envelope.with_correlation_id(id);
        }
        let correlation_id = envelope.correlation_id.clone();

        if self
            .router
            .registry()
            .get_pipeline_by_id(DEFAULT_PIPELINE_ID)
            .is_none()
        {
            error!(
                correlation_id = %correlation_id,
                "no default pipeline registered for HTTP trigger"
            );
            return HttpResponse::error(
                Self::NO_PIPELINE,
                "no default pipeline is registered",
                &correlation_id,
            );
        }

        let routed = match self.router.route_to(&envelope, DEFAULT_PIPELINE_ID, None).await {
            Ok(routed) => routed,
            Err(e) => {
                return HttpResponse::error(Self::DECODE_FAILURE, e.to_string(), &correlation_id)
            }
        };

        match &routed.outcome {
            ExecutionOutcome::Completed(_) | ExecutionOutcome::Halted { .. } => {
                let ctx = &routed.context;
                let (body, content_type) = ctx.response_data().map_or_else(
                    || (Vec::new(), None),
                    |data| {
                        (
                            data.to_vec(),
                            ctx.response_content_type().map(str::to_string),
                        )
                    },
                );
                debug!(
                    correlation_id = %correlation_id,
                    bytes = body.len(),
                    "HTTP trigger responding"
                );
                HttpResponse {
                    status: 200,
                    content_type,
                    body,
                    correlation_id,
                }
            }
            outcome => {
                let (status, message) = outcome.error().map_or_else(
                    || (500, "pipeline failed".to_string()),
                    |e| (e.status_code, e.to_string()),
                );
                HttpResponse::error(status, message, &correlation_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationToken;
    use crate::context::FunctionContext;
    use crate::core::FunctionOutput;
    use crate::functions::{AppFunction, FnFunction};
    use crate::pipeline::{PipelineEngine, PipelineRegistry, TargetType};
    use crate::testing::FailingFunction;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn trigger(functions: Option<Vec<Arc<dyn AppFunction>>>, engine: PipelineEngine) -> HttpTrigger {
        let registry = Arc::new(PipelineRegistry::new());
        if let Some(functions) = functions {
            registry.set_default_functions_pipeline(functions);
        }
        HttpTrigger::new(PipelineRouter::new(registry, engine).with_target_type(TargetType::Json))
    }

    #[tokio::test]
    async fn test_success_returns_response_data() {
        let echo = FnFunction::new("echo", |ctx: &mut FunctionContext, data| {
            ctx.set_response_data(b"{\"ok\":true}".to_vec());
            ctx.set_response_content_type("application/json");
            FunctionOutput::proceed_with(data)
        });
        let response = trigger(Some(vec![Arc::new(echo)]), PipelineEngine::new())
            .handle(
                HttpRequest::new(&b"{\"a\":1}"[..], "application/json")
                    .with_header("x-correlation-id", "c-42"),
            )
            .await;

        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"{\"ok\":true}");
        assert_eq!(response.content_type.as_deref(), Some("application/json"));
        assert_eq!(response.correlation_id, "c-42");
    }

    #[tokio::test]
    async fn test_no_default_pipeline() {
        let response = trigger(None, PipelineEngine::new())
            .handle(HttpRequest::new(&b"{}"[..], "application/json"))
            .await;
        assert_eq!(response.status, HttpTrigger::NO_PIPELINE);
    }

    #[tokio::test]
    async fn test_decode_failure() {
        let response = trigger(Some(vec![]), PipelineEngine::new())
            .handle(HttpRequest::new(&b"not json"[..], "application/json"))
            .await;
        assert_eq!(response.status, HttpTrigger::DECODE_FAILURE);
    }

    #[tokio::test]
    async fn test_function_failure_is_server_error() {
        let response = trigger(
            Some(vec![Arc::new(FailingFunction::new("export"))]),
            PipelineEngine::new(),
        )
        .handle(HttpRequest::new(&b"{}"[..], "application/json"))
        .await;
        assert_eq!(response.status, 500);
        assert!(String::from_utf8_lossy(&response.body).contains("export"));
    }

    #[tokio::test]
    async fn test_shutdown_is_unavailable() {
        let token = Arc::new(CancellationToken::new());
        token.cancel("stopping");
        let response = trigger(
            Some(vec![Arc::new(FailingFunction::new("export"))]),
            PipelineEngine::new().with_cancellation(token),
        )
        .handle(HttpRequest::new(&b"{}"[..], "application/json"))
        .await;
        assert_eq!(response.status, 503);
    }
}
