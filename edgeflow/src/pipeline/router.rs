//! Topic routing and concurrent dispatch of inbound messages.

use super::{ExecutionOutcome, FunctionPipeline, PipelineEngine, PipelineRegistry, TopicMatcher};
use crate::context::{
    FunctionContext, DEVICE_NAME_KEY, PIPELINE_ID_KEY, PROFILE_NAME_KEY, RECEIVED_TOPIC_KEY,
    SOURCE_NAME_KEY,
};
use crate::core::{AddEventRequest, Event, PipelineData};
use crate::errors::{EdgeflowError, Result};
use crate::messaging::{MessageClient, MessageEnvelope};
use crate::observability::ServiceMetrics;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// How inbound payloads are decoded before entering a pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    /// An `AddEventRequest` or bare `Event`, JSON encoded.
    #[default]
    Event,
    /// The payload bytes, untouched.
    Raw,
    /// Any JSON document.
    Json,
}

/// Side effect run after a pipeline completes successfully.
///
/// Triggers use this to publish or return the context's response data.
#[async_trait]
pub trait OutputHandler: Send + Sync + Debug {
    /// Handles the outcome of a successful execution.
    async fn handle(&self, ctx: &FunctionContext, pipeline: &FunctionPipeline) -> Result<()>;
}

/// Result of one pipeline's execution for a routed message.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// The pipeline that ran.
    pub pipeline_id: String,
    /// How the execution ended.
    pub outcome: ExecutionOutcome,
    /// The context after execution.
    pub context: FunctionContext,
}

/// Matches inbound messages to pipelines and runs them.
///
/// Each matched pipeline runs on its own task with its own clone of the
/// message context. Messages are never serialized against each other.
#[derive(Debug, Clone)]
pub struct PipelineRouter {
    registry: Arc<PipelineRegistry>,
    matcher: TopicMatcher,
    engine: PipelineEngine,
    target_type: TargetType,
    metrics: Arc<ServiceMetrics>,
    message_client: Option<Arc<dyn MessageClient>>,
    publish_topic: Option<String>,
}

impl PipelineRouter {
    /// Creates a router over `registry`.
    #[must_use]
    pub fn new(registry: Arc<PipelineRegistry>, engine: PipelineEngine) -> Self {
        Self {
            registry,
            matcher: TopicMatcher::default(),
            engine,
            target_type: TargetType::default(),
            metrics: Arc::new(ServiceMetrics::default()),
            message_client: None,
            publish_topic: None,
        }
    }

    /// Sets the topic syntax.
    #[must_use]
    pub fn with_matcher(mut self, matcher: TopicMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    /// Sets how payloads are decoded.
    #[must_use]
    pub const fn with_target_type(mut self, target_type: TargetType) -> Self {
        self.target_type = target_type;
        self
    }

    /// Shares service metrics with the caller.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<ServiceMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Message client handed to every context for publishing.
    #[must_use]
    pub fn with_message_client(mut self, client: Arc<dyn MessageClient>) -> Self {
        self.message_client = Some(client);
        self
    }

    /// Publish topic handed to every context.
    #[must_use]
    pub fn with_publish_topic(mut self, topic: impl Into<String>) -> Self {
        self.publish_topic = Some(topic.into());
        self
    }

    /// Returns the registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<PipelineRegistry> {
        &self.registry
    }

    /// Returns the engine.
    #[must_use]
    pub const fn engine(&self) -> &PipelineEngine {
        &self.engine
    }

    /// Returns the service metrics.
    #[must_use]
    pub const fn metrics(&self) -> &Arc<ServiceMetrics> {
        &self.metrics
    }

    /// Routes `envelope` to every pipeline matching its topic.
    ///
    /// Pipelines run concurrently; outcomes are returned in registration
    /// order. An unmatched message yields no outcomes.
    ///
    /// # Errors
    ///
    /// Returns [`EdgeflowError::Contract`] if the payload cannot be decoded
    /// as the configured target type.
    pub async fn route(
        &self,
        envelope: &MessageEnvelope,
        handler: Option<Arc<dyn OutputHandler>>,
    ) -> Result<Vec<PipelineOutcome>> {
        let pipelines = self.registry.matching(&envelope.received_topic, &self.matcher);
        if pipelines.is_empty() {
            warn!(
                topic = %envelope.received_topic,
                correlation_id = %envelope.correlation_id,
                "no pipelines match the message topic; message dropped"
            );
            return Ok(Vec::new());
        }
        self.dispatch(envelope, pipelines, handler).await
    }

    /// Runs `envelope` through the pipeline registered as `pipeline_id`,
    /// regardless of topic.
    ///
    /// # Errors
    ///
    /// Returns [`EdgeflowError::NotFound`] if no such pipeline exists, or a
    /// contract error if decoding fails.
    pub async fn route_to(
        &self,
        envelope: &MessageEnvelope,
        pipeline_id: &str,
        handler: Option<Arc<dyn OutputHandler>>,
    ) -> Result<PipelineOutcome> {
        let pipeline = self.registry.get_pipeline_by_id(pipeline_id).ok_or_else(|| {
            EdgeflowError::NotFound(format!("pipeline '{pipeline_id}' is not registered"))
        })?;
        self.dispatch(envelope, vec![pipeline], handler)
            .await?
            .pop()
            .ok_or_else(|| EdgeflowError::NotFound(format!("pipeline '{pipeline_id}' did not run")))
    }

    async fn dispatch(
        &self,
        envelope: &MessageEnvelope,
        pipelines: Vec<Arc<FunctionPipeline>>,
        handler: Option<Arc<dyn OutputHandler>>,
    ) -> Result<Vec<PipelineOutcome>> {
        self.metrics.messages_received.inc();
        let mut base = self.new_context(envelope);
        let data = match self.decode(envelope) {
            Ok(data) => data,
            Err(e) => {
                self.metrics.invalid_messages_received.inc();
                error!(
                    topic = %envelope.received_topic,
                    correlation_id = base.correlation_id(),
                    error = %e,
                    "unable to decode inbound message"
                );
                return Err(e);
            }
        };
        if let PipelineData::Event(event) = &data {
            base.add_value(DEVICE_NAME_KEY, &event.device_name);
            base.add_value(PROFILE_NAME_KEY, &event.profile_name);
            base.add_value(SOURCE_NAME_KEY, &event.source_name);
        }

        let tasks: Vec<_> = pipelines
            .into_iter()
            .map(|pipeline| {
                let mut ctx = base.clone();
                ctx.add_value(PIPELINE_ID_KEY, pipeline.id());
                let engine = self.engine.clone();
                let handler = handler.clone();
                let data = data.clone();
                tokio::spawn(async move {
                    debug!(
                        pipeline_id = pipeline.id(),
                        correlation_id = ctx.correlation_id(),
                        functions = pipeline.len(),
                        "pipeline processing message"
                    );
                    let outcome = engine.run(&mut ctx, &pipeline, Some(data)).await;
                    if outcome.is_success() {
                        if let Some(handler) = handler {
                            if let Err(e) = handler.handle(&ctx, &pipeline).await {
                                error!(
                                    pipeline_id = pipeline.id(),
                                    correlation_id = ctx.correlation_id(),
                                    error = %e,
                                    "pipeline output handling failed"
                                );
                            }
                        }
                    }
                    PipelineOutcome {
                        pipeline_id: pipeline.id().to_string(),
                        outcome,
                        context: ctx,
                    }
                })
            })
            .collect();

        let mut outcomes = Vec::with_capacity(tasks.len());
        for joined in futures::future::join_all(tasks).await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(error = %e, "pipeline task panicked"),
            }
        }
        Ok(outcomes)
    }

    fn new_context(&self, envelope: &MessageEnvelope) -> FunctionContext {
        let mut ctx =
            FunctionContext::new(&envelope.correlation_id, envelope.content_type_or_default());
        if let Some(client) = &self.message_client {
            ctx = ctx.with_message_client(Arc::clone(client));
        }
        if let Some(topic) = &self.publish_topic {
            ctx = ctx.with_publish_topic(topic);
        }
        ctx.add_value(RECEIVED_TOPIC_KEY, &envelope.received_topic);
        ctx
    }

    /// Decodes the envelope payload as the configured target type.
    ///
    /// # Errors
    ///
    /// Returns [`EdgeflowError::Contract`] if the payload does not decode.
    pub fn decode(&self, envelope: &MessageEnvelope) -> Result<PipelineData> {
        match self.target_type {
            TargetType::Raw => Ok(PipelineData::Bytes(envelope.payload.clone())),
            TargetType::Json => serde_json::from_slice(&envelope.payload)
                .map(PipelineData::Json)
                .map_err(|e| EdgeflowError::Contract(format!("payload is not JSON: {e}"))),
            TargetType::Event => decode_event(envelope).map(PipelineData::Event),
        }
    }
}

fn decode_event(envelope: &MessageEnvelope) -> Result<Event> {
    let content_type = envelope.content_type_or_default().to_lowercase();
    if !content_type.starts_with(crate::messaging::CONTENT_TYPE_JSON) {
        return Err(EdgeflowError::Contract(format!(
            "unsupported content type: {content_type}"
        )));
    }

    // Bus bindings may deliver the DTO base64 encoded.
    let payload = envelope.payload.as_slice();
    let decoded;
    let bytes = if payload.trim_ascii_start().first() == Some(&b'{') {
        payload
    } else {
        decoded = STANDARD.decode(payload.trim_ascii()).map_err(|e| {
            EdgeflowError::Contract(format!("payload is neither JSON nor base64: {e}"))
        })?;
        decoded.as_slice()
    };

    if let Ok(request) = serde_json::from_slice::<AddEventRequest>(bytes) {
        return Ok(request.event);
    }
    debug!("payload is not an AddEventRequest, trying a bare Event");
    let event: Event = serde_json::from_slice(bytes).map_err(|e| {
        EdgeflowError::Contract(format!("failed to decode message envelope into Event: {e}"))
    })?;
    if event.device_name.is_empty() || event.profile_name.is_empty() || event.source_name.is_empty()
    {
        return Err(EdgeflowError::Contract(
            "failed to decode message envelope into Event: device, profile and source names are required"
                .to_string(),
        ));
    }
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::CONTENT_TYPE_TEXT;
    use crate::functions::AppFunction;
    use crate::testing::{CountingFunction, FailingFunction};

    fn router(target_type: TargetType) -> PipelineRouter {
        PipelineRouter::new(Arc::new(PipelineRegistry::new()), PipelineEngine::new())
            .with_target_type(target_type)
    }

    fn event() -> Event {
        Event::new("profile", "device", "source").with_reading("temperature", "Int32", "21")
    }

    #[test]
    fn test_decode_add_event_request() {
        let payload = serde_json::to_vec(&AddEventRequest::new(event())).unwrap();
        let data = router(TargetType::Event)
            .decode(&MessageEnvelope::new(payload, "application/json"))
            .unwrap();
        assert_eq!(data.as_event().map(|e| e.device_name.as_str()), Some("device"));
    }

    #[test]
    fn test_decode_bare_and_base64_event() {
        let json = serde_json::to_vec(&event()).unwrap();
        let r = router(TargetType::Event);
        assert!(r.decode(&MessageEnvelope::new(json.clone(), "application/json")).is_ok());

        let wrapped = STANDARD.encode(json).into_bytes();
        assert!(r.decode(&MessageEnvelope::new(wrapped, "application/json")).is_ok());
    }

    #[test]
    fn test_decode_rejects_non_events() {
        let r = router(TargetType::Event);
        assert!(r.decode(&MessageEnvelope::new(&b"{}"[..], "application/json")).is_err());
        assert!(r.decode(&MessageEnvelope::new(&b"not json"[..], "application/json")).is_err());
        let json = serde_json::to_vec(&event()).unwrap();
        assert!(r.decode(&MessageEnvelope::new(json, CONTENT_TYPE_TEXT)).is_err());
    }

    #[test]
    fn test_decode_raw_and_json() {
        let raw = router(TargetType::Raw)
            .decode(&MessageEnvelope::new(&b"\x00\x01"[..], ""))
            .unwrap();
        assert_eq!(raw, PipelineData::Bytes(vec![0, 1]));

        let json = router(TargetType::Json)
            .decode(&MessageEnvelope::new(&b"{\"a\":1}"[..], "application/json"))
            .unwrap();
        assert_eq!(json, PipelineData::Json(serde_json::json!({"a": 1})));
    }

    #[derive(Debug, Default)]
    struct CountingHandler {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl OutputHandler for CountingHandler {
        async fn handle(&self, _ctx: &FunctionContext, _pipeline: &FunctionPipeline) -> Result<()> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    fn raw_router(pipelines: Vec<FunctionPipeline>) -> PipelineRouter {
        let registry = Arc::new(PipelineRegistry::new());
        for pipeline in pipelines {
            registry.add_function_pipeline(pipeline).unwrap();
        }
        PipelineRouter::new(registry, PipelineEngine::new()).with_target_type(TargetType::Raw)
    }

    #[tokio::test]
    async fn test_unmatched_message_is_dropped() {
        let counter = Arc::new(CountingFunction::new("count"));
        let r = raw_router(vec![FunctionPipeline::new(
            "alerts",
            vec!["alerts/#".into()],
            vec![counter.clone() as Arc<dyn AppFunction>],
        )]);

        let outcomes = r
            .route(&MessageEnvelope::new(&b"x"[..], "").with_topic("events/d1"), None)
            .await
            .unwrap();
        assert!(outcomes.is_empty());
        assert_eq!(counter.calls(), 0);
    }

    #[tokio::test]
    async fn test_outcomes_follow_registration_order() {
        let r = raw_router(vec![
            FunctionPipeline::new("b", vec!["events/#".into()], vec![]),
            FunctionPipeline::new("a", vec!["events/+".into()], vec![]),
        ]);

        let outcomes = r
            .route(&MessageEnvelope::new(&b"x"[..], "").with_topic("events/d1"), None)
            .await
            .unwrap();
        let ids: Vec<_> = outcomes.iter().map(|o| o.pipeline_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(r.metrics().messages_received.get(), 1);
    }

    #[tokio::test]
    async fn test_handler_runs_only_on_success() {
        let r = raw_router(vec![
            FunctionPipeline::new("ok", vec!["t".into()], vec![]),
            FunctionPipeline::new(
                "broken",
                vec!["t".into()],
                vec![Arc::new(FailingFunction::new("export"))],
            ),
        ]);
        let handler = Arc::new(CountingHandler::default());

        let outcomes = r
            .route(
                &MessageEnvelope::new(&b"x"[..], "").with_topic("t"),
                Some(handler.clone() as Arc<dyn OutputHandler>),
            )
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(handler.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
