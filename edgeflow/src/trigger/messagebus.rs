//! Message-bus trigger.

use super::{spawn_dispatch_loop, DEFAULT_WORKER_POOL_SIZE};
use crate::cancellation::CancellationToken;
use crate::context::FunctionContext;
use crate::errors::Result;
use crate::messaging::{MessageClient, MessageEnvelope, CONTENT_TYPE_JSON};
use crate::pipeline::{FunctionPipeline, OutputHandler, PipelineRouter};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Publishes a pipeline's response data after it completes.
#[derive(Debug)]
pub struct MessageBusResponder {
    client: Arc<dyn MessageClient>,
    publish_topic: Option<String>,
}

impl MessageBusResponder {
    /// Creates a responder publishing to `publish_topic`, which may hold
    /// `{key}` placeholders.
    #[must_use]
    pub fn new(client: Arc<dyn MessageClient>, publish_topic: Option<String>) -> Self {
        Self {
            client,
            publish_topic,
        }
    }
}

#[async_trait]
impl OutputHandler for MessageBusResponder {
    async fn handle(&self, ctx: &FunctionContext, pipeline: &FunctionPipeline) -> Result<()> {
        let Some(data) = ctx.response_data() else {
            return Ok(());
        };
        let Some(format) = self.publish_topic.as_deref() else {
            debug!(
                pipeline_id = pipeline.id(),
                correlation_id = ctx.correlation_id(),
                "response data set but no publish topic configured"
            );
            return Ok(());
        };

        let topic = ctx.apply_values(format)?;
        let content_type = ctx.response_content_type().unwrap_or(CONTENT_TYPE_JSON);
        let envelope = MessageEnvelope::new(data, content_type)
            .with_correlation_id(ctx.correlation_id());
        self.client.publish(envelope, &topic).await?;
        debug!(
            pipeline_id = pipeline.id(),
            correlation_id = ctx.correlation_id(),
            topic = %topic,
            "published pipeline response"
        );
        Ok(())
    }
}

/// Subscribes to broker topics and routes every received message.
#[derive(Debug)]
pub struct MessageBusTrigger {
    client: Arc<dyn MessageClient>,
    router: PipelineRouter,
    subscribe_topics: Vec<String>,
    publish_topic: Option<String>,
    worker_pool_size: usize,
}

impl MessageBusTrigger {
    /// Creates a trigger subscribing to `subscribe_topics`.
    #[must_use]
    pub fn new(
        client: Arc<dyn MessageClient>,
        router: PipelineRouter,
        subscribe_topics: Vec<String>,
    ) -> Self {
        Self {
            client,
            router,
            subscribe_topics,
            publish_topic: None,
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
        }
    }

    /// Sets the topic responses are published to.
    #[must_use]
    pub fn with_publish_topic(mut self, topic: Option<String>) -> Self {
        self.publish_topic = topic;
        self
    }

    /// Sets the number of messages processed concurrently.
    #[must_use]
    pub const fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    /// Subscribes and starts dispatching until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns the client's error if the subscription fails.
    pub async fn initialize(&self, shutdown: Arc<CancellationToken>) -> Result<JoinHandle<()>> {
        let receiver = self.client.subscribe(&self.subscribe_topics).await?;
        info!(
            topics = ?self.subscribe_topics,
            publish_topic = ?self.publish_topic,
            "subscribed to message bus topics"
        );
        let responder: Arc<dyn OutputHandler> = Arc::new(MessageBusResponder::new(
            Arc::clone(&self.client),
            self.publish_topic.clone(),
        ));
        Ok(spawn_dispatch_loop(
            "message-bus",
            receiver,
            self.router.clone(),
            Some(responder),
            self.worker_pool_size,
            shutdown,
        ))
    }
}
