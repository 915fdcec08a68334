//! Service wiring and lifecycle.
//!
//! [`AppService`] owns the pipeline registry, the engine, store-and-forward
//! and the trigger. Collaborators the runtime cannot build itself (a broker
//! client, a custom store) are handed in through [`Collaborators`].

use crate::cancellation::CancellationToken;
use crate::config::{ServiceConfig, TriggerKind};
use crate::functions::AppFunction;
use crate::messaging::{MessageClient, MessageEnvelope};
use crate::observability::{MetricsRegistry, ServiceMetrics};
use crate::pipeline::{
    FunctionPipeline, PipelineEngine, PipelineRegistry, PipelineRouter, TopicMatcher,
};
use crate::storeforward::{InMemoryStoreClient, SqliteStoreClient, StoreClient, StoreForward};
use crate::trigger::{CustomTrigger, HttpTrigger, MessageBusTrigger};
use anyhow::{bail, Context};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Capacity of the custom trigger's input channel.
pub const CUSTOM_TRIGGER_CAPACITY: usize = 256;

/// External collaborators of a service.
#[derive(Debug, Default, Clone)]
pub struct Collaborators {
    /// Broker client. Required by the message-bus trigger.
    pub message_client: Option<Arc<dyn MessageClient>>,
    /// Store for store-and-forward. Overrides the configured database.
    pub store: Option<Arc<dyn StoreClient>>,
    /// Registry receiving service and pipeline metrics.
    pub metrics: Option<Arc<MetricsRegistry>>,
}

/// What [`AppService::start`] started.
#[derive(Debug)]
pub enum StartedTrigger {
    /// The message-bus trigger is consuming its subscription.
    MessageBus,
    /// Requests are handled by passing them to this trigger.
    Http(HttpTrigger),
    /// Envelopes sent here are routed.
    Custom(mpsc::Sender<MessageEnvelope>),
}

/// An application service: pipelines plus the machinery around them.
pub struct AppService {
    config: ServiceConfig,
    registry: Arc<PipelineRegistry>,
    metrics: Arc<MetricsRegistry>,
    service_metrics: Arc<ServiceMetrics>,
    message_client: Option<Arc<dyn MessageClient>>,
    store: Arc<dyn StoreClient>,
    store_forward: Arc<StoreForward>,
    engine: PipelineEngine,
    shutdown: Arc<CancellationToken>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AppService {
    /// Builds a service from configuration.
    ///
    /// # Errors
    ///
    /// Fails if the store-and-forward database cannot be opened or the
    /// service metrics cannot be registered.
    pub fn new(config: ServiceConfig, collaborators: Collaborators) -> anyhow::Result<Self> {
        let metrics = collaborators.metrics.unwrap_or_default();
        let service_metrics = Arc::new(ServiceMetrics::default());
        service_metrics
            .register(&metrics)
            .context("unable to register service metrics")?;

        let registry = Arc::new(PipelineRegistry::new().with_metrics(Arc::clone(&metrics)));
        let store: Arc<dyn StoreClient> = match (collaborators.store, &config.store_and_forward.database_path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(SqliteStoreClient::open(path).with_context(|| {
                format!("unable to open store-and-forward database '{}'", path.display())
            })?),
            (None, None) => Arc::new(InMemoryStoreClient::new()),
        };

        let shutdown = Arc::new(CancellationToken::new());
        let publish_topic = config.trigger.publish_topic(&config.topics);
        let mut store_forward = StoreForward::new(
            config.service_key.as_str(),
            config.store_and_forward.retry_policy(),
            Arc::clone(&store),
            Arc::clone(&registry),
        )
        .with_engine(PipelineEngine::new().with_cancellation(Arc::clone(&shutdown)))
        .with_queue_gauge(Arc::clone(&service_metrics.store_forward_queue_size));
        if let Some(client) = &collaborators.message_client {
            store_forward = store_forward.with_message_client(Arc::clone(client), publish_topic);
        }
        let store_forward = Arc::new(store_forward);

        let engine = PipelineEngine::new()
            .with_store_forward(Arc::clone(&store_forward))
            .with_cancellation(Arc::clone(&shutdown));

        Ok(Self {
            config,
            registry,
            metrics,
            service_metrics,
            message_client: collaborators.message_client,
            store,
            store_forward,
            engine,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Returns the configuration.
    pub const fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Returns the pipeline registry.
    pub const fn registry(&self) -> &Arc<PipelineRegistry> {
        &self.registry
    }

    /// Returns the metrics registry.
    pub const fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Returns store-and-forward.
    pub const fn store_forward(&self) -> &Arc<StoreForward> {
        &self.store_forward
    }

    /// Returns the shutdown signal shared by every background task.
    pub const fn shutdown_token(&self) -> &Arc<CancellationToken> {
        &self.shutdown
    }

    /// Sets the functions of the default pipeline.
    pub fn set_default_functions_pipeline(
        &self,
        functions: Vec<Arc<dyn AppFunction>>,
    ) -> Arc<FunctionPipeline> {
        self.registry.set_default_functions_pipeline(functions)
    }

    /// Adds a pipeline bound to its own topics.
    ///
    /// # Errors
    ///
    /// Fails if the pipeline id is already registered.
    pub fn add_function_pipeline(
        &self,
        pipeline: FunctionPipeline,
    ) -> crate::Result<Arc<FunctionPipeline>> {
        self.registry.add_function_pipeline(pipeline)
    }

    /// Registers the pipelines described by the configuration.
    ///
    /// # Errors
    ///
    /// Fails if a function can't be built or a pipeline id repeats.
    pub fn load_configurable_pipelines(&self) -> anyhow::Result<usize> {
        let pipelines = self
            .config
            .pipeline
            .build_pipelines(Some(&self.shutdown))
            .context("invalid pipeline configuration")?;
        let count = pipelines.len();
        for pipeline in pipelines {
            let id = pipeline.id().to_string();
            self.registry
                .add_function_pipeline(pipeline)
                .with_context(|| format!("unable to add pipeline '{id}'"))?;
        }
        info!(count, "configurable pipelines loaded");
        Ok(count)
    }

    /// Builds a router over this service's pipelines.
    pub fn router(&self) -> PipelineRouter {
        let mut router = PipelineRouter::new(Arc::clone(&self.registry), self.engine.clone())
            .with_matcher(TopicMatcher::new(self.config.topics.clone()))
            .with_target_type(self.config.pipeline.target_type)
            .with_metrics(Arc::clone(&self.service_metrics));
        if let Some(client) = &self.message_client {
            router = router.with_message_client(Arc::clone(client));
        }
        if let Some(topic) = self.config.trigger.publish_topic(&self.config.topics) {
            router = router.with_publish_topic(topic);
        }
        router
    }

    /// Starts store-and-forward and the configured trigger.
    ///
    /// # Errors
    ///
    /// Fails if no pipeline is registered, the store cannot be read, or the
    /// trigger cannot start.
    pub async fn start(&self) -> anyhow::Result<StartedTrigger> {
        if self.registry.is_empty() {
            bail!("no pipelines registered");
        }

        if self.store_forward.is_enabled() {
            self.store_forward
                .initialize()
                .await
                .context("unable to initialize store and forward")?;
            let handle = Arc::clone(&self.store_forward).start_retry_loop(Arc::clone(&self.shutdown));
            self.tasks.lock().push(handle);
        }

        let trigger = &self.config.trigger;
        let started = match trigger.kind {
            TriggerKind::MessageBus => {
                let Some(client) = &self.message_client else {
                    bail!("message-bus trigger requires a message client");
                };
                let topics = trigger.subscribe_topics(&self.config.topics);
                let handle = MessageBusTrigger::new(Arc::clone(client), self.router(), topics)
                    .with_publish_topic(trigger.publish_topic(&self.config.topics))
                    .with_worker_pool_size(trigger.worker_pool_size)
                    .initialize(Arc::clone(&self.shutdown))
                    .await
                    .context("unable to start message-bus trigger")?;
                self.tasks.lock().push(handle);
                StartedTrigger::MessageBus
            }
            TriggerKind::Http => StartedTrigger::Http(HttpTrigger::new(self.router())),
            TriggerKind::Custom => {
                let (sender, handle) = CustomTrigger::new(self.router(), CUSTOM_TRIGGER_CAPACITY)
                    .with_worker_pool_size(trigger.worker_pool_size)
                    .start(Arc::clone(&self.shutdown));
                self.tasks.lock().push(handle);
                StartedTrigger::Custom(sender)
            }
        };

        info!(
            service_key = %self.config.service_key,
            trigger = ?trigger.kind,
            pipelines = self.registry.len(),
            store_and_forward = self.store_forward.is_enabled(),
            "service started"
        );
        Ok(started)
    }

    /// Signals shutdown, waits for background tasks and disconnects.
    pub async fn stop(&self) {
        self.shutdown.cancel("service stopping");
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for joined in futures::future::join_all(tasks).await {
            if let Err(e) = joined {
                error!(error = %e, "background task panicked");
            }
        }
        if let Err(e) = self.store.disconnect().await {
            error!(error = %e, "unable to disconnect store");
        }
        if let Some(client) = &self.message_client {
            if let Err(e) = client.disconnect().await {
                error!(error = %e, "unable to disconnect message client");
            }
        }
        info!(service_key = %self.config.service_key, "service stopped");
    }
}

impl std::fmt::Debug for AppService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppService")
            .field("service_key", &self.config.service_key)
            .field("pipelines", &self.registry.len())
            .field("store_forward", &self.store_forward)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FunctionConfig;
    use crate::messaging::InMemoryMessageBus;
    use crate::observability::{Metric, MESSAGES_RECEIVED};
    use crate::testing::{CountingFunction, FailingFunction};
    use std::collections::HashMap;
    use std::time::Duration;

    fn config(kind: TriggerKind) -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.trigger.kind = kind;
        config.trigger.subscribe_topics = "in/#".into();
        config.pipeline.target_type = crate::pipeline::TargetType::Raw;
        config
    }

    #[tokio::test]
    async fn test_start_requires_pipelines() {
        let service = AppService::new(config(TriggerKind::Http), Collaborators::default()).unwrap();
        assert!(service.start().await.is_err());
    }

    #[tokio::test]
    async fn test_message_bus_requires_client() {
        let service =
            AppService::new(config(TriggerKind::MessageBus), Collaborators::default()).unwrap();
        service.set_default_functions_pipeline(vec![]);
        let err = service.start().await.unwrap_err();
        assert!(err.to_string().contains("message client"));
    }

    #[tokio::test]
    async fn test_message_bus_service_end_to_end() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let counter = Arc::new(CountingFunction::new("count"));
        let service = AppService::new(
            config(TriggerKind::MessageBus),
            Collaborators {
                message_client: Some(bus.clone()),
                ..Collaborators::default()
            },
        )
        .unwrap();
        service.set_default_functions_pipeline(vec![counter.clone() as Arc<dyn AppFunction>]);
        assert!(matches!(service.start().await.unwrap(), StartedTrigger::MessageBus));

        bus.publish(MessageEnvelope::new(&b"x"[..], "text/plain"), "in/d1")
            .await
            .unwrap();
        for _ in 0..200 {
            if counter.calls() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(counter.calls(), 1);

        let Some(Metric::Counter(received)) = service.metrics().get(MESSAGES_RECEIVED) else {
            panic!("messages received counter not registered");
        };
        assert_eq!(received.get(), 1);

        service.stop().await;
        assert!(service.shutdown_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_custom_service_persists_failures() {
        let mut config = config(TriggerKind::Custom);
        config.store_and_forward.enabled = true;
        config.store_and_forward.retry_interval = "1h".into();
        let store = Arc::new(InMemoryStoreClient::new());
        let service = AppService::new(
            config,
            Collaborators {
                store: Some(store.clone()),
                ..Collaborators::default()
            },
        )
        .unwrap();
        service.set_default_functions_pipeline(vec![Arc::new(FailingFunction::new("export"))]);

        let StartedTrigger::Custom(sender) = service.start().await.unwrap() else {
            panic!("expected custom trigger");
        };
        sender
            .send(MessageEnvelope::new(&b"x"[..], "text/plain").with_topic("local"))
            .await
            .unwrap();
        for _ in 0..200 {
            if store.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(store.len(), 1);
        assert_eq!(service.store_forward().pending(), 1);

        service.stop().await;
    }

    #[tokio::test]
    async fn test_load_configurable_pipelines() {
        let mut config = config(TriggerKind::Http);
        config.pipeline.execution_order = "Compress".into();
        config.pipeline.functions = HashMap::from([(
            "Compress".to_string(),
            FunctionConfig {
                parameters: HashMap::from([("Algorithm".to_string(), "gzip".to_string())]),
            },
        )]);
        let service = AppService::new(config, Collaborators::default()).unwrap();
        assert_eq!(service.load_configurable_pipelines().unwrap(), 1);
        assert!(matches!(service.start().await.unwrap(), StartedTrigger::Http(_)));
        service.stop().await;
    }

    #[tokio::test]
    async fn test_file_backed_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(TriggerKind::Http);
        config.store_and_forward.database_path = Some(dir.path().join("sf").join("store.db"));
        let service = AppService::new(config, Collaborators::default()).unwrap();
        service.set_default_functions_pipeline(vec![]);
        service.start().await.unwrap();
        service.stop().await;
        assert!(dir.path().join("sf").join("store.db").exists());
    }
}
