//! Persisting failed executions and replaying them in the background.

use super::{StoreClient, StoredObject};
use crate::cancellation::CancellationToken;
use crate::context::{FunctionContext, PIPELINE_ID_KEY};
use crate::core::{DataKind, PipelineData};
use crate::errors::StoreError;
use crate::messaging::MessageClient;
use crate::observability::Gauge;
use crate::pipeline::{ExecutionOutcome, FunctionPipeline, PipelineEngine, PipelineRegistry};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

/// Retry behaviour of store-and-forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Whether failures are persisted and retried at all.
    pub enabled: bool,
    /// Time between retry passes.
    pub retry_interval: Duration,
    /// Failed retries after which an object is dropped.
    pub max_retry_count: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            retry_interval: Duration::from_secs(300),
            max_retry_count: 10,
        }
    }
}

/// Counts from one retry pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPassSummary {
    /// Objects loaded from the store.
    pub loaded: usize,
    /// Objects whose replay succeeded.
    pub succeeded: usize,
    /// Objects kept for another attempt.
    pub updated: usize,
    /// Objects dropped after exhausting their retries.
    pub exhausted: usize,
    /// Objects dropped because their pipeline is gone or changed.
    pub stale: usize,
}

enum RetryDecision {
    Remove,
    Update,
    Keep,
}

/// Store-and-forward for one service.
///
/// Live executions hand failures to
/// [`store_for_later_retry`](Self::store_for_later_retry); a single
/// background loop replays them against the same pipeline. Retry passes
/// never overlap: a pass requested while another is running is skipped.
pub struct StoreForward {
    service_key: String,
    policy: RetryPolicy,
    store: Arc<dyn StoreClient>,
    registry: Arc<PipelineRegistry>,
    engine: PipelineEngine,
    message_client: Option<Arc<dyn MessageClient>>,
    publish_topic: Option<String>,
    queue_size: Arc<Gauge>,
    retry_in_progress: tokio::sync::Mutex<()>,
}

impl StoreForward {
    /// Creates store-and-forward for `service_key`.
    #[must_use]
    pub fn new(
        service_key: impl Into<String>,
        policy: RetryPolicy,
        store: Arc<dyn StoreClient>,
        registry: Arc<PipelineRegistry>,
    ) -> Self {
        Self {
            service_key: service_key.into(),
            policy,
            store,
            registry,
            engine: PipelineEngine::new(),
            message_client: None,
            publish_topic: None,
            queue_size: Arc::new(Gauge::default()),
            retry_in_progress: tokio::sync::Mutex::new(()),
        }
    }

    /// Sets the engine used for replays.
    ///
    /// Replays never persist again, so the engine should not carry a
    /// store-and-forward of its own.
    #[must_use]
    pub fn with_engine(mut self, engine: PipelineEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Gives replayed contexts a message client and publish topic.
    #[must_use]
    pub fn with_message_client(
        mut self,
        client: Arc<dyn MessageClient>,
        publish_topic: Option<String>,
    ) -> Self {
        self.message_client = Some(client);
        self.publish_topic = publish_topic;
        self
    }

    /// Reports the number of pending objects through `gauge`.
    #[must_use]
    pub fn with_queue_gauge(mut self, gauge: Arc<Gauge>) -> Self {
        self.queue_size = gauge;
        self
    }

    /// Returns whether store-and-forward is enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.policy.enabled
    }

    /// Returns the retry policy.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Returns the store client.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn StoreClient> {
        &self.store
    }

    /// Number of objects believed to be pending.
    #[must_use]
    pub fn pending(&self) -> i64 {
        self.queue_size.get()
    }

    /// Loads the pending count from the store.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the objects cannot be read.
    pub async fn initialize(&self) -> Result<usize, StoreError> {
        let pending = self.store.retrieve_from_store(&self.service_key).await?.len();
        self.queue_size
            .set(i64::try_from(pending).unwrap_or(i64::MAX));
        info!(
            service_key = %self.service_key,
            pending,
            "store and forward initialized"
        );
        Ok(pending)
    }

    /// Persists an object for later retry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Disabled`] when store-and-forward is off, a
    /// contract error for incomplete objects, or the store's error.
    pub async fn persist_failure(&self, object: StoredObject) -> Result<String, StoreError> {
        if !self.policy.enabled {
            return Err(StoreError::Disabled);
        }
        let pipeline_id = object.pipeline_id.clone();
        let receipt = self.store.store(object).await?;
        if receipt.inserted {
            self.queue_size.inc();
            debug!(
                object_id = %receipt.id,
                pipeline_id = %pipeline_id,
                "stored data for later retry"
            );
        } else {
            debug!(
                object_id = %receipt.id,
                pipeline_id = %pipeline_id,
                "data already stored for retry"
            );
        }
        Ok(receipt.id)
    }

    /// Builds a stored object from a failed execution and persists it.
    ///
    /// # Errors
    ///
    /// See [`persist_failure`](Self::persist_failure).
    pub async fn store_for_later_retry(
        &self,
        payload: Vec<u8>,
        kind: DataKind,
        ctx: &FunctionContext,
        pipeline: &FunctionPipeline,
        position: usize,
    ) -> Result<String, StoreError> {
        trace!(
            pipeline_id = pipeline.id(),
            correlation_id = ctx.correlation_id(),
            position,
            "storing data for later retry"
        );
        let object = StoredObject::new(
            self.service_key.as_str(),
            payload,
            pipeline.id(),
            position,
            pipeline.version(),
            ctx.get_values(),
        )
        .with_payload_kind(kind)
        .with_correlation_id(ctx.correlation_id())
        .with_content_type(ctx.input_content_type());
        self.persist_failure(object).await
    }

    /// Runs one retry pass over every pending object.
    ///
    /// Returns `None` if another pass is already running.
    pub async fn retry_stored_data(&self) -> Option<RetryPassSummary> {
        let Ok(_guard) = self.retry_in_progress.try_lock() else {
            debug!("retry pass already in progress, skipping");
            return None;
        };

        let items = match self.store.retrieve_from_store(&self.service_key).await {
            Ok(items) => items,
            Err(e) => {
                error!(error = %e, "unable to load store and forward items");
                return Some(RetryPassSummary::default());
            }
        };
        debug!(count = items.len(), "stored data items found for retrying");

        let mut summary = RetryPassSummary {
            loaded: items.len(),
            ..RetryPassSummary::default()
        };
        for item in items {
            match self.process_retry_item(item, &mut summary).await {
                (RetryDecision::Remove, item) => {
                    if let Err(e) = self.store.remove_from_store(&item).await {
                        error!(
                            object_id = %item.id,
                            pipeline_id = %item.pipeline_id,
                            error = %e,
                            "unable to remove stored data item"
                        );
                    } else {
                        self.queue_size.dec();
                    }
                }
                (RetryDecision::Update, item) => {
                    if let Err(e) = self.store.update(item.clone()).await {
                        error!(
                            object_id = %item.id,
                            pipeline_id = %item.pipeline_id,
                            error = %e,
                            "unable to update stored data item"
                        );
                    }
                }
                (RetryDecision::Keep, _) => {}
            }
        }
        debug!(?summary, "retry pass complete");
        Some(summary)
    }

    async fn process_retry_item(
        &self,
        mut item: StoredObject,
        summary: &mut RetryPassSummary,
    ) -> (RetryDecision, StoredObject) {
        let Some(pipeline) = self.registry.get_pipeline_by_id(&item.pipeline_id) else {
            error!(
                pipeline_id = %item.pipeline_id,
                object_id = %item.id,
                "stored data item's pipeline no longer exists, removing item"
            );
            summary.stale += 1;
            return (RetryDecision::Remove, item);
        };

        if item.version != pipeline.version() {
            error!(
                pipeline_id = %item.pipeline_id,
                object_id = %item.id,
                "stored data item's version doesn't match its pipeline's version, removing item"
            );
            summary.stale += 1;
            return (RetryDecision::Remove, item);
        }

        let mut ctx = self.retry_context(&item);
        let data = match PipelineData::from_bytes(item.payload_kind, item.payload.clone()) {
            Ok(data) => data,
            Err(e) => {
                error!(
                    object_id = %item.id,
                    error = %e,
                    "stored payload cannot be decoded, removing item"
                );
                summary.stale += 1;
                return (RetryDecision::Remove, item);
            }
        };

        trace!(
            pipeline_id = %item.pipeline_id,
            correlation_id = %item.correlation_id,
            "retrying stored data"
        );
        let outcome = self
            .engine
            .execute(&mut ctx, &pipeline, Some(data), item.pipeline_position, true)
            .await;

        match outcome {
            ExecutionOutcome::Completed(_) | ExecutionOutcome::Halted { .. } => {
                trace!(
                    pipeline_id = %item.pipeline_id,
                    correlation_id = %item.correlation_id,
                    "retry successful, removing item"
                );
                summary.succeeded += 1;
                (RetryDecision::Remove, item)
            }
            ExecutionOutcome::Cancelled { .. } => (RetryDecision::Keep, item),
            ExecutionOutcome::Failed { at, .. } => {
                item.retry_count += 1;
                if item.retry_count >= self.policy.max_retry_count {
                    warn!(
                        event = "store_forward.give_up",
                        pipeline_id = %item.pipeline_id,
                        object_id = %item.id,
                        correlation_id = %item.correlation_id,
                        retries = item.retry_count,
                        "max retries exceeded, dropping stored data"
                    );
                    summary.exhausted += 1;
                    return (RetryDecision::Remove, item);
                }

                if let Some(retry) = ctx.retry_data() {
                    item.payload = retry.to_vec();
                    item.payload_kind = DataKind::Bytes;
                    item.pipeline_position = at;
                }
                trace!(
                    pipeline_id = %item.pipeline_id,
                    retries = item.retry_count,
                    "retry failed, incrementing retry count"
                );
                summary.updated += 1;
                (RetryDecision::Update, item)
            }
        }
    }

    fn retry_context(&self, item: &StoredObject) -> FunctionContext {
        let mut ctx =
            FunctionContext::new(item.correlation_id.as_str(), item.content_type.as_str());
        if let Some(client) = &self.message_client {
            ctx = ctx.with_message_client(Arc::clone(client));
        }
        if let Some(topic) = &self.publish_topic {
            ctx = ctx.with_publish_topic(topic.as_str());
        }
        for (key, value) in &item.context_data {
            ctx.add_value(key, value.as_str());
        }
        ctx.add_value(PIPELINE_ID_KEY, item.pipeline_id.as_str());
        ctx
    }

    /// Runs a retry pass now if anything is pending.
    ///
    /// Called when an export succeeds on a live execution, which suggests
    /// the endpoint is reachable again.
    // Boxed so the engine, which spawns this, does not depend on its own
    // future type through the replay path.
    pub fn trigger_retry(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.pending() <= 0 {
                return;
            }
            if !self.policy.enabled {
                debug!("store and forward not enabled, skipping triggered retry");
                return;
            }
            debug!("triggering store and forward retry of failed data");
            self.retry_stored_data().await;
        })
    }

    /// Starts the background retry loop.
    ///
    /// The loop runs a pass every retry interval and exits once `shutdown`
    /// is cancelled. A pass already running when shutdown is requested is
    /// allowed to finish.
    pub fn start_retry_loop(self: Arc<Self>, shutdown: Arc<CancellationToken>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.policy.retry_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            info!(
                interval = ?self.policy.retry_interval,
                max_retry_count = self.policy.max_retry_count,
                "store and forward retry loop started"
            );
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.retry_stored_data().await;
                    }
                }
            }
            info!("exiting store and forward retry loop");
        })
    }
}

impl std::fmt::Debug for StoreForward {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreForward")
            .field("service_key", &self.service_key)
            .field("policy", &self.policy)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}
