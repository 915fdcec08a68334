//! In-process metrics.
//!
//! Metrics are plain atomics held behind `Arc`s so the hot path never takes
//! a lock. The [`MetricsRegistry`] only tracks names and tags for whatever
//! exporter is wired in by the host; the tag map has its own lock.

use crate::errors::{EdgeflowError, Result};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Pipeline messages processed metric name prefix.
pub const PIPELINE_MESSAGES_PROCESSED: &str = "PipelineMessagesProcessed";
/// Pipeline processing errors metric name prefix.
pub const PIPELINE_PROCESSING_ERRORS: &str = "PipelineProcessingErrors";
/// Pipeline processing time metric name prefix.
pub const PIPELINE_MESSAGE_PROCESSING_TIME: &str = "PipelineMessageProcessingTime";
/// Messages received metric name.
pub const MESSAGES_RECEIVED: &str = "MessagesReceived";
/// Invalid messages received metric name.
pub const INVALID_MESSAGES_RECEIVED: &str = "InvalidMessagesReceived";
/// Store-and-forward queue size metric name.
pub const STORE_FORWARD_QUEUE_SIZE: &str = "StoreForwardQueueSize";

/// Tag identifying the pipeline a metric belongs to.
pub const PIPELINE_ID_TAG: &str = "pipeline";

/// Monotonic counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Increments by one.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments by `n`.
    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Gauge that can move in both directions.
#[derive(Debug, Default)]
pub struct Gauge(AtomicI64);

impl Gauge {
    /// Sets the value.
    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::Relaxed);
    }

    /// Increments by one.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements by one.
    pub fn dec(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Accumulates observed durations.
#[derive(Debug, Default)]
pub struct Timer {
    count: AtomicU64,
    total_micros: AtomicU64,
}

impl Timer {
    /// Records one observation.
    pub fn record(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
    }

    /// Starts timing one observation.
    #[must_use]
    pub fn start(self: &Arc<Self>) -> TimerGuard {
        TimerGuard {
            start: Instant::now(),
            timer: Arc::clone(self),
        }
    }

    /// Number of observations.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Sum of all observations.
    #[must_use]
    pub fn total(&self) -> Duration {
        Duration::from_micros(self.total_micros.load(Ordering::Relaxed))
    }

    /// Mean observation, or zero when nothing was recorded.
    #[must_use]
    pub fn mean(&self) -> Duration {
        let count = self.count();
        if count == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.total_micros.load(Ordering::Relaxed) / count)
    }
}

/// An in-progress [`Timer`] observation.
#[derive(Debug)]
pub struct TimerGuard {
    start: Instant,
    timer: Arc<Timer>,
}

impl TimerGuard {
    /// Records the elapsed time and returns it.
    pub fn finish(self) -> Duration {
        let elapsed = self.start.elapsed();
        self.timer.record(elapsed);
        elapsed
    }
}

/// A registered metric.
#[derive(Debug, Clone)]
pub enum Metric {
    /// Counter metric.
    Counter(Arc<Counter>),
    /// Gauge metric.
    Gauge(Arc<Gauge>),
    /// Timer metric.
    Timer(Arc<Timer>),
}

/// Named metrics with their tags.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    metrics: DashMap<String, Metric>,
    tags: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl MetricsRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a metric under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`EdgeflowError::Conflict`] if the name is already registered.
    pub fn register(
        &self,
        name: impl Into<String>,
        metric: Metric,
        tags: HashMap<String, String>,
    ) -> Result<()> {
        let name = name.into();
        match self.metrics.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(EdgeflowError::Conflict(format!(
                    "metric '{name}' is already registered"
                )))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(metric);
            }
        }
        self.tags.write().insert(name, tags);
        Ok(())
    }

    /// Removes a metric. Returns true if it was registered.
    pub fn unregister(&self, name: &str) -> bool {
        self.tags.write().remove(name);
        self.metrics.remove(name).is_some()
    }

    /// Returns the metric registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Metric> {
        self.metrics.get(name).map(|m| m.value().clone())
    }

    /// Returns the tags of `name`.
    #[must_use]
    pub fn tags(&self, name: &str) -> Option<HashMap<String, String>> {
        self.tags.read().get(name).cloned()
    }

    /// Returns all registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.metrics.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

/// Per-pipeline metrics.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Messages that entered the pipeline.
    pub messages_processed: Arc<Counter>,
    /// Executions that ended with a failure.
    pub processing_errors: Arc<Counter>,
    /// Time spent executing the pipeline.
    pub processing_time: Arc<Timer>,
}

impl PipelineMetrics {
    fn names(pipeline_id: &str) -> [String; 3] {
        [
            format!("{PIPELINE_MESSAGES_PROCESSED}-{pipeline_id}"),
            format!("{PIPELINE_PROCESSING_ERRORS}-{pipeline_id}"),
            format!("{PIPELINE_MESSAGE_PROCESSING_TIME}-{pipeline_id}"),
        ]
    }

    /// Registers these metrics for `pipeline_id`.
    ///
    /// # Errors
    ///
    /// Returns a conflict error if the pipeline's metrics are already
    /// registered.
    pub fn register(&self, registry: &MetricsRegistry, pipeline_id: &str) -> Result<()> {
        let tags = HashMap::from([(PIPELINE_ID_TAG.to_string(), pipeline_id.to_string())]);
        let [processed, errors, time] = Self::names(pipeline_id);
        registry.register(
            processed,
            Metric::Counter(self.messages_processed.clone()),
            tags.clone(),
        )?;
        registry.register(
            errors,
            Metric::Counter(self.processing_errors.clone()),
            tags.clone(),
        )?;
        registry.register(time, Metric::Timer(self.processing_time.clone()), tags)
    }

    /// Removes the metrics of `pipeline_id`.
    pub fn unregister(registry: &MetricsRegistry, pipeline_id: &str) {
        for name in Self::names(pipeline_id) {
            registry.unregister(&name);
        }
    }
}

/// Service-wide metrics.
#[derive(Debug, Default)]
pub struct ServiceMetrics {
    /// Messages handed to the router.
    pub messages_received: Arc<Counter>,
    /// Messages that could not be decoded.
    pub invalid_messages_received: Arc<Counter>,
    /// Objects waiting for retry.
    pub store_forward_queue_size: Arc<Gauge>,
}

impl ServiceMetrics {
    /// Registers the service metrics.
    ///
    /// # Errors
    ///
    /// Returns a conflict error if they are already registered.
    pub fn register(&self, registry: &MetricsRegistry) -> Result<()> {
        registry.register(
            MESSAGES_RECEIVED,
            Metric::Counter(self.messages_received.clone()),
            HashMap::new(),
        )?;
        registry.register(
            INVALID_MESSAGES_RECEIVED,
            Metric::Counter(self.invalid_messages_received.clone()),
            HashMap::new(),
        )?;
        registry.register(
            STORE_FORWARD_QUEUE_SIZE,
            Metric::Gauge(self.store_forward_queue_size.clone()),
            HashMap::new(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_and_gauge() {
        let counter = Counter::default();
        counter.inc();
        counter.inc_by(4);
        assert_eq!(counter.get(), 5);

        let gauge = Gauge::default();
        gauge.set(3);
        gauge.dec();
        gauge.inc();
        gauge.dec();
        assert_eq!(gauge.get(), 2);
    }

    #[test]
    fn test_timer_mean() {
        let timer = Timer::default();
        assert_eq!(timer.mean(), Duration::ZERO);
        timer.record(Duration::from_millis(10));
        timer.record(Duration::from_millis(30));
        assert_eq!(timer.count(), 2);
        assert_eq!(timer.total(), Duration::from_millis(40));
        assert_eq!(timer.mean(), Duration::from_millis(20));
    }

    #[test]
    fn test_timer_guard_records() {
        let timer = Arc::new(Timer::default());
        let guard = timer.start();
        std::thread::sleep(Duration::from_millis(5));
        let elapsed = guard.finish();
        assert!(elapsed >= Duration::from_millis(5));
        assert_eq!(timer.count(), 1);
    }

    #[test]
    fn test_duplicate_registration_conflicts() {
        let registry = MetricsRegistry::new();
        let metrics = PipelineMetrics::default();
        metrics.register(&registry, "p1").unwrap();

        let err = metrics.register(&registry, "p1").unwrap_err();
        assert!(matches!(err, EdgeflowError::Conflict(_)));
        assert_eq!(
            registry
                .tags("PipelineProcessingErrors-p1")
                .unwrap()
                .get(PIPELINE_ID_TAG),
            Some(&"p1".to_string())
        );
    }

    #[test]
    fn test_unregister_pipeline_metrics() {
        let registry = MetricsRegistry::new();
        PipelineMetrics::default().register(&registry, "p1").unwrap();
        assert_eq!(registry.names().len(), 3);

        PipelineMetrics::unregister(&registry, "p1");
        assert!(registry.names().is_empty());
        assert!(registry.tags("PipelineMessagesProcessed-p1").is_none());
    }

    #[test]
    fn test_registered_metric_shares_state() {
        let registry = MetricsRegistry::new();
        let service = ServiceMetrics::default();
        service.register(&registry).unwrap();
        service.messages_received.inc();

        let Some(Metric::Counter(counter)) = registry.get(MESSAGES_RECEIVED) else {
            panic!("expected counter");
        };
        assert_eq!(counter.get(), 1);
    }
}
