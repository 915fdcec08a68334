//! Logging setup and in-process metrics.

mod logging;
mod metrics;

pub use logging::init_tracing;
pub use metrics::{
    Counter, Gauge, Metric, MetricsRegistry, PipelineMetrics, ServiceMetrics, Timer, TimerGuard,
    INVALID_MESSAGES_RECEIVED, MESSAGES_RECEIVED, PIPELINE_ID_TAG, PIPELINE_MESSAGES_PROCESSED,
    PIPELINE_MESSAGE_PROCESSING_TIME, PIPELINE_PROCESSING_ERRORS, STORE_FORWARD_QUEUE_SIZE,
};
