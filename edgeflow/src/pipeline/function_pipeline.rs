//! Immutable pipeline definition.

use crate::functions::AppFunction;
use crate::observability::PipelineMetrics;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Id of the pipeline that receives every message.
pub const DEFAULT_PIPELINE_ID: &str = "default-pipeline";
/// Topic pattern used by the default pipeline.
pub const TOPIC_WILDCARD: &str = "#";

/// An ordered, immutable list of functions with its identity.
///
/// The function list cannot change after construction; replacing a pipeline
/// means registering a new object under the same id.
#[derive(Clone)]
pub struct FunctionPipeline {
    id: String,
    topics: Vec<String>,
    functions: Arc<[Arc<dyn AppFunction>]>,
    version: String,
    store_and_forward: bool,
    metrics: Arc<PipelineMetrics>,
}

impl FunctionPipeline {
    /// Creates a pipeline.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        topics: Vec<String>,
        functions: Vec<Arc<dyn AppFunction>>,
    ) -> Self {
        let version = Self::compute_version(&functions);
        Self {
            id: id.into(),
            topics,
            functions: functions.into(),
            version,
            store_and_forward: true,
            metrics: Arc::new(PipelineMetrics::default()),
        }
    }

    /// Creates the default pipeline, matching every topic.
    #[must_use]
    pub fn default_pipeline(functions: Vec<Arc<dyn AppFunction>>) -> Self {
        Self::new(
            DEFAULT_PIPELINE_ID,
            vec![TOPIC_WILDCARD.to_string()],
            functions,
        )
    }

    /// Opts this pipeline in or out of store-and-forward.
    #[must_use]
    pub const fn with_store_and_forward(mut self, enabled: bool) -> Self {
        self.store_and_forward = enabled;
        self
    }

    // Stored retries carry this value; a pipeline whose function list
    // changed no longer accepts them.
    fn compute_version(functions: &[Arc<dyn AppFunction>]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"Pipeline-functions:");
        for function in functions {
            hasher.update(b" ");
            hasher.update(function.name().as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Returns the pipeline id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the topic patterns.
    #[must_use]
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Returns the functions in execution order.
    #[must_use]
    pub fn functions(&self) -> &[Arc<dyn AppFunction>] {
        &self.functions
    }

    /// Returns the number of functions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Returns true if the pipeline has no functions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Returns the version hash derived from the function names.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns whether failures are persisted for retry.
    #[must_use]
    pub const fn store_and_forward(&self) -> bool {
        self.store_and_forward
    }

    /// Returns the pipeline's metrics.
    #[must_use]
    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }
}

impl fmt::Debug for FunctionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionPipeline")
            .field("id", &self.id)
            .field("topics", &self.topics)
            .field(
                "functions",
                &self.functions.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}
