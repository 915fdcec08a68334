//! Registered pipelines, in registration order.

use super::{FunctionPipeline, TopicMatcher, DEFAULT_PIPELINE_ID, TOPIC_WILDCARD};
use crate::errors::{EdgeflowError, Result};
use crate::functions::AppFunction;
use crate::observability::{MetricsRegistry, PipelineMetrics};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Holds the pipelines the router dispatches to.
///
/// Lookups are read-mostly; registration happens during bootstrap before
/// dispatch starts.
#[derive(Debug, Default)]
pub struct PipelineRegistry {
    pipelines: RwLock<Vec<Arc<FunctionPipeline>>>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl PipelineRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers pipeline metrics with `metrics` as pipelines are added.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Adds a new pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`EdgeflowError::Conflict`] if a pipeline with the same id is
    /// already registered.
    pub fn add_function_pipeline(&self, pipeline: FunctionPipeline) -> Result<Arc<FunctionPipeline>> {
        let pipeline = Arc::new(pipeline);
        {
            let mut pipelines = self.pipelines.write();
            if pipelines.iter().any(|p| p.id() == pipeline.id()) {
                return Err(EdgeflowError::Conflict(format!(
                    "pipeline with id '{}' already exists",
                    pipeline.id()
                )));
            }
            pipelines.push(Arc::clone(&pipeline));
        }
        self.register_metrics(&pipeline);
        info!(
            pipeline_id = pipeline.id(),
            topics = ?pipeline.topics(),
            functions = pipeline.len(),
            "pipeline added"
        );
        Ok(pipeline)
    }

    /// Sets the functions of the default pipeline, which matches every topic.
    ///
    /// Creates the default pipeline if needed; otherwise replaces it.
    pub fn set_default_functions_pipeline(
        &self,
        functions: Vec<Arc<dyn AppFunction>>,
    ) -> Arc<FunctionPipeline> {
        let pipeline = FunctionPipeline::new(
            DEFAULT_PIPELINE_ID,
            vec![TOPIC_WILDCARD.to_string()],
            functions,
        );
        self.replace_or_add(pipeline)
    }

    /// Replaces the functions of the pipeline registered as `id`.
    ///
    /// The topics and store-and-forward setting are kept; the pipeline
    /// object itself is replaced, so executions already running finish with
    /// the old functions.
    ///
    /// # Errors
    ///
    /// Returns [`EdgeflowError::NotFound`] if `id` is not registered.
    pub fn set_functions_pipeline_transforms(
        &self,
        id: &str,
        functions: Vec<Arc<dyn AppFunction>>,
    ) -> Result<Arc<FunctionPipeline>> {
        let existing = self
            .get_pipeline_by_id(id)
            .ok_or_else(|| EdgeflowError::NotFound(format!("pipeline with id '{id}' not found")))?;
        let pipeline = FunctionPipeline::new(id, existing.topics().to_vec(), functions)
            .with_store_and_forward(existing.store_and_forward());
        Ok(self.replace_or_add(pipeline))
    }

    fn replace_or_add(&self, pipeline: FunctionPipeline) -> Arc<FunctionPipeline> {
        let pipeline = Arc::new(pipeline);
        let replaced = {
            let mut pipelines = self.pipelines.write();
            match pipelines.iter_mut().find(|p| p.id() == pipeline.id()) {
                Some(slot) => {
                    *slot = Arc::clone(&pipeline);
                    true
                }
                None => {
                    pipelines.push(Arc::clone(&pipeline));
                    false
                }
            }
        };
        if replaced {
            self.unregister_metrics(pipeline.id());
        }
        self.register_metrics(&pipeline);
        debug!(
            pipeline_id = pipeline.id(),
            version = pipeline.version(),
            replaced,
            "pipeline functions set"
        );
        pipeline
    }

    /// Removes every pipeline.
    pub fn remove_all_function_pipelines(&self) {
        let removed: Vec<_> = self.pipelines.write().drain(..).collect();
        for pipeline in &removed {
            self.unregister_metrics(pipeline.id());
        }
        debug!(count = removed.len(), "all pipelines removed");
    }

    /// Returns the pipeline registered as `id`.
    #[must_use]
    pub fn get_pipeline_by_id(&self, id: &str) -> Option<Arc<FunctionPipeline>> {
        self.pipelines.read().iter().find(|p| p.id() == id).cloned()
    }

    /// Returns the pipelines whose topics match `topic`, in registration
    /// order.
    #[must_use]
    pub fn matching(&self, topic: &str, matcher: &TopicMatcher) -> Vec<Arc<FunctionPipeline>> {
        self.pipelines
            .read()
            .iter()
            .filter(|p| matcher.matches_any(p.topics(), topic))
            .cloned()
            .collect()
    }

    /// Returns every pipeline, in registration order.
    #[must_use]
    pub fn pipelines(&self) -> Vec<Arc<FunctionPipeline>> {
        self.pipelines.read().clone()
    }

    /// Returns the number of registered pipelines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pipelines.read().len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pipelines.read().is_empty()
    }

    fn register_metrics(&self, pipeline: &FunctionPipeline) {
        if let Some(registry) = &self.metrics {
            if let Err(e) = pipeline.metrics().register(registry, pipeline.id()) {
                error!(
                    pipeline_id = pipeline.id(),
                    error = %e,
                    "unable to register pipeline metrics; collection continues unreported"
                );
            }
        }
    }

    fn unregister_metrics(&self, pipeline_id: &str) {
        if let Some(registry) = &self.metrics {
            PipelineMetrics::unregister(registry, pipeline_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::PassThrough;

    fn pass(name: &str) -> Arc<dyn AppFunction> {
        Arc::new(PassThrough::new(name))
    }

    #[test]
    fn test_add_rejects_duplicate_id() {
        let registry = PipelineRegistry::new();
        registry
            .add_function_pipeline(FunctionPipeline::new("p1", vec!["a".into()], vec![pass("f")]))
            .unwrap();
        let err = registry
            .add_function_pipeline(FunctionPipeline::new("p1", vec!["b".into()], vec![]))
            .unwrap_err();
        assert!(matches!(err, EdgeflowError::Conflict(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_set_default_replaces_default() {
        let registry = PipelineRegistry::new();
        let first = registry.set_default_functions_pipeline(vec![pass("a")]);
        let second = registry.set_default_functions_pipeline(vec![pass("b")]);

        assert_eq!(registry.len(), 1);
        assert_ne!(first.version(), second.version());
        let current = registry.get_pipeline_by_id(DEFAULT_PIPELINE_ID).unwrap();
        assert_eq!(current.version(), second.version());
    }

    #[test]
    fn test_set_transforms_keeps_topics() {
        let registry = PipelineRegistry::new();
        registry
            .add_function_pipeline(
                FunctionPipeline::new("p1", vec!["events/#".into()], vec![pass("a")])
                    .with_store_and_forward(false),
            )
            .unwrap();

        let replaced = registry
            .set_functions_pipeline_transforms("p1", vec![pass("a"), pass("b")])
            .unwrap();
        assert_eq!(replaced.topics(), &["events/#".to_string()]);
        assert_eq!(replaced.len(), 2);
        assert!(!replaced.store_and_forward());

        assert!(registry
            .set_functions_pipeline_transforms("missing", vec![])
            .is_err());
    }

    #[test]
    fn test_matching_in_registration_order() {
        let registry = PipelineRegistry::new();
        for (id, topic) in [("b", "events/#"), ("a", "events/+/temperature"), ("c", "alerts")] {
            registry
                .add_function_pipeline(FunctionPipeline::new(id, vec![topic.into()], vec![]))
                .unwrap();
        }
        registry.set_default_functions_pipeline(vec![]);

        let ids: Vec<String> = registry
            .matching("events/d1/temperature", &TopicMatcher::default())
            .iter()
            .map(|p| p.id().to_string())
            .collect();
        assert_eq!(ids, vec!["b", "a", DEFAULT_PIPELINE_ID]);
    }

    #[test]
    fn test_metrics_follow_pipeline_lifecycle() {
        let metrics = Arc::new(MetricsRegistry::new());
        let registry = PipelineRegistry::new().with_metrics(metrics.clone());
        registry.set_default_functions_pipeline(vec![pass("a")]);
        registry.set_default_functions_pipeline(vec![pass("b")]);
        assert_eq!(metrics.names().len(), 3);

        registry.remove_all_function_pipelines();
        assert!(registry.is_empty());
        assert!(metrics.names().is_empty());
    }
}
