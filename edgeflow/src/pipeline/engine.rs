//! Sequential execution of one pipeline over one message.

use super::FunctionPipeline;
use crate::cancellation::CancellationToken;
use crate::context::FunctionContext;
use crate::core::{DataKind, PipelineData};
use crate::errors::{FunctionError, MessageError};
use crate::storeforward::StoreForward;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// How one pipeline execution ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Every function continued; holds the last function's result.
    Completed(Option<PipelineData>),
    /// A function stopped the pipeline without an error.
    Halted {
        /// Index of the halting function.
        at: usize,
    },
    /// A function stopped the pipeline with an error.
    Failed {
        /// Index of the failing function.
        at: usize,
        /// The reported error.
        error: MessageError,
    },
    /// Shutdown was requested before the function at `at` could run.
    Cancelled {
        /// Index of the first function that did not run.
        at: usize,
    },
}

impl ExecutionOutcome {
    /// Returns true unless the execution failed or was cancelled.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Halted { .. })
    }

    /// Returns the error of a failed or cancelled execution.
    #[must_use]
    pub fn error(&self) -> Option<MessageError> {
        match self {
            Self::Failed { error, .. } => Some(error.clone()),
            Self::Cancelled { at } => Some(MessageError {
                error: FunctionError::new(
                    crate::errors::ErrorKind::ServiceUnavailable,
                    format!("pipeline execution cancelled before function #{at}"),
                ),
                status_code: MessageError::CANCELLED,
            }),
            Self::Completed(_) | Self::Halted { .. } => None,
        }
    }
}

/// Drives a pipeline's functions against a context and input value.
///
/// The engine keeps no per-execution state, so one instance is shared by
/// every concurrent dispatch. Failed live executions are handed to
/// store-and-forward when it is attached and enabled for the pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipelineEngine {
    store_forward: Option<Arc<StoreForward>>,
    cancellation: Option<Arc<CancellationToken>>,
}

impl PipelineEngine {
    /// Creates an engine without persistence or cancellation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches store-and-forward for failed executions.
    #[must_use]
    pub fn with_store_forward(mut self, store_forward: Arc<StoreForward>) -> Self {
        self.store_forward = Some(store_forward);
        self
    }

    /// Attaches the shutdown signal checked before each function.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Runs the whole pipeline as a live execution.
    pub async fn run(
        &self,
        ctx: &mut FunctionContext,
        pipeline: &FunctionPipeline,
        data: Option<PipelineData>,
    ) -> ExecutionOutcome {
        self.execute(ctx, pipeline, data, 0, false).await
    }

    /// Runs `pipeline` starting at `start_position`.
    ///
    /// `is_retry` marks replays from store-and-forward; those are never
    /// persisted again by the engine and never trigger another retry pass.
    pub async fn execute(
        &self,
        ctx: &mut FunctionContext,
        pipeline: &FunctionPipeline,
        data: Option<PipelineData>,
        start_position: usize,
        is_retry: bool,
    ) -> ExecutionOutcome {
        let metrics = pipeline.metrics();
        metrics.messages_processed.inc();
        let timer = metrics.processing_time.start();

        let persist = !is_retry && self.persistence_enabled(pipeline);
        let original = if persist { data.clone() } else { None };

        let mut current = data;
        for (index, function) in pipeline
            .functions()
            .iter()
            .enumerate()
            .skip(start_position)
        {
            if self.cancellation.as_ref().is_some_and(|t| t.is_cancelled()) {
                warn!(
                    pipeline_id = pipeline.id(),
                    function_index = index,
                    correlation_id = ctx.correlation_id(),
                    "pipeline execution abandoned at shutdown"
                );
                timer.finish();
                return ExecutionOutcome::Cancelled { at: index };
            }

            ctx.set_retry_data(None);
            let output = function.apply(ctx, current.take()).await;

            if let Some(err) = output.error {
                error!(
                    pipeline_id = pipeline.id(),
                    function_index = index,
                    function = function.name(),
                    correlation_id = ctx.correlation_id(),
                    error = %err,
                    "pipeline function failed"
                );
                metrics.processing_errors.inc();
                if persist {
                    self.persist_failure(ctx, pipeline, index, original).await;
                }
                timer.finish();
                return ExecutionOutcome::Failed {
                    at: index,
                    error: MessageError::function_failure(err),
                };
            }

            if !output.status.should_continue() {
                debug!(
                    pipeline_id = pipeline.id(),
                    function_index = index,
                    correlation_id = ctx.correlation_id(),
                    "pipeline halted"
                );
                timer.finish();
                return ExecutionOutcome::Halted { at: index };
            }

            current = output.data;

            if !is_retry && ctx.retry_triggered() {
                if let Some(store_forward) = &self.store_forward {
                    let store_forward = Arc::clone(store_forward);
                    tokio::spawn(async move { store_forward.trigger_retry().await });
                }
                ctx.clear_retry_trigger();
            }
        }

        timer.finish();
        ExecutionOutcome::Completed(current)
    }

    fn persistence_enabled(&self, pipeline: &FunctionPipeline) -> bool {
        pipeline.store_and_forward()
            && self
                .store_forward
                .as_ref()
                .is_some_and(|sf| sf.is_enabled())
    }

    // Retry data set by the failing function resumes at that function;
    // otherwise the original input is replayed from the start.
    async fn persist_failure(
        &self,
        ctx: &FunctionContext,
        pipeline: &FunctionPipeline,
        index: usize,
        original: Option<PipelineData>,
    ) {
        let Some(store_forward) = &self.store_forward else {
            return;
        };

        let (payload, kind, position) = if let Some(retry) = ctx.retry_data() {
            (retry.to_vec(), DataKind::Bytes, index)
        } else if let Some(input) = original {
            match input.to_bytes() {
                Ok(bytes) => (bytes, input.kind(), 0),
                Err(e) => {
                    error!(
                        pipeline_id = pipeline.id(),
                        correlation_id = ctx.correlation_id(),
                        error = %e,
                        "failed to serialize pipeline input for later retry"
                    );
                    return;
                }
            }
        } else {
            warn!(
                pipeline_id = pipeline.id(),
                correlation_id = ctx.correlation_id(),
                "failed execution had no data to store for retry"
            );
            return;
        };

        if let Err(e) = store_forward
            .store_for_later_retry(payload, kind, ctx, pipeline, position)
            .await
        {
            error!(
                pipeline_id = pipeline.id(),
                correlation_id = ctx.correlation_id(),
                error = %e,
                "failed to store item for later retry"
            );
        }
    }
}
