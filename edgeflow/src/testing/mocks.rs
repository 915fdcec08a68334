//! Mock pipeline functions for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::context::FunctionContext;
use crate::core::{FunctionOutput, PipelineData};
use crate::errors::FunctionError;
use crate::functions::AppFunction;

/// Passes data through and counts calls.
#[derive(Debug)]
pub struct CountingFunction {
    name: String,
    calls: AtomicUsize,
}

impl CountingFunction {
    /// Creates a new counting function.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns the number of calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AppFunction for CountingFunction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, _ctx: &mut FunctionContext, data: Option<PipelineData>) -> FunctionOutput {
        self.calls.fetch_add(1, Ordering::SeqCst);
        FunctionOutput::proceed_with(data)
    }
}

/// Fails, optionally only for its first few calls.
///
/// Can set retry data before failing, the way an export function does.
#[derive(Debug)]
pub struct FailingFunction {
    name: String,
    failures: Option<usize>,
    retry_data: Option<Vec<u8>>,
    calls: AtomicUsize,
}

impl FailingFunction {
    /// Creates a function that always fails.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failures: None,
            retry_data: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Creates a function that fails `n` times and then passes data through.
    #[must_use]
    pub fn fail_first(name: impl Into<String>, n: usize) -> Self {
        Self {
            failures: Some(n),
            ..Self::new(name)
        }
    }

    /// Sets retry data on the context before failing.
    #[must_use]
    pub fn with_retry_data(mut self, data: Vec<u8>) -> Self {
        self.retry_data = Some(data);
        self
    }

    /// Returns the number of calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AppFunction for FailingFunction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, ctx: &mut FunctionContext, data: Option<PipelineData>) -> FunctionOutput {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failures.is_some_and(|n| call >= n) {
            return FunctionOutput::proceed_with(data);
        }
        if self.retry_data.is_some() {
            ctx.set_retry_data(self.retry_data.clone());
        }
        FunctionOutput::fail(FunctionError::server_error(format!(
            "function {} in pipeline '{}' failed (call {})",
            self.name,
            ctx.pipeline_id(),
            call + 1
        )))
    }
}

/// What a [`RecordingFunction`] saw on one call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Correlation id of the context.
    pub correlation_id: String,
    /// Context values at call time.
    pub values: HashMap<String, String>,
    /// The input data.
    pub data: Option<PipelineData>,
}

/// Records every call and passes data through.
#[derive(Debug)]
pub struct RecordingFunction {
    name: String,
    writes: Vec<(String, String)>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl RecordingFunction {
    /// Creates a new recording function.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            writes: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Adds `key = value` to the context on every call, after recording.
    #[must_use]
    pub fn writing(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.writes.push((key.into(), value.into()));
        self
    }

    /// Returns the recorded calls.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl AppFunction for RecordingFunction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, ctx: &mut FunctionContext, data: Option<PipelineData>) -> FunctionOutput {
        self.calls.lock().push(RecordedCall {
            correlation_id: ctx.correlation_id().to_string(),
            values: ctx.get_values(),
            data: data.clone(),
        });
        for (key, value) in &self.writes {
            ctx.add_value(key, value.as_str());
        }
        FunctionOutput::proceed_with(data)
    }
}

/// Sleeps before passing data through.
#[derive(Debug)]
pub struct SlowFunction {
    name: String,
    delay: Duration,
}

impl SlowFunction {
    /// Creates a new slow function.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
        }
    }
}

#[async_trait]
impl AppFunction for SlowFunction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, _ctx: &mut FunctionContext, data: Option<PipelineData>) -> FunctionOutput {
        tokio::time::sleep(self.delay).await;
        FunctionOutput::proceed_with(data)
    }
}
