//! Pipeline function trait and the built-in function library.
//!
//! Functions are the units of work a pipeline chains together. Each one
//! receives the context and the previous function's output and answers
//! with a [`FunctionOutput`].

mod batch;
pub mod configurable;
mod compression;
mod conversion;
mod export;
mod filters;
mod line_protocol;
mod response;
mod tags;
mod wrap;

pub use batch::{Batch, BatchMode};
pub use compression::{Compression, CompressionAlgorithm};
pub use conversion::{Conversion, ConversionFormat};
pub use export::{HttpExport, HttpExportOptions, HttpMethod, MessageBusExport, HTTP_EXPORT_TIMEOUT};
pub use filters::{Filter, FilterTarget};
pub use line_protocol::ToLineProtocol;
pub use response::ResponseData;
pub use tags::AddTags;
pub use wrap::{ReadingKind, WrapIntoEvent};

use crate::context::FunctionContext;
use crate::core::{FunctionOutput, PipelineData};
use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for pipeline functions.
///
/// Implementations must be safe to call concurrently: one pipeline object
/// serves every message routed to it.
#[async_trait]
pub trait AppFunction: Send + Sync + Debug {
    /// Returns the name of the function.
    fn name(&self) -> &str;

    /// Applies the function.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The context of the message being processed
    /// * `data` - The previous function's output, or the decoded message
    ///
    /// # Returns
    ///
    /// Whether to continue, and the value or error to carry forward.
    async fn apply(&self, ctx: &mut FunctionContext, data: Option<PipelineData>) -> FunctionOutput;
}

/// A simple closure-based function.
pub struct FnFunction<F>
where
    F: Fn(&mut FunctionContext, Option<PipelineData>) -> FunctionOutput + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnFunction<F>
where
    F: Fn(&mut FunctionContext, Option<PipelineData>) -> FunctionOutput + Send + Sync,
{
    /// Creates a new closure-based function.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnFunction<F>
where
    F: Fn(&mut FunctionContext, Option<PipelineData>) -> FunctionOutput + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnFunction")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F> AppFunction for FnFunction<F>
where
    F: Fn(&mut FunctionContext, Option<PipelineData>) -> FunctionOutput + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, ctx: &mut FunctionContext, data: Option<PipelineData>) -> FunctionOutput {
        (self.func)(ctx, data)
    }
}

/// A function that forwards its input unchanged.
#[derive(Debug, Clone)]
pub struct PassThrough {
    name: String,
}

impl PassThrough {
    /// Creates a new pass-through function.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl AppFunction for PassThrough {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, _ctx: &mut FunctionContext, data: Option<PipelineData>) -> FunctionOutput {
        FunctionOutput::proceed_with(data)
    }
}
