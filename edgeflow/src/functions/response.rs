//! Response data capture.

use super::AppFunction;
use crate::context::FunctionContext;
use crate::core::{FunctionOutput, PipelineData};
use crate::errors::FunctionError;
use async_trait::async_trait;

/// Stores the incoming data as the context's response payload and forwards
/// the data unchanged.
#[derive(Debug, Clone, Default)]
pub struct ResponseData {
    content_type: Option<String>,
}

impl ResponseData {
    /// Creates the function without a content type override.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also sets the response content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        let content_type = content_type.into();
        self.content_type = (!content_type.is_empty()).then_some(content_type);
        self
    }
}

#[async_trait]
impl AppFunction for ResponseData {
    fn name(&self) -> &str {
        "SetResponseData"
    }

    async fn apply(&self, ctx: &mut FunctionContext, data: Option<PipelineData>) -> FunctionOutput {
        let Some(data) = data else {
            return FunctionOutput::fail(FunctionError::no_data(self.name(), ctx.pipeline_id()));
        };
        let bytes = match data.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                return FunctionOutput::fail(FunctionError::server_error(format!(
                    "function {} in pipeline '{}': unable to encode response: {e}",
                    self.name(),
                    ctx.pipeline_id()
                )))
            }
        };

        if let Some(content_type) = &self.content_type {
            ctx.set_response_content_type(content_type.clone());
        }
        ctx.set_response_data(bytes);
        FunctionOutput::proceed(data)
    }
}
