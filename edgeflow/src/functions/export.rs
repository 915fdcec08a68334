//! Export functions that send pipeline data out of the service.
//!
//! Both exporters cooperate with store-and-forward. With `persist_on_error`
//! set, a failed send records the payload as retry data before failing, and
//! a successful send asks for stored data to be retried.

use super::AppFunction;
use crate::context::FunctionContext;
use crate::core::{FunctionOutput, PipelineData};
use crate::errors::FunctionError;
use crate::messaging::CONTENT_TYPE_JSON;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error};

/// Timeout applied to each HTTP export request.
pub const HTTP_EXPORT_TIMEOUT: Duration = Duration::from_secs(30);

fn export_payload(
    function: &str,
    ctx: &FunctionContext,
    data: &PipelineData,
) -> Result<Vec<u8>, FunctionError> {
    data.to_bytes().map_err(|e| {
        FunctionError::contract_invalid(format!(
            "function {function} in pipeline '{}': unable to encode export data: {e}",
            ctx.pipeline_id()
        ))
    })
}

/// Publishes the data to a message-bus topic.
///
/// The topic may contain `{key}` placeholders resolved from the context.
#[derive(Debug, Clone)]
pub struct MessageBusExport {
    topic: String,
    content_type: String,
    persist_on_error: bool,
}

impl MessageBusExport {
    /// Creates an exporter publishing JSON to `topic`.
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            content_type: CONTENT_TYPE_JSON.to_string(),
            persist_on_error: false,
        }
    }

    /// Sets the content type of published envelopes.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Stores the payload for retry when publishing fails.
    #[must_use]
    pub const fn with_persist_on_error(mut self, persist_on_error: bool) -> Self {
        self.persist_on_error = persist_on_error;
        self
    }
}

#[async_trait]
impl AppFunction for MessageBusExport {
    fn name(&self) -> &str {
        "MessageBusExport"
    }

    async fn apply(&self, ctx: &mut FunctionContext, data: Option<PipelineData>) -> FunctionOutput {
        let Some(data) = data else {
            return FunctionOutput::fail(FunctionError::server_error(format!(
                "function MessageBusExport in pipeline '{}': No Data Received",
                ctx.pipeline_id()
            )));
        };
        let payload = match export_payload(self.name(), ctx, &data) {
            Ok(payload) => payload,
            Err(e) => return FunctionOutput::fail(e),
        };
        let size = payload.len();

        let published = ctx
            .publish_with_topic(&self.topic, payload.clone(), &self.content_type)
            .await;
        match published {
            Ok(()) => {
                if self.persist_on_error {
                    ctx.trigger_retry_failed_data();
                }
                debug!(
                    pipeline_id = ctx.pipeline_id(),
                    topic = %self.topic,
                    bytes = size,
                    "Exported data to message bus"
                );
                FunctionOutput::proceed_with(None)
            }
            Err(e) => {
                error!(pipeline_id = ctx.pipeline_id(), error = %e, "Message bus export failed");
                if self.persist_on_error {
                    ctx.set_retry_data(Some(payload));
                }
                FunctionOutput::fail(FunctionError::server_error(format!(
                    "failed to publish message in pipeline '{}': {e}",
                    ctx.pipeline_id()
                )))
            }
        }
    }
}

/// HTTP method used by an [`HttpExport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// `POST`
    Post,
    /// `PUT`
    Put,
}

impl HttpMethod {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
        }
    }
}

/// Settings of an [`HttpExport`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpExportOptions {
    /// Target URL. May contain `{key}` placeholders.
    pub url: String,
    /// Content type of the request. Empty means JSON.
    pub mime_type: String,
    /// Store the payload for retry when the request fails.
    pub persist_on_error: bool,
    /// Continue the pipeline with the input data when the request fails.
    pub continue_on_send_error: bool,
    /// Pass the input data on instead of the response body.
    pub return_input_data: bool,
    /// Extra request headers.
    pub headers: HashMap<String, String>,
}

/// Sends the data to an HTTP endpoint.
///
/// On success the function continues with the response body, or with its
/// input when `return_input_data` is set so that several exports can be
/// chained.
#[derive(Debug, Clone)]
pub struct HttpExport {
    method: HttpMethod,
    options: HttpExportOptions,
    client: reqwest::Client,
}

impl HttpExport {
    /// Creates the exporter.
    ///
    /// `persist_on_error` and `continue_on_send_error` exclude each other,
    /// and `continue_on_send_error` needs `return_input_data`.
    pub fn new(method: HttpMethod, mut options: HttpExportOptions) -> Result<Self, FunctionError> {
        if options.persist_on_error && options.continue_on_send_error {
            return Err(FunctionError::contract_invalid(
                "persistOnError & continueOnSendError can not both be set to true for HTTP Export",
            ));
        }
        if options.continue_on_send_error && !options.return_input_data {
            return Err(FunctionError::contract_invalid(
                "continueOnSendError can only be used in conjunction returnInputData for multiple HTTP Export",
            ));
        }
        if options.mime_type.is_empty() {
            options.mime_type = CONTENT_TYPE_JSON.to_string();
        }
        let client = reqwest::Client::builder()
            .timeout(HTTP_EXPORT_TIMEOUT)
            .build()
            .map_err(|e| FunctionError::server_error(format!("unable to build HTTP client: {e}")))?;
        Ok(Self {
            method,
            options,
            client,
        })
    }

    async fn send(&self, url: &str, payload: Vec<u8>) -> Result<Vec<u8>, reqwest::Error> {
        let mut request = self
            .client
            .request(self.method.as_reqwest(), url)
            .header(reqwest::header::CONTENT_TYPE, self.options.mime_type.as_str());
        for (key, value) in &self.options.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        let response = request.body(payload).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl AppFunction for HttpExport {
    fn name(&self) -> &str {
        match self.method {
            HttpMethod::Post => "HTTPPost",
            HttpMethod::Put => "HTTPPut",
        }
    }

    async fn apply(&self, ctx: &mut FunctionContext, data: Option<PipelineData>) -> FunctionOutput {
        let Some(data) = data else {
            return FunctionOutput::fail(FunctionError::no_data(self.name(), ctx.pipeline_id()));
        };
        let payload = match export_payload(self.name(), ctx, &data) {
            Ok(payload) => payload,
            Err(e) => return FunctionOutput::fail(e),
        };
        let url = match ctx.apply_values(&self.options.url) {
            Ok(url) => url,
            Err(e) => return FunctionOutput::fail(FunctionError::contract_invalid(e.to_string())),
        };
        let size = payload.len();

        match self.send(&url, payload.clone()).await {
            Ok(body) => {
                if self.options.persist_on_error {
                    ctx.trigger_retry_failed_data();
                }
                debug!(
                    pipeline_id = ctx.pipeline_id(),
                    url = %url,
                    bytes = size,
                    "Exported data over HTTP"
                );
                if self.options.return_input_data {
                    FunctionOutput::proceed(data)
                } else {
                    FunctionOutput::proceed(body)
                }
            }
            Err(e) if self.options.continue_on_send_error => {
                error!(
                    pipeline_id = ctx.pipeline_id(),
                    url = %url,
                    error = %e,
                    "Continuing pipeline on HTTP export error"
                );
                FunctionOutput::proceed(data)
            }
            Err(e) => {
                error!(pipeline_id = ctx.pipeline_id(), url = %url, error = %e, "HTTP export failed");
                if self.options.persist_on_error {
                    ctx.set_retry_data(Some(payload));
                }
                FunctionOutput::fail(FunctionError::server_error(format!(
                    "function {} in pipeline '{}': {e}",
                    self.name(),
                    ctx.pipeline_id()
                )))
            }
        }
    }
}
