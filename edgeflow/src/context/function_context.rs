//! Per-message execution state handed to every pipeline function.

use crate::errors::{EdgeflowError, Result};
use crate::messaging::{MessageClient, MessageEnvelope};
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::debug;
use uuid::Uuid;

/// Reserved value key holding the id of the executing pipeline.
pub const PIPELINE_ID_KEY: &str = "pipelineid";
/// Value key holding the topic the message arrived on.
pub const RECEIVED_TOPIC_KEY: &str = "receivedtopic";
/// Value key holding the event's device name.
pub const DEVICE_NAME_KEY: &str = "devicename";
/// Value key holding the event's profile name.
pub const PROFILE_NAME_KEY: &str = "profilename";
/// Value key holding the event's source name.
pub const SOURCE_NAME_KEY: &str = "sourcename";

static PLACEHOLDER: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\{[^}]*\}").ok());

/// The mutable state of one message flowing through one pipeline.
///
/// Created by the router for each inbound message and cloned once per
/// matched pipeline. Cloning deep-copies the value map, so pipelines that
/// run concurrently never observe each other's mutations.
#[derive(Clone, Default)]
pub struct FunctionContext {
    correlation_id: String,
    input_content_type: String,
    response_data: Option<Vec<u8>>,
    response_content_type: Option<String>,
    retry_data: Option<Vec<u8>>,
    retry_triggered: bool,
    values: HashMap<String, String>,
    publish_topic: Option<String>,
    message_client: Option<Arc<dyn MessageClient>>,
}

impl FunctionContext {
    /// Creates a context. A blank correlation id is replaced with a new one.
    #[must_use]
    pub fn new(correlation_id: impl Into<String>, input_content_type: impl Into<String>) -> Self {
        let mut correlation_id = correlation_id.into();
        if correlation_id.is_empty() {
            correlation_id = Uuid::new_v4().to_string();
        }
        Self {
            correlation_id,
            input_content_type: input_content_type.into(),
            ..Self::default()
        }
    }

    /// Attaches the message client used by `publish`.
    #[must_use]
    pub fn with_message_client(mut self, client: Arc<dyn MessageClient>) -> Self {
        self.message_client = Some(client);
        self
    }

    /// Sets the default topic used by `publish`.
    #[must_use]
    pub fn with_publish_topic(mut self, topic: impl Into<String>) -> Self {
        self.publish_topic = Some(topic.into());
        self
    }

    /// Returns the correlation id.
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Replaces the correlation id.
    pub fn override_correlation_id(&mut self, correlation_id: impl Into<String>) {
        self.correlation_id = correlation_id.into();
    }

    /// Returns the content type of the inbound payload.
    #[must_use]
    pub fn input_content_type(&self) -> &str {
        &self.input_content_type
    }

    /// Returns the response payload, if a function set one.
    #[must_use]
    pub fn response_data(&self) -> Option<&[u8]> {
        self.response_data.as_deref()
    }

    /// Sets the response payload.
    pub fn set_response_data(&mut self, data: Vec<u8>) {
        self.response_data = Some(data);
    }

    /// Returns the response content type, if set.
    #[must_use]
    pub fn response_content_type(&self) -> Option<&str> {
        self.response_content_type.as_deref()
    }

    /// Sets the response content type.
    pub fn set_response_content_type(&mut self, content_type: impl Into<String>) {
        self.response_content_type = Some(content_type.into());
    }

    /// Returns the payload to persist if the current function fails.
    #[must_use]
    pub fn retry_data(&self) -> Option<&[u8]> {
        self.retry_data.as_deref()
    }

    /// Sets (or clears) the payload to persist if the current function fails.
    pub fn set_retry_data(&mut self, data: Option<Vec<u8>>) {
        self.retry_data = data;
    }

    /// Requests a store-and-forward retry pass once this pipeline succeeds.
    ///
    /// Export functions call this after a successful send: the remote end is
    /// reachable again, so previously stored failures are worth retrying now.
    pub fn trigger_retry_failed_data(&mut self) {
        self.retry_triggered = true;
    }

    /// Returns whether a retry pass was requested.
    #[must_use]
    pub const fn retry_triggered(&self) -> bool {
        self.retry_triggered
    }

    /// Clears the retry request.
    pub fn clear_retry_trigger(&mut self) {
        self.retry_triggered = false;
    }

    /// Stores a value. Keys are case-insensitive.
    pub fn add_value(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.values.insert(key.as_ref().to_lowercase(), value.into());
    }

    /// Removes a value.
    pub fn remove_value(&mut self, key: &str) {
        self.values.remove(&key.to_lowercase());
    }

    /// Looks up a value, returning `(value, found)`.
    #[must_use]
    pub fn get_value(&self, key: &str) -> (String, bool) {
        self.values
            .get(&key.to_lowercase())
            .map_or_else(|| (String::new(), false), |v| (v.clone(), true))
    }

    /// Looks up a value.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(&key.to_lowercase()).map(String::as_str)
    }

    /// Returns a copy of all values.
    #[must_use]
    pub fn get_values(&self) -> HashMap<String, String> {
        self.values.clone()
    }

    /// Returns the id of the executing pipeline.
    #[must_use]
    pub fn pipeline_id(&self) -> &str {
        self.value(PIPELINE_ID_KEY).unwrap_or_default()
    }

    /// Replaces `{key}` placeholders with context values.
    ///
    /// Every placeholder must resolve; any that do not are reported together.
    pub fn apply_values(&self, format: &str) -> Result<String> {
        let Some(re) = PLACEHOLDER.as_ref() else {
            return Err(EdgeflowError::Contract("placeholder pattern unavailable".into()));
        };

        let mut missing = Vec::new();
        let resolved = re.replace_all(format, |caps: &regex::Captures<'_>| {
            let placeholder = &caps[0];
            let key = &placeholder[1..placeholder.len() - 1];
            self.value(key).map_or_else(
                || {
                    missing.push(placeholder.to_string());
                    placeholder.to_string()
                },
                str::to_string,
            )
        });

        if missing.is_empty() {
            Ok(resolved.into_owned())
        } else {
            Err(EdgeflowError::Contract(format!(
                "failed to replace all context placeholders in '{format}': {} not found",
                missing.join(", ")
            )))
        }
    }

    /// Publishes `data` to the configured publish topic.
    pub async fn publish(&self, data: Vec<u8>, content_type: &str) -> Result<()> {
        let topic = self.publish_topic.clone().ok_or_else(|| {
            EdgeflowError::Messaging("no publish topic configured".to_string())
        })?;
        self.publish_with_topic(&topic, data, content_type).await
    }

    /// Publishes `data` to `topic` after resolving its placeholders.
    pub async fn publish_with_topic(
        &self,
        topic: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        let client = self.message_client.as_ref().ok_or_else(|| {
            EdgeflowError::Messaging("no message client configured".to_string())
        })?;
        let topic = self.apply_values(topic)?;
        let envelope =
            MessageEnvelope::new(data, content_type).with_correlation_id(&self.correlation_id);

        debug!(
            topic = %topic,
            correlation_id = %self.correlation_id,
            pipeline_id = self.pipeline_id(),
            "Publishing from pipeline function"
        );
        client.publish(envelope, &topic).await
    }
}

impl std::fmt::Debug for FunctionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionContext")
            .field("correlation_id", &self.correlation_id)
            .field("input_content_type", &self.input_content_type)
            .field("values", &self.values)
            .field("has_response", &self.response_data.is_some())
            .field("retry_triggered", &self.retry_triggered)
            .finish_non_exhaustive()
    }
}
