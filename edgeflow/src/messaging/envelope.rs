//! Message envelope wire shape.

use crate::core::API_VERSION;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// JSON content type, the envelope default.
pub const CONTENT_TYPE_JSON: &str = "application/json";
/// Plain text content type.
pub const CONTENT_TYPE_TEXT: &str = "text/plain";
/// XML content type.
pub const CONTENT_TYPE_XML: &str = "application/xml";

fn default_content_type() -> String {
    CONTENT_TYPE_JSON.to_string()
}

fn default_api_version() -> String {
    API_VERSION.to_string()
}

/// Serde helpers encoding a byte payload as a base64 string.
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// A message as carried on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    /// API version.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Topic the message was received on.
    #[serde(default)]
    pub received_topic: String,
    /// Correlation id propagated through the pipeline.
    #[serde(rename = "correlationID", default)]
    pub correlation_id: String,
    /// Request id.
    #[serde(rename = "requestID", default)]
    pub request_id: String,
    /// Error code (0 when none).
    #[serde(default)]
    pub error_code: i32,
    /// Payload bytes, base64 in JSON.
    #[serde(with = "base64_bytes", default)]
    pub payload: Vec<u8>,
    /// Payload content type.
    #[serde(default = "default_content_type")]
    pub content_type: String,
    /// Query parameters (HTTP-originated messages).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub query_params: HashMap<String, String>,
}

impl MessageEnvelope {
    /// Creates an envelope with a fresh correlation id.
    #[must_use]
    pub fn new(payload: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            api_version: default_api_version(),
            received_topic: String::new(),
            correlation_id: Uuid::new_v4().to_string(),
            request_id: String::new(),
            error_code: 0,
            payload: payload.into(),
            content_type: content_type.into(),
            query_params: HashMap::new(),
        }
    }

    /// Sets the received topic.
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.received_topic = topic.into();
        self
    }

    /// Sets the correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Sets the query parameters.
    #[must_use]
    pub fn with_query_params(mut self, params: HashMap<String, String>) -> Self {
        self.query_params = params;
        self
    }

    /// Returns the content type, defaulting to JSON when blank.
    #[must_use]
    pub fn content_type_or_default(&self) -> &str {
        if self.content_type.is_empty() {
            CONTENT_TYPE_JSON
        } else {
            &self.content_type
        }
    }
}
