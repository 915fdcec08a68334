//! The durable record of one failed execution awaiting retry.

use crate::core::DataKind;
use crate::errors::StoreError;
use crate::messaging::base64_bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A failed pipeline execution persisted for replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    /// Unique id, assigned on first store.
    #[serde(default)]
    pub id: String,
    /// Service the data belongs to.
    pub app_service_key: String,
    /// Data to feed the pipeline on retry.
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    /// Kind of value `payload` was encoded from.
    #[serde(default)]
    pub payload_kind: DataKind,
    /// Number of failed retries so far.
    #[serde(default)]
    pub retry_count: u32,
    /// Pipeline to resume.
    pub pipeline_id: String,
    /// Index of the function to resume at.
    #[serde(default)]
    pub pipeline_position: usize,
    /// Version hash of the pipeline at failure time.
    pub version: String,
    /// Correlation id of the original message.
    #[serde(rename = "correlationID", default)]
    pub correlation_id: String,
    /// Content type of the original message.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_type: String,
    /// Context values at failure time.
    #[serde(default)]
    pub context_data: HashMap<String, String>,
    /// Unix timestamp (milliseconds) of the first store.
    #[serde(default)]
    pub created: i64,
}

impl StoredObject {
    /// Creates an object with no id and a zero retry count.
    #[must_use]
    pub fn new(
        app_service_key: impl Into<String>,
        payload: Vec<u8>,
        pipeline_id: impl Into<String>,
        pipeline_position: usize,
        version: impl Into<String>,
        context_data: HashMap<String, String>,
    ) -> Self {
        Self {
            id: String::new(),
            app_service_key: app_service_key.into(),
            payload,
            payload_kind: DataKind::Bytes,
            retry_count: 0,
            pipeline_id: pipeline_id.into(),
            pipeline_position,
            version: version.into(),
            correlation_id: String::new(),
            content_type: String::new(),
            context_data,
            created: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Sets the payload kind.
    #[must_use]
    pub const fn with_payload_kind(mut self, kind: DataKind) -> Self {
        self.payload_kind = kind;
        self
    }

    /// Sets the correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Sets the content type of the original message.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Checks the required fields.
    ///
    /// When `id_required` is false a missing id is generated instead of
    /// rejected.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Contract`] naming the first missing field.
    pub fn validate_contract(&mut self, id_required: bool) -> Result<(), StoreError> {
        if self.id.is_empty() {
            if id_required {
                return Err(StoreError::Contract("ID cannot be empty".into()));
            }
            self.id = Uuid::new_v4().to_string();
        }
        if self.app_service_key.is_empty() {
            return Err(StoreError::Contract("app service key cannot be empty".into()));
        }
        if self.payload.is_empty() {
            return Err(StoreError::Contract("payload cannot be empty".into()));
        }
        if self.version.is_empty() {
            return Err(StoreError::Contract("version cannot be empty".into()));
        }
        Ok(())
    }
}
