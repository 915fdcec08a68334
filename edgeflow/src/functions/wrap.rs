//! Wraps arbitrary pipeline data into an event.

use super::AppFunction;
use crate::context::{FunctionContext, DEVICE_NAME_KEY, PROFILE_NAME_KEY, SOURCE_NAME_KEY};
use crate::core::{
    normalize_value_type, AddEventRequest, Event, FunctionOutput, PipelineData,
    VALUE_TYPE_BINARY, VALUE_TYPE_OBJECT, VALUE_TYPE_STRING,
};
use crate::errors::FunctionError;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// Kind of reading a [`WrapIntoEvent`] produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadingKind {
    /// Binary reading with the given media type.
    Binary {
        /// Media type of the payload.
        media_type: String,
    },
    /// Structured reading.
    Object,
    /// Simple reading of the given value type.
    Simple {
        /// Canonical value type.
        value_type: String,
    },
}

impl ReadingKind {
    /// Builds the reading kind for a configured value type.
    ///
    /// The value type is normalized first. `Binary` needs a non-empty media
    /// type.
    pub fn from_value_type(value_type: &str, media_type: Option<&str>) -> Result<Self, FunctionError> {
        let value_type = normalize_value_type(value_type).ok_or_else(|| {
            FunctionError::contract_invalid(format!(
                "unable to normalize the unknown value type {value_type}"
            ))
        })?;
        match value_type {
            VALUE_TYPE_BINARY => match media_type.map(str::trim) {
                Some(media_type) if !media_type.is_empty() => Ok(Self::Binary {
                    media_type: media_type.to_string(),
                }),
                _ => Err(FunctionError::contract_invalid(
                    "MediaType can not be empty when ValueType=Binary",
                )),
            },
            VALUE_TYPE_OBJECT => Ok(Self::Object),
            other => Ok(Self::Simple {
                value_type: other.to_string(),
            }),
        }
    }
}

/// Wraps the incoming data into a one-reading event and passes on the
/// `AddEventRequest` as JSON.
///
/// The profile, device and source names are also written to the context so
/// that later topic placeholders can use them.
#[derive(Debug, Clone)]
pub struct WrapIntoEvent {
    profile_name: String,
    device_name: String,
    resource_name: String,
    kind: ReadingKind,
}

impl WrapIntoEvent {
    /// Creates the function.
    #[must_use]
    pub fn new(
        profile_name: impl Into<String>,
        device_name: impl Into<String>,
        resource_name: impl Into<String>,
        kind: ReadingKind,
    ) -> Self {
        Self {
            profile_name: profile_name.into(),
            device_name: device_name.into(),
            resource_name: resource_name.into(),
            kind,
        }
    }
}

// Text is used as-is and JSON strings lose their quotes.
fn simple_value(data: &PipelineData) -> Result<String, serde_json::Error> {
    match data {
        PipelineData::Text(s) | PipelineData::Json(Value::String(s)) => Ok(s.clone()),
        other => Ok(String::from_utf8_lossy(&other.to_bytes()?).into_owned()),
    }
}

fn object_value(data: PipelineData) -> Result<Value, serde_json::Error> {
    match data {
        PipelineData::Json(v) => Ok(v),
        PipelineData::Text(s) => Ok(serde_json::from_str(&s).unwrap_or(Value::String(s))),
        PipelineData::Bytes(b) => serde_json::from_slice(&b),
        PipelineData::Event(e) => serde_json::to_value(e),
        PipelineData::Events(events) => serde_json::to_value(events),
        batch @ PipelineData::Batch(_) => serde_json::from_slice(&batch.to_bytes()?),
    }
}

impl WrapIntoEvent {
    fn wrap(&self, data: PipelineData) -> Result<Event, serde_json::Error> {
        let mut event = Event::new(&self.profile_name, &self.device_name, &self.resource_name);
        match &self.kind {
            ReadingKind::Binary { media_type } => {
                event.add_binary_reading(&self.resource_name, &data.to_bytes()?, media_type);
            }
            ReadingKind::Object => {
                event.add_object_reading(&self.resource_name, object_value(data)?);
            }
            ReadingKind::Simple { value_type } => {
                event.add_simple_reading(&self.resource_name, value_type, simple_value(&data)?);
            }
        }
        Ok(event)
    }
}

#[async_trait]
impl AppFunction for WrapIntoEvent {
    fn name(&self) -> &str {
        "WrapIntoEvent"
    }

    async fn apply(&self, ctx: &mut FunctionContext, data: Option<PipelineData>) -> FunctionOutput {
        let Some(data) = data else {
            return FunctionOutput::fail(FunctionError::no_data(self.name(), ctx.pipeline_id()));
        };

        let event = match self.wrap(data) {
            Ok(event) => event,
            Err(e) => {
                return FunctionOutput::fail(FunctionError::contract_invalid(format!(
                    "function WrapIntoEvent in pipeline '{}': unable to build reading: {e}",
                    ctx.pipeline_id()
                )))
            }
        };
        let request = match serde_json::to_value(AddEventRequest::new(event)) {
            Ok(request) => request,
            Err(e) => {
                return FunctionOutput::fail(FunctionError::server_error(format!(
                    "function WrapIntoEvent in pipeline '{}': {e}",
                    ctx.pipeline_id()
                )))
            }
        };

        debug!(
            pipeline_id = ctx.pipeline_id(),
            resource_name = %self.resource_name,
            "Wrapped data into Event"
        );
        ctx.set_response_content_type("");
        ctx.add_value(PROFILE_NAME_KEY, self.profile_name.as_str());
        ctx.add_value(DEVICE_NAME_KEY, self.device_name.as_str());
        ctx.add_value(SOURCE_NAME_KEY, self.resource_name.as_str());
        FunctionOutput::proceed(request)
    }
}
