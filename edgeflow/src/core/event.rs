//! Event and reading DTOs.
//!
//! An [`Event`] is a collection of readings produced by one device. The JSON
//! shape uses camelCase field names so that events published by device
//! services decode without adaptation.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// API version stamped on events and envelopes.
pub const API_VERSION: &str = "v3";

/// Reading value types.
pub const VALUE_TYPES: &[&str] = &[
    "Bool", "String", "Uint8", "Uint16", "Uint32", "Uint64", "Int8", "Int16", "Int32", "Int64",
    "Float32", "Float64", VALUE_TYPE_BINARY, "BoolArray", "StringArray", "Uint8Array",
    "Uint16Array", "Uint32Array", "Uint64Array", "Int8Array", "Int16Array", "Int32Array",
    "Int64Array", "Float32Array", "Float64Array", VALUE_TYPE_OBJECT, "ObjectArray",
];
/// Value type of binary readings.
pub const VALUE_TYPE_BINARY: &str = "Binary";
/// Value type of object readings.
pub const VALUE_TYPE_OBJECT: &str = "Object";
/// Value type of string readings.
pub const VALUE_TYPE_STRING: &str = "String";

/// Returns the canonical spelling of a value type, matched
/// case-insensitively.
#[must_use]
pub fn normalize_value_type(value_type: &str) -> Option<&'static str> {
    VALUE_TYPES
        .iter()
        .find(|v| v.eq_ignore_ascii_case(value_type.trim()))
        .copied()
}

fn default_api_version() -> String {
    API_VERSION.to_string()
}

fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

/// A single data point from a device.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Reading {
    /// Reading id.
    pub id: String,
    /// Time the reading was taken, in nanoseconds.
    pub origin: i64,
    /// Device that produced the reading.
    pub device_name: String,
    /// Resource the reading is for.
    pub resource_name: String,
    /// Profile of the device.
    pub profile_name: String,
    /// Value type (e.g. `Int32`, `Float64`, `Binary`).
    pub value_type: String,
    /// Units of the value.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub units: String,
    /// Simple value rendered as a string.
    pub value: Option<String>,
    /// Base64 binary value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_value: Option<String>,
    /// Media type of the binary value.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub media_type: String,
    /// Structured value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_value: Option<serde_json::Value>,
    /// Reading tags.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, serde_json::Value>,
}

/// A collection of readings from one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Event {
    /// API version.
    pub api_version: String,
    /// Event id.
    pub id: String,
    /// Device that produced the event.
    pub device_name: String,
    /// Profile of the device.
    pub profile_name: String,
    /// Source (resource or command) that produced the event.
    pub source_name: String,
    /// Time the event was generated, in nanoseconds.
    pub origin: i64,
    /// Readings carried by the event.
    pub readings: Vec<Reading>,
    /// Event tags.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, serde_json::Value>,
}

impl Default for Event {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            id: String::new(),
            device_name: String::new(),
            profile_name: String::new(),
            source_name: String::new(),
            origin: 0,
            readings: Vec::new(),
            tags: HashMap::new(),
        }
    }
}

impl Event {
    /// Creates an event with a fresh id and no readings.
    #[must_use]
    pub fn new(
        profile_name: impl Into<String>,
        device_name: impl Into<String>,
        source_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            device_name: device_name.into(),
            profile_name: profile_name.into(),
            source_name: source_name.into(),
            origin: now_nanos(),
            ..Self::default()
        }
    }

    /// Appends a simple reading for `resource_name`.
    pub fn add_simple_reading(
        &mut self,
        resource_name: impl Into<String>,
        value_type: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.readings.push(Reading {
            id: Uuid::new_v4().to_string(),
            origin: now_nanos(),
            device_name: self.device_name.clone(),
            resource_name: resource_name.into(),
            profile_name: self.profile_name.clone(),
            value_type: value_type.into(),
            value: Some(value.into()),
            ..Reading::default()
        });
    }

    /// Appends a binary reading, stored base64-encoded.
    pub fn add_binary_reading(
        &mut self,
        resource_name: impl Into<String>,
        value: &[u8],
        media_type: impl Into<String>,
    ) {
        self.readings.push(Reading {
            id: Uuid::new_v4().to_string(),
            origin: now_nanos(),
            device_name: self.device_name.clone(),
            resource_name: resource_name.into(),
            profile_name: self.profile_name.clone(),
            value_type: VALUE_TYPE_BINARY.to_string(),
            binary_value: Some(STANDARD.encode(value)),
            media_type: media_type.into(),
            ..Reading::default()
        });
    }

    /// Appends a reading carrying a structured value.
    pub fn add_object_reading(&mut self, resource_name: impl Into<String>, value: serde_json::Value) {
        self.readings.push(Reading {
            id: Uuid::new_v4().to_string(),
            origin: now_nanos(),
            device_name: self.device_name.clone(),
            resource_name: resource_name.into(),
            profile_name: self.profile_name.clone(),
            value_type: VALUE_TYPE_OBJECT.to_string(),
            object_value: Some(value),
            ..Reading::default()
        });
    }

    /// Adds a reading and returns the event.
    #[must_use]
    pub fn with_reading(
        mut self,
        resource_name: impl Into<String>,
        value_type: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.add_simple_reading(resource_name, value_type, value);
        self
    }
}

/// Request wrapper device services use when publishing events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddEventRequest {
    /// API version.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Request id.
    #[serde(default)]
    pub request_id: String,
    /// The wrapped event.
    pub event: Event,
}

impl AddEventRequest {
    /// Wraps an event.
    #[must_use]
    pub fn new(event: Event) -> Self {
        Self {
            api_version: default_api_version(),
            request_id: Uuid::new_v4().to_string(),
            event,
        }
    }
}
