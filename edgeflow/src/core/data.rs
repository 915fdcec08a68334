//! The value passed from one pipeline function to the next.

use super::Event;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Data flowing through a pipeline.
///
/// Functions accept whatever the previous function produced; a function
/// that needs a particular shape checks the variant and fails with a
/// contract error otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineData {
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// UTF-8 text.
    Text(String),
    /// Arbitrary JSON.
    Json(serde_json::Value),
    /// A single device event.
    Event(Event),
    /// A list of events (batched).
    Events(Vec<Event>),
    /// A list of raw payloads (batched).
    Batch(Vec<Vec<u8>>),
}

/// The variant tag of a [`PipelineData`], persisted alongside stored payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    /// [`PipelineData::Bytes`]
    #[default]
    Bytes,
    /// [`PipelineData::Text`]
    Text,
    /// [`PipelineData::Json`]
    Json,
    /// [`PipelineData::Event`]
    Event,
    /// [`PipelineData::Events`]
    Events,
    /// [`PipelineData::Batch`]
    Batch,
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes => write!(f, "bytes"),
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
            Self::Event => write!(f, "event"),
            Self::Events => write!(f, "events"),
            Self::Batch => write!(f, "batch"),
        }
    }
}

impl PipelineData {
    /// Returns the variant tag.
    #[must_use]
    pub const fn kind(&self) -> DataKind {
        match self {
            Self::Bytes(_) => DataKind::Bytes,
            Self::Text(_) => DataKind::Text,
            Self::Json(_) => DataKind::Json,
            Self::Event(_) => DataKind::Event,
            Self::Events(_) => DataKind::Events,
            Self::Batch(_) => DataKind::Batch,
        }
    }

    /// Coerces the value to bytes.
    ///
    /// Bytes pass through, text is UTF-8 encoded, structured values are
    /// serialized as JSON. A batch of raw payloads becomes a JSON array of
    /// base64 strings.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Self::Bytes(b) => Ok(b.clone()),
            Self::Text(s) => Ok(s.as_bytes().to_vec()),
            Self::Json(v) => serde_json::to_vec(v),
            Self::Event(e) => serde_json::to_vec(e),
            Self::Events(events) => serde_json::to_vec(events),
            Self::Batch(items) => {
                let encoded: Vec<String> = items.iter().map(|i| STANDARD.encode(i)).collect();
                serde_json::to_vec(&encoded)
            }
        }
    }

    /// Rebuilds a value from bytes produced by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(kind: DataKind, bytes: Vec<u8>) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            DataKind::Bytes => Self::Bytes(bytes),
            DataKind::Text => Self::Text(String::from_utf8_lossy(&bytes).into_owned()),
            DataKind::Json => Self::Json(serde_json::from_slice(&bytes)?),
            DataKind::Event => Self::Event(serde_json::from_slice(&bytes)?),
            DataKind::Events => Self::Events(serde_json::from_slice(&bytes)?),
            DataKind::Batch => {
                let encoded: Vec<String> = serde_json::from_slice(&bytes)?;
                Self::Batch(
                    encoded
                        .iter()
                        .map(|s| {
                            STANDARD
                                .decode(s)
                                .map_err(<serde_json::Error as serde::de::Error>::custom)
                        })
                        .collect::<Result<Vec<_>, serde_json::Error>>()?,
                )
            }
        })
    }

    /// Returns the event if this value is one.
    #[must_use]
    pub const fn as_event(&self) -> Option<&Event> {
        match self {
            Self::Event(e) => Some(e),
            _ => None,
        }
    }
}

impl From<Vec<u8>> for PipelineData {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<&[u8]> for PipelineData {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

impl From<String> for PipelineData {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for PipelineData {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<serde_json::Value> for PipelineData {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<Event> for PipelineData {
    fn from(value: Event) -> Self {
        Self::Event(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_to_bytes_coercion() {
        assert_eq!(PipelineData::from("abc").to_bytes().unwrap(), b"abc".to_vec());
        assert_eq!(PipelineData::from(vec![1u8, 2]).to_bytes().unwrap(), vec![1, 2]);
        assert_eq!(
            PipelineData::from(serde_json::json!({"a": 1})).to_bytes().unwrap(),
            br#"{"a":1}"#.to_vec()
        );
    }

    #[test]
    fn test_event_survives_storage_encoding() {
        let event = Event::new("p", "d", "s").with_reading("r", "Int8", "1");
        let data = PipelineData::from(event.clone());
        let bytes = data.to_bytes().unwrap();
        let restored = PipelineData::from_bytes(data.kind(), bytes).unwrap();
        assert_eq!(restored.as_event(), Some(&event));
    }

    #[test]
    fn test_batch_encoding_is_base64_array() {
        let data = PipelineData::Batch(vec![b"a".to_vec(), b"b".to_vec()]);
        let bytes = data.to_bytes().unwrap();
        assert_eq!(bytes, br#"["YQ==","Yg=="]"#.to_vec());
        assert_eq!(PipelineData::from_bytes(DataKind::Batch, bytes).unwrap(), data);
    }

    #[test]
    fn test_data_kind_serialize() {
        assert_eq!(serde_json::to_string(&DataKind::Event).unwrap(), r#""event""#);
        assert_eq!(DataKind::default(), DataKind::Bytes);
    }
}
