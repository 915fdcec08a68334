//! Event tagging.

use super::AppFunction;
use crate::context::FunctionContext;
use crate::core::{FunctionOutput, PipelineData};
use crate::errors::FunctionError;
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

/// Adds a fixed set of tags to every event passing through.
#[derive(Debug, Clone, Default)]
pub struct AddTags {
    tags: HashMap<String, String>,
}

impl AddTags {
    /// Creates the function.
    #[must_use]
    pub const fn new(tags: HashMap<String, String>) -> Self {
        Self { tags }
    }

    /// Parses a `key:value, key:value` specification.
    pub fn parse(raw: &str) -> Result<Self, FunctionError> {
        parse_tag_list(raw).map(Self::new)
    }
}

/// Parses a comma-separated list of `key:value` pairs.
pub(crate) fn parse_tag_list(raw: &str) -> Result<HashMap<String, String>, FunctionError> {
    let mut tags = HashMap::new();
    for tag in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let parts: Vec<&str> = tag.split(':').map(str::trim).collect();
        match parts.as_slice() {
            [key, value] if !key.is_empty() && !value.is_empty() => {
                tags.insert((*key).to_string(), (*value).to_string());
            }
            [key, _] if key.is_empty() => {
                return Err(FunctionError::contract_invalid(format!(
                    "Tag key missing. Got `{tag}`"
                )))
            }
            [_, _] => {
                return Err(FunctionError::contract_invalid(format!(
                    "Tag value missing. Got `{tag}`"
                )))
            }
            _ => {
                return Err(FunctionError::contract_invalid(format!(
                    "Bad Tags specification format. Expect comma separated list of 'key:value'. Got `{tag}`"
                )))
            }
        }
    }
    Ok(tags)
}

#[async_trait]
impl AppFunction for AddTags {
    fn name(&self) -> &str {
        "AddTags"
    }

    async fn apply(&self, ctx: &mut FunctionContext, data: Option<PipelineData>) -> FunctionOutput {
        let mut event = match data {
            Some(PipelineData::Event(event)) => event,
            Some(_) => {
                return FunctionOutput::fail(FunctionError::contract_invalid(format!(
                    "function AddTags in pipeline '{}': type received is not an Event",
                    ctx.pipeline_id()
                )))
            }
            None => {
                return FunctionOutput::fail(FunctionError::no_data(self.name(), ctx.pipeline_id()))
            }
        };

        for (key, value) in &self.tags {
            event
                .tags
                .insert(key.clone(), serde_json::Value::String(value.clone()));
        }
        debug!(pipeline_id = ctx.pipeline_id(), tags = self.tags.len(), "Tags added to Event");
        FunctionOutput::proceed(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Event;

    #[test]
    fn test_parse_tag_list() {
        let tags = AddTags::parse("site:north, floor : 3,").unwrap();
        assert_eq!(tags.tags.get("site").map(String::as_str), Some("north"));
        assert_eq!(tags.tags.get("floor").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_parse_rejects_bad_entries() {
        assert!(AddTags::parse("novalue").is_err());
        assert!(AddTags::parse(":x").is_err());
        assert!(AddTags::parse("k:").is_err());
        assert!(AddTags::parse("a:b:c").is_err());
    }

    #[tokio::test]
    async fn test_tags_added() {
        let func = AddTags::parse("site:north").unwrap();
        let output = func
            .apply(
                &mut FunctionContext::new("c", ""),
                Some(Event::new("p", "d", "s").into()),
            )
            .await;
        let data = output.data.unwrap();
        let event = data.as_event().unwrap();
        assert_eq!(event.tags.get("site"), Some(&serde_json::json!("north")));
    }

    #[tokio::test]
    async fn test_non_event_rejected() {
        let output = AddTags::default()
            .apply(&mut FunctionContext::new("c", ""), Some("x".into()))
            .await;
        assert!(output.is_failure());
    }
}
