//! Metric to line-protocol transformation.

use super::tags::parse_tag_list;
use super::AppFunction;
use crate::context::FunctionContext;
use crate::core::{validate_metric_name, FunctionOutput, Metric, MetricTag, PipelineData};
use crate::errors::FunctionError;
use async_trait::async_trait;
use tracing::debug;

/// Renders an incoming [`Metric`] as a line-protocol string, appending a
/// fixed set of extra tags.
///
/// The metric may arrive as JSON, or as text or bytes holding its JSON
/// encoding.
#[derive(Debug, Clone, Default)]
pub struct ToLineProtocol {
    additional_tags: Vec<MetricTag>,
}

impl ToLineProtocol {
    /// Creates the function. Tags are appended in name order.
    pub fn new(additional_tags: Vec<MetricTag>) -> Result<Self, FunctionError> {
        for tag in &additional_tags {
            validate_metric_name(&tag.name, "Tag")?;
        }
        let mut additional_tags = additional_tags;
        additional_tags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Self { additional_tags })
    }

    /// Parses the extra tags from a `key:value, key:value` list.
    pub fn parse(raw: &str) -> Result<Self, FunctionError> {
        let tags = parse_tag_list(raw)?
            .into_iter()
            .map(|(name, value)| MetricTag::new(name, value))
            .collect();
        Self::new(tags)
    }
}

fn decode_metric(data: PipelineData) -> Option<Metric> {
    match data {
        PipelineData::Json(value) => serde_json::from_value(value).ok(),
        PipelineData::Text(text) => serde_json::from_str(&text).ok(),
        PipelineData::Bytes(bytes) => serde_json::from_slice(&bytes).ok(),
        _ => None,
    }
}

#[async_trait]
impl AppFunction for ToLineProtocol {
    fn name(&self) -> &str {
        "ToLineProtocol"
    }

    async fn apply(&self, ctx: &mut FunctionContext, data: Option<PipelineData>) -> FunctionOutput {
        let Some(data) = data else {
            return FunctionOutput::fail(FunctionError::server_error(format!(
                "function ToLineProtocol in pipeline '{}': No Data Received",
                ctx.pipeline_id()
            )));
        };
        let Some(mut metric) = decode_metric(data) else {
            return FunctionOutput::fail(FunctionError::contract_invalid(format!(
                "function ToLineProtocol in pipeline '{}', type received is not an Metric",
                ctx.pipeline_id()
            )));
        };

        metric.tags.extend(self.additional_tags.iter().cloned());
        let result = metric.to_line_protocol();
        debug!(pipeline_id = ctx.pipeline_id(), line = %result, "Transformed Metric");
        FunctionOutput::proceed(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn metric() -> serde_json::Value {
        json!({
            "name": "temperature",
            "fields": [{"name": "celsius", "value": 21}],
            "tags": [{"name": "device", "value": "d1"}],
            "timestamp": 100
        })
    }

    #[tokio::test]
    async fn test_to_line_protocol_appends_tags() {
        let func = ToLineProtocol::parse("site:north, floor:2").unwrap();
        let mut ctx = FunctionContext::new("c", "");
        let output = func.apply(&mut ctx, Some(metric().into())).await;
        assert_eq!(
            output.data,
            Some(PipelineData::Text(
                "temperature,device=d1,floor=2,site=north celsius=21i 100".into()
            ))
        );
    }

    #[tokio::test]
    async fn test_to_line_protocol_accepts_encoded_metric() {
        let func = ToLineProtocol::default();
        let mut ctx = FunctionContext::new("c", "");
        let bytes = serde_json::to_vec(&metric()).unwrap();
        let output = func.apply(&mut ctx, Some(bytes.into())).await;
        assert_eq!(
            output.data,
            Some(PipelineData::Text("temperature,device=d1 celsius=21i 100".into()))
        );
    }

    #[tokio::test]
    async fn test_to_line_protocol_rejects_other_input() {
        let func = ToLineProtocol::default();
        let mut ctx = FunctionContext::new("c", "");

        let (_, result) = func.apply(&mut ctx, Some("plain".into())).await.into_parts();
        assert_eq!(result.unwrap_err().kind, ErrorKind::ContractInvalid);

        let (_, result) = func.apply(&mut ctx, None).await.into_parts();
        assert_eq!(result.unwrap_err().kind, ErrorKind::ServerError);
    }

    #[test]
    fn test_blank_tag_names_are_rejected() {
        assert!(ToLineProtocol::new(vec![MetricTag::new(" ", "v")]).is_err());
        assert!(ToLineProtocol::parse("site").is_err());
    }
}
