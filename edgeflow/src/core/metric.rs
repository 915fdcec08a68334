//! Metric DTO and its line-protocol rendering.

use super::API_VERSION;
use crate::errors::FunctionError;
use serde::{Deserialize, Serialize};
use std::fmt;

fn default_api_version() -> String {
    API_VERSION.to_string()
}

/// Value of a metric field.
///
/// Untagged so that plain JSON scalars decode directly. Integers that fit
/// an `i64` are signed; larger ones fall through to `Uint`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Signed integer, rendered with an `i` suffix.
    Int(i64),
    /// Unsigned integer, rendered with a `u` suffix.
    Uint(u64),
    /// Floating point value.
    Float(f64),
    /// Boolean value.
    Bool(bool),
    /// String value, rendered as-is.
    Str(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}i"),
            Self::Uint(v) => write!(f, "{v}u"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Str(v) => f.write_str(v),
        }
    }
}

/// A named field of a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricField {
    /// Field name.
    pub name: String,
    /// Field value.
    pub value: FieldValue,
}

/// A tag attached to a metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricTag {
    /// Tag name.
    pub name: String,
    /// Tag value.
    pub value: String,
}

impl MetricTag {
    /// Creates a tag.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Data for a single named metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    /// API version.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Measurement name.
    pub name: String,
    /// Fields, at least one.
    pub fields: Vec<MetricField>,
    /// Tags.
    #[serde(default)]
    pub tags: Vec<MetricTag>,
    /// Timestamp in nanoseconds.
    #[serde(default)]
    pub timestamp: i64,
}

/// Rejects empty or blank metric, field and tag names.
pub fn validate_metric_name(name: &str, name_type: &str) -> Result<(), FunctionError> {
    if name.trim().is_empty() {
        return Err(FunctionError::contract_invalid(format!(
            "{name_type} name can not be empty or blank"
        )));
    }
    Ok(())
}

impl Metric {
    /// Creates a metric stamped with the current time.
    pub fn new(
        name: impl Into<String>,
        fields: Vec<MetricField>,
        tags: Vec<MetricTag>,
    ) -> Result<Self, FunctionError> {
        let name = name.into();
        validate_metric_name(&name, "metric")?;
        if fields.is_empty() {
            return Err(FunctionError::contract_invalid(
                "one or more metric fields are required",
            ));
        }
        for field in &fields {
            validate_metric_name(&field.name, "field")?;
        }
        for tag in &tags {
            validate_metric_name(&tag.name, "tag")?;
        }
        Ok(Self {
            api_version: default_api_version(),
            name,
            fields,
            tags,
            timestamp: chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        })
    }

    /// Renders the metric in line protocol:
    /// `name[,tag=value...] field=value[,field=value...] timestamp`.
    #[must_use]
    pub fn to_line_protocol(&self) -> String {
        let tags: String = self
            .tags
            .iter()
            .map(|t| format!(",{}={}", t.name, t.value))
            .collect();
        let fields = self
            .fields
            .iter()
            .map(|f| format!("{}={}", f.name, f.value))
            .collect::<Vec<_>>()
            .join(",");
        format!("{}{tags} {fields} {}", self.name, self.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn field(name: &str, value: FieldValue) -> MetricField {
        MetricField {
            name: name.into(),
            value,
        }
    }

    #[test]
    fn test_line_protocol_formats_values() {
        let mut metric = Metric::new(
            "cpu",
            vec![
                field("load", FieldValue::Float(0.5)),
                field("count", FieldValue::Int(3)),
                field("big", FieldValue::Uint(u64::MAX)),
                field("state", FieldValue::Str("\"ok\"".into())),
            ],
            vec![MetricTag::new("host", "edge1")],
        )
        .unwrap();
        metric.timestamp = 1_556_813_561_098_000_000;

        assert_eq!(
            metric.to_line_protocol(),
            format!(
                "cpu,host=edge1 load=0.5,count=3i,big={}u,state=\"ok\" 1556813561098000000",
                u64::MAX
            )
        );
    }

    #[test]
    fn test_new_metric_validates_names() {
        assert!(Metric::new(" ", vec![field("f", FieldValue::Int(1))], vec![]).is_err());
        assert!(Metric::new("m", vec![], vec![]).is_err());
        assert!(Metric::new("m", vec![field("", FieldValue::Int(1))], vec![]).is_err());
        assert!(Metric::new(
            "m",
            vec![field("f", FieldValue::Int(1))],
            vec![MetricTag::new(" ", "v")]
        )
        .is_err());
    }

    #[test]
    fn test_field_values_decode_from_json() {
        let metric: Metric = serde_json::from_str(
            r#"{"name":"m","fields":[{"name":"a","value":-2},{"name":"b","value":18446744073709551615},{"name":"c","value":1.25},{"name":"d","value":"x"}],"timestamp":7}"#,
        )
        .unwrap();
        assert_eq!(metric.api_version, API_VERSION);
        assert_eq!(metric.fields[0].value, FieldValue::Int(-2));
        assert_eq!(metric.fields[1].value, FieldValue::Uint(u64::MAX));
        assert_eq!(metric.fields[2].value, FieldValue::Float(1.25));
        assert_eq!(metric.to_line_protocol(), format!("m a=-2i,b={}u,c=1.25,d=x 7", u64::MAX));
    }
}
