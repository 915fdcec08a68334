//! Event conversion to JSON or XML.

use super::AppFunction;
use crate::context::FunctionContext;
use crate::core::{Event, FunctionOutput, PipelineData};
use crate::errors::FunctionError;
use crate::messaging::{CONTENT_TYPE_JSON, CONTENT_TYPE_XML};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Write as _;

/// Target format of a [`Conversion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionFormat {
    /// JSON text.
    Json,
    /// XML text.
    Xml,
}

/// Converts an incoming event to JSON or XML text and sets the response
/// content type accordingly.
#[derive(Debug, Clone)]
pub struct Conversion {
    format: ConversionFormat,
}

impl Conversion {
    /// Creates a conversion function.
    #[must_use]
    pub const fn new(format: ConversionFormat) -> Self {
        Self { format }
    }
}

/// Renders an event as XML with upper-camel-case element names.
pub fn event_to_xml(event: &Event) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(event)?;
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    write_element(&mut out, "Event", &value);
    Ok(out)
}

fn upper_camel(key: &str) -> String {
    let mut chars = key.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

// Arrays repeat the element once per item.
fn write_element(out: &mut String, name: &str, value: &Value) {
    match value {
        Value::Array(items) => {
            for item in items {
                write_element(out, name, item);
            }
        }
        Value::Object(fields) => {
            let _ = write!(out, "<{name}>");
            for (key, field) in fields {
                write_element(out, &upper_camel(key), field);
            }
            let _ = write!(out, "</{name}>");
        }
        Value::Null => {
            let _ = write!(out, "<{name}></{name}>");
        }
        Value::String(s) => {
            let _ = write!(out, "<{name}>{}</{name}>", escape(s));
        }
        Value::Bool(_) | Value::Number(_) => {
            let _ = write!(out, "<{name}>{value}</{name}>");
        }
    }
}

#[async_trait]
impl AppFunction for Conversion {
    fn name(&self) -> &str {
        match self.format {
            ConversionFormat::Json => "TransformToJSON",
            ConversionFormat::Xml => "TransformToXML",
        }
    }

    async fn apply(&self, ctx: &mut FunctionContext, data: Option<PipelineData>) -> FunctionOutput {
        let event = match data {
            Some(PipelineData::Event(event)) => event,
            Some(_) => {
                return FunctionOutput::fail(FunctionError::contract_invalid(format!(
                    "function {} in pipeline '{}': type received is not an Event",
                    self.name(),
                    ctx.pipeline_id()
                )))
            }
            None => {
                return FunctionOutput::fail(FunctionError::no_data(self.name(), ctx.pipeline_id()))
            }
        };

        let (converted, content_type) = match self.format {
            ConversionFormat::Json => (serde_json::to_string(&event), CONTENT_TYPE_JSON),
            ConversionFormat::Xml => (event_to_xml(&event), CONTENT_TYPE_XML),
        };

        match converted {
            Ok(text) => {
                ctx.set_response_content_type(content_type);
                FunctionOutput::proceed(text)
            }
            Err(e) => FunctionOutput::fail(FunctionError::server_error(format!(
                "function {} in pipeline '{}': failed to convert event: {e}",
                self.name(),
                ctx.pipeline_id()
            ))),
        }
    }
}
