//! Core domain model types for edgeflow.
//!
//! This module contains the fundamental types used throughout the runtime:
//! - The dynamically-typed value passed between pipeline functions
//! - Function status and the output type with factory methods
//! - Event and reading DTOs carried by device messages
//! - The metric DTO rendered as line protocol

mod data;
mod event;
mod metric;
mod output;
mod status;

pub use data::{DataKind, PipelineData};
pub use event::{
    normalize_value_type, AddEventRequest, Event, Reading, API_VERSION, VALUE_TYPES,
    VALUE_TYPE_BINARY, VALUE_TYPE_OBJECT, VALUE_TYPE_STRING,
};
pub use metric::{validate_metric_name, FieldValue, Metric, MetricField, MetricTag};
pub use output::FunctionOutput;
pub use status::FunctionStatus;
