//! # Edgeflow
//!
//! An edge application-function pipeline runtime.
//!
//! Edgeflow routes device messages through chains of transform functions
//! with support for:
//!
//! - **Function pipelines**: ordered functions with continue, halt and fail outcomes
//! - **Topic routing**: MQTT-style wildcards select the pipelines for a message
//! - **Store-and-forward**: failed executions are persisted and replayed on a timer
//! - **Built-in transforms**: batching, filtering, compression, conversion and export
//! - **Triggers**: message bus, HTTP request handling and custom channels
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use edgeflow::prelude::*;
//!
//! let service = AppService::new(ServiceConfig::default(), Collaborators::default())?;
//! service.set_default_functions_pipeline(vec![
//!     Arc::new(Filter::new(FilterTarget::DeviceName, &["thermostat-.*"], false)?),
//!     Arc::new(Conversion::new(ConversionFormat::Json)),
//!     Arc::new(ResponseData::new()),
//! ]);
//! let trigger = service.start().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod functions;
pub mod messaging;
pub mod observability;
pub mod pipeline;
pub mod service;
pub mod storeforward;
pub mod testing;
pub mod trigger;

pub use errors::{EdgeflowError, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{FunctionConfig, ServiceConfig, StoreAndForwardConfig, TriggerKind};
    pub use crate::context::FunctionContext;
    pub use crate::core::{
        AddEventRequest, DataKind, Event, FunctionOutput, FunctionStatus, Metric, PipelineData,
        Reading,
    };
    pub use crate::errors::{
        EdgeflowError, ErrorKind, FunctionError, MessageError, Result, StoreError,
    };
    pub use crate::functions::{
        AddTags, AppFunction, Batch, BatchMode, Compression, CompressionAlgorithm, Conversion,
        ConversionFormat, Filter, FilterTarget, FnFunction, HttpExport, HttpExportOptions,
        HttpMethod, MessageBusExport, PassThrough, ReadingKind, ResponseData, ToLineProtocol,
        WrapIntoEvent,
    };
    pub use crate::messaging::{InMemoryMessageBus, MessageClient, MessageEnvelope};
    pub use crate::pipeline::{
        ExecutionOutcome, FunctionPipeline, OutputHandler, PipelineEngine, PipelineRegistry,
        PipelineRouter, TargetType, TopicMatcher,
    };
    pub use crate::service::{AppService, Collaborators, StartedTrigger};
    pub use crate::storeforward::{
        InMemoryStoreClient, RetryPolicy, SqliteStoreClient, StoreClient, StoreForward,
        StoreReceipt, StoredObject,
    };
    pub use crate::trigger::{CustomTrigger, HttpRequest, HttpResponse, HttpTrigger};
    pub use std::sync::Arc;
}
