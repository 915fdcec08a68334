//! Builds built-in functions from configuration.
//!
//! Function names and parameter keys are matched case-insensitively, so
//! `FilterByDeviceName { DeviceNames = "a,b" }` and
//! `filterbydevicename { devicenames = "a,b" }` are the same thing.

use super::{
    AddTags, AppFunction, Batch, BatchMode, Compression, CompressionAlgorithm, Conversion,
    ConversionFormat, Filter, FilterTarget, HttpExport, HttpExportOptions, HttpMethod,
    MessageBusExport, ReadingKind, ResponseData, ToLineProtocol, WrapIntoEvent,
};
use crate::cancellation::CancellationToken;
use crate::config::{parse_duration, FunctionConfig};
use crate::errors::{EdgeflowError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Batch mode parameter.
pub const MODE: &str = "mode";
/// Batch by count.
pub const BATCH_BY_COUNT: &str = "bycount";
/// Batch by time.
pub const BATCH_BY_TIME: &str = "bytime";
/// Batch by time and count.
pub const BATCH_BY_TIME_COUNT: &str = "bytimecount";
/// Batch threshold parameter.
pub const BATCH_THRESHOLD: &str = "batchthreshold";
/// Batch interval parameter.
pub const TIME_INTERVAL: &str = "timeinterval";
/// Batch event decoding parameter.
pub const IS_EVENT_DATA: &str = "iseventdata";
/// Batch merge parameter.
pub const MERGE_ON_SEND: &str = "mergeonsend";
/// Compression algorithm parameter.
pub const ALGORITHM: &str = "algorithm";
/// Conversion type parameter.
pub const TRANSFORM_TYPE: &str = "type";
/// Response content type parameter.
pub const RESPONSE_CONTENT_TYPE: &str = "responsecontenttype";
/// Tags parameter.
pub const TAGS: &str = "tags";
/// Filter mode parameter.
pub const FILTER_OUT: &str = "filterout";
/// Profile names parameter.
pub const PROFILE_NAMES: &str = "profilenames";
/// Device names parameter.
pub const DEVICE_NAMES: &str = "devicenames";
/// Source names parameter.
pub const SOURCE_NAMES: &str = "sourcenames";
/// Resource names parameter.
pub const RESOURCE_NAMES: &str = "resourcenames";
/// HTTP export method parameter.
pub const EXPORT_METHOD: &str = "method";
/// HTTP export URL parameter.
pub const URL: &str = "url";
/// HTTP export content type parameter.
pub const MIME_TYPE: &str = "mimetype";
/// Store-and-forward opt-in parameter of the exporters.
pub const PERSIST_ON_ERROR: &str = "persistonerror";
/// HTTP export continue-on-error parameter.
pub const CONTINUE_ON_SEND_ERROR: &str = "continueonsenderror";
/// HTTP export return-input parameter.
pub const RETURN_INPUT_DATA: &str = "returninputdata";
/// HTTP export extra headers parameter, a JSON object.
pub const HTTP_REQUEST_HEADERS: &str = "httprequestheaders";
/// HTTP export secret header parameter.
pub const HEADER_NAME: &str = "headername";
/// Message bus export topic parameter.
pub const TOPIC: &str = "topic";
/// Message bus export content type parameter.
pub const CONTENT_TYPE: &str = "contenttype";
/// Wrapped event profile parameter.
pub const PROFILE_NAME: &str = "profilename";
/// Wrapped event device parameter.
pub const DEVICE_NAME: &str = "devicename";
/// Wrapped event resource parameter.
pub const RESOURCE_NAME: &str = "resourcename";
/// Wrapped reading value type parameter.
pub const VALUE_TYPE: &str = "valuetype";
/// Wrapped binary reading media type parameter.
pub const MEDIA_TYPE: &str = "mediatype";

struct Params<'a> {
    function: &'a str,
    values: HashMap<String, &'a str>,
}

impl<'a> Params<'a> {
    fn new(function: &'a str, parameters: &'a HashMap<String, String>) -> Self {
        Self {
            function,
            values: parameters
                .iter()
                .map(|(k, v)| (k.to_lowercase(), v.as_str()))
                .collect(),
        }
    }

    fn optional(&self, key: &str) -> Option<&'a str> {
        self.values.get(key).map(|v| v.trim())
    }

    fn required(&self, key: &str) -> Result<&'a str> {
        self.optional(key).ok_or_else(|| {
            EdgeflowError::Config(format!(
                "could not find '{key}' parameter for {}",
                self.function
            ))
        })
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, raw: &str) -> Result<T>
    where
        T::Err: std::fmt::Display,
    {
        raw.parse().map_err(|e: T::Err| {
            EdgeflowError::Config(format!(
                "could not parse '{raw}' for '{key}' parameter of {}: {e}",
                self.function
            ))
        })
    }

    fn flag(&self, key: &str) -> Result<bool> {
        self.optional(key)
            .map_or(Ok(false), |raw| self.parse(key, &raw.to_lowercase()))
    }

    fn list(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .required(key)?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Builds the function named `name` from its configuration.
///
/// `shutdown` is handed to functions that hold timers so that they release
/// promptly when the service stops.
pub fn build_function(
    name: &str,
    config: &FunctionConfig,
    shutdown: Option<Arc<CancellationToken>>,
) -> Result<Arc<dyn AppFunction>> {
    let params = Params::new(name, &config.parameters);
    let function: Arc<dyn AppFunction> = match name.to_lowercase().as_str() {
        "batch" => Arc::new(batch(&params, shutdown)?),
        "compress" => Arc::new(compress(&params)?),
        "transform" => Arc::new(transform(&params)?),
        "setresponsedata" => {
            let mut function = ResponseData::new();
            if let Some(content_type) = params.optional(RESPONSE_CONTENT_TYPE) {
                function = function.with_content_type(content_type);
            }
            Arc::new(function)
        }
        "addtags" => Arc::new(AddTags::parse(params.required(TAGS)?)?),
        "filterbyprofilename" => {
            Arc::new(filter(&params, FilterTarget::ProfileName, PROFILE_NAMES)?)
        }
        "filterbydevicename" => Arc::new(filter(&params, FilterTarget::DeviceName, DEVICE_NAMES)?),
        "filterbysourcename" => Arc::new(filter(&params, FilterTarget::SourceName, SOURCE_NAMES)?),
        "filterbyresourcename" => {
            Arc::new(filter(&params, FilterTarget::ResourceName, RESOURCE_NAMES)?)
        }
        "httpexport" => Arc::new(http_export(&params)?),
        "messagebusexport" => Arc::new(message_bus_export(&params)?),
        "wrapintoevent" => Arc::new(wrap_into_event(&params)?),
        "tolineprotocol" => Arc::new(ToLineProtocol::parse(params.required(TAGS)?)?),
        _ => {
            return Err(EdgeflowError::Config(format!(
                "function '{name}' is not a known configurable function"
            )))
        }
    };
    Ok(function)
}

fn batch(params: &Params<'_>, shutdown: Option<Arc<CancellationToken>>) -> Result<Batch> {
    let mode = params.required(MODE)?.to_lowercase();
    let interval = || -> Result<_> {
        let raw = params.required(TIME_INTERVAL)?;
        parse_duration(raw).ok_or_else(|| {
            EdgeflowError::Config(format!("invalid '{TIME_INTERVAL}' value '{raw}' for Batch"))
        })
    };
    let threshold = || -> Result<usize> {
        let raw = params.required(BATCH_THRESHOLD)?;
        params.parse(BATCH_THRESHOLD, raw)
    };

    let mode = match mode.as_str() {
        BATCH_BY_COUNT => BatchMode::ByCount {
            threshold: threshold()?,
        },
        BATCH_BY_TIME => BatchMode::ByTime {
            interval: interval()?,
        },
        BATCH_BY_TIME_COUNT => BatchMode::ByTimeAndCount {
            interval: interval()?,
            threshold: threshold()?,
        },
        other => {
            return Err(EdgeflowError::Config(format!(
                "invalid batch mode '{other}'. Must be '{BATCH_BY_COUNT}', '{BATCH_BY_TIME}' or '{BATCH_BY_TIME_COUNT}'"
            )))
        }
    };

    let mut batch = Batch::new(mode)
        .with_event_data(params.flag(IS_EVENT_DATA)?)
        .with_merge_on_send(params.flag(MERGE_ON_SEND)?);
    if let Some(token) = shutdown {
        batch = batch.with_shutdown(token);
    }
    Ok(batch)
}

fn compress(params: &Params<'_>) -> Result<Compression> {
    match params.required(ALGORITHM)?.to_lowercase().as_str() {
        "gzip" => Ok(Compression::new(CompressionAlgorithm::Gzip)),
        "zlib" => Ok(Compression::new(CompressionAlgorithm::Zlib)),
        other => Err(EdgeflowError::Config(format!(
            "invalid compression algorithm '{other}'. Must be 'gzip' or 'zlib'"
        ))),
    }
}

fn transform(params: &Params<'_>) -> Result<Conversion> {
    match params.required(TRANSFORM_TYPE)?.to_lowercase().as_str() {
        "json" => Ok(Conversion::new(ConversionFormat::Json)),
        "xml" => Ok(Conversion::new(ConversionFormat::Xml)),
        other => Err(EdgeflowError::Config(format!(
            "invalid transform type '{other}'. Must be 'xml' or 'json'"
        ))),
    }
}

fn http_export(params: &Params<'_>) -> Result<HttpExport> {
    let method = match params.required(EXPORT_METHOD)?.to_lowercase().as_str() {
        "post" => HttpMethod::Post,
        "put" => HttpMethod::Put,
        other => {
            return Err(EdgeflowError::Config(format!(
                "invalid HTTPExport method of '{other}'. Must be 'post' or 'put'"
            )))
        }
    };
    if params.optional(HEADER_NAME).is_some_and(|name| !name.is_empty()) {
        return Err(EdgeflowError::Config(format!(
            "'{HEADER_NAME}' needs a secret store, which HTTPExport does not support"
        )));
    }
    let headers = match params.optional(HTTP_REQUEST_HEADERS) {
        Some(raw) if !raw.is_empty() => serde_json::from_str(raw).map_err(|e| {
            EdgeflowError::Config(format!("unable to parse '{HTTP_REQUEST_HEADERS}': {e}"))
        })?,
        _ => HashMap::new(),
    };
    let options = HttpExportOptions {
        url: params.required(URL)?.to_string(),
        mime_type: params.required(MIME_TYPE)?.to_string(),
        persist_on_error: params.flag(PERSIST_ON_ERROR)?,
        continue_on_send_error: params.flag(CONTINUE_ON_SEND_ERROR)?,
        return_input_data: params.flag(RETURN_INPUT_DATA)?,
        headers,
    };
    Ok(HttpExport::new(method, options)?)
}

fn message_bus_export(params: &Params<'_>) -> Result<MessageBusExport> {
    let mut export = MessageBusExport::new(params.required(TOPIC)?)
        .with_persist_on_error(params.flag(PERSIST_ON_ERROR)?);
    if let Some(content_type) = params.optional(CONTENT_TYPE).filter(|c| !c.is_empty()) {
        export = export.with_content_type(content_type);
    }
    Ok(export)
}

fn wrap_into_event(params: &Params<'_>) -> Result<WrapIntoEvent> {
    let kind = ReadingKind::from_value_type(
        params.required(VALUE_TYPE)?,
        params.optional(MEDIA_TYPE),
    )?;
    Ok(WrapIntoEvent::new(
        params.required(PROFILE_NAME)?,
        params.required(DEVICE_NAME)?,
        params.required(RESOURCE_NAME)?,
        kind,
    ))
}

fn filter(params: &Params<'_>, target: FilterTarget, key: &str) -> Result<Filter> {
    let values = params.list(key)?;
    let filter_out = params.flag(FILTER_OUT)?;
    Ok(Filter::new(target, values.as_slice(), filter_out)?)
}
