//! Service configuration.
//!
//! Configuration is read from JSON, every field has a default, and a small
//! set of `EDGEFLOW_*` environment variables override the file.

use crate::cancellation::CancellationToken;
use crate::errors::{EdgeflowError, Result};
use crate::functions::configurable::build_function;
use crate::functions::AppFunction;
use crate::pipeline::{FunctionPipeline, TargetType, TopicSyntax};
use crate::storeforward::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "EDGEFLOW_";

/// Shortest retry interval store-and-forward accepts.
pub const MIN_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Parses durations such as `500ms`, `10s`, `1.5m`, `1h` or `1m30s`.
///
/// Units are `ms`, `s`, `m` and `h`, matched case-insensitively, and may be
/// chained. Each value may carry a fraction. A bare number is read as
/// seconds.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(seconds) = raw.parse::<f64>() {
        return seconds_to_duration(seconds);
    }

    let lower = raw.to_ascii_lowercase();
    let mut rest = lower.as_str();
    let mut total = 0.0_f64;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, after) = rest.split_at(number_end);
        if number.is_empty() {
            return None;
        }
        let value: f64 = number.parse().ok()?;

        let unit_end = after
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(after.len());
        let (unit, after) = after.split_at(unit_end);
        let scale = match unit {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return None,
        };
        total += value * scale;
        rest = after;
    }
    seconds_to_duration(total)
}

fn seconds_to_duration(seconds: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(seconds).ok()
}

fn default_service_key() -> String {
    "app-edgeflow".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_retry_interval() -> String {
    "5m".to_string()
}

const fn default_max_retry_count() -> u32 {
    10
}

const fn default_worker_pool_size() -> usize {
    16
}

/// Top-level service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Key identifying this service's stored objects.
    #[serde(default = "default_service_key")]
    pub service_key: String,
    /// Default log level, used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit JSON log lines.
    #[serde(default)]
    pub log_json: bool,
    /// Store-and-forward settings.
    #[serde(default)]
    pub store_and_forward: StoreAndForwardConfig,
    /// Trigger settings.
    #[serde(default)]
    pub trigger: TriggerConfig,
    /// Broker topic syntax.
    #[serde(default)]
    pub topics: TopicSyntax,
    /// Configurable pipelines.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_key: default_service_key(),
            log_level: default_log_level(),
            log_json: false,
            store_and_forward: StoreAndForwardConfig::default(),
            trigger: TriggerConfig::default(),
            topics: TopicSyntax::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Parses configuration from a JSON string.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| EdgeflowError::Config(format!("invalid configuration: {e}")))
    }

    /// Loads configuration from a JSON file and applies environment overrides.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EdgeflowError::Config(format!("unable to read '{}': {e}", path.display()))
        })?;
        let mut config = Self::from_json_str(&raw)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Applies `EDGEFLOW_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides read through `lookup`, which receives the full
    /// variable name.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));

        if let Some(v) = get("SERVICE_KEY") {
            self.service_key = v;
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = get("STORE_AND_FORWARD_ENABLED") {
            self.store_and_forward.enabled = parse_override("STORE_AND_FORWARD_ENABLED", &v)?;
        }
        if let Some(v) = get("STORE_AND_FORWARD_RETRY_INTERVAL") {
            self.store_and_forward.retry_interval = v;
        }
        if let Some(v) = get("STORE_AND_FORWARD_MAX_RETRY_COUNT") {
            self.store_and_forward.max_retry_count =
                parse_override("STORE_AND_FORWARD_MAX_RETRY_COUNT", &v)?;
        }
        if let Some(v) = get("STORE_AND_FORWARD_DATABASE_PATH") {
            self.store_and_forward.database_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("TRIGGER_SUBSCRIBE_TOPICS") {
            self.trigger.subscribe_topics = v;
        }
        if let Some(v) = get("TRIGGER_PUBLISH_TOPIC") {
            self.trigger.publish_topic = Some(v);
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim().to_lowercase().parse().map_err(|e: T::Err| {
        EdgeflowError::Config(format!("invalid value '{raw}' for {ENV_PREFIX}{name}: {e}"))
    })
}

/// Store-and-forward settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreAndForwardConfig {
    /// Persist and retry failed executions.
    #[serde(default)]
    pub enabled: bool,
    /// Time between retry passes, e.g. `"30s"`.
    #[serde(default = "default_retry_interval")]
    pub retry_interval: String,
    /// Failed retries after which an object is dropped.
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,
    /// `SQLite` database file. `None` keeps objects in memory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

impl Default for StoreAndForwardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            retry_interval: default_retry_interval(),
            max_retry_count: default_max_retry_count(),
            database_path: None,
        }
    }
}

impl StoreAndForwardConfig {
    /// Builds the retry policy.
    ///
    /// An interval that doesn't parse or is below [`MIN_RETRY_INTERVAL`] is
    /// replaced by the minimum.
    pub fn retry_policy(&self) -> RetryPolicy {
        let retry_interval = match parse_duration(&self.retry_interval) {
            Some(interval) if interval >= MIN_RETRY_INTERVAL => interval,
            Some(_) => {
                warn!(
                    retry_interval = %self.retry_interval,
                    "retry interval below minimum, using {MIN_RETRY_INTERVAL:?}"
                );
                MIN_RETRY_INTERVAL
            }
            None => {
                warn!(
                    retry_interval = %self.retry_interval,
                    "retry interval is not a valid duration, using {MIN_RETRY_INTERVAL:?}"
                );
                MIN_RETRY_INTERVAL
            }
        };
        RetryPolicy {
            enabled: self.enabled,
            retry_interval,
            max_retry_count: self.max_retry_count,
        }
    }
}

/// Kind of trigger feeding the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerKind {
    /// Subscribe to broker topics.
    #[default]
    MessageBus,
    /// Handle HTTP requests.
    Http,
    /// Accept envelopes pushed by the embedding application.
    Custom,
}

/// Trigger settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Trigger kind.
    #[serde(default)]
    pub kind: TriggerKind,
    /// Comma-separated subscribe topics.
    #[serde(default)]
    pub subscribe_topics: String,
    /// Response topic; may contain `{key}` placeholders.
    #[serde(default)]
    pub publish_topic: Option<String>,
    /// Prefix joined in front of every subscribe and publish topic.
    #[serde(default)]
    pub base_topic_prefix: Option<String>,
    /// Messages processed concurrently.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            kind: TriggerKind::default(),
            subscribe_topics: String::new(),
            publish_topic: None,
            base_topic_prefix: None,
            worker_pool_size: default_worker_pool_size(),
        }
    }
}

impl TriggerConfig {
    /// Returns the subscribe topics with the base prefix applied.
    pub fn subscribe_topics(&self, syntax: &TopicSyntax) -> Vec<String> {
        self.subscribe_topics
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| self.prefixed(t, syntax))
            .collect()
    }

    /// Returns the publish topic with the base prefix applied.
    pub fn publish_topic(&self, syntax: &TopicSyntax) -> Option<String> {
        self.publish_topic
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| self.prefixed(t, syntax))
    }

    fn prefixed(&self, topic: &str, syntax: &TopicSyntax) -> String {
        match self.base_topic_prefix.as_deref().map(str::trim) {
            Some(prefix) if !prefix.is_empty() => {
                let prefix = prefix.trim_end_matches(syntax.separator.as_str());
                format!("{prefix}{}{topic}", syntax.separator)
            }
            _ => topic.to_string(),
        }
    }
}

/// Parameters of one configurable function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionConfig {
    /// Parameter values keyed by (case-insensitive) name.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

/// A pipeline bound to specific topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicPipelineConfig {
    /// Pipeline id.
    pub id: String,
    /// Comma-separated topic patterns.
    pub topics: String,
    /// Comma-separated function names.
    pub execution_order: String,
}

/// Configurable pipelines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// How payloads are decoded.
    #[serde(default)]
    pub target_type: TargetType,
    /// Comma-separated functions of the default pipeline.
    #[serde(default)]
    pub execution_order: String,
    /// Function parameters, keyed by function name.
    #[serde(default)]
    pub functions: HashMap<String, FunctionConfig>,
    /// Additional pipelines keyed by an arbitrary name.
    #[serde(default)]
    pub per_topic_pipelines: HashMap<String, TopicPipelineConfig>,
}

impl PipelineConfig {
    /// Builds the configured pipelines.
    ///
    /// The default pipeline comes first when `execution_order` is set;
    /// per-topic pipelines follow, sorted by id.
    pub fn build_pipelines(
        &self,
        shutdown: Option<&Arc<CancellationToken>>,
    ) -> Result<Vec<FunctionPipeline>> {
        let mut pipelines = Vec::new();
        if !self.execution_order.trim().is_empty() {
            let functions = self.build_functions(&self.execution_order, shutdown)?;
            pipelines.push(FunctionPipeline::default_pipeline(functions));
        }

        let mut per_topic: Vec<_> = self.per_topic_pipelines.values().collect();
        per_topic.sort_by(|a, b| a.id.cmp(&b.id));
        for config in per_topic {
            let topics: Vec<String> = split_list(&config.topics).map(str::to_string).collect();
            if topics.is_empty() {
                return Err(EdgeflowError::Config(format!(
                    "pipeline '{}' has no topics",
                    config.id
                )));
            }
            let functions = self.build_functions(&config.execution_order, shutdown)?;
            pipelines.push(FunctionPipeline::new(config.id.as_str(), topics, functions));
        }
        Ok(pipelines)
    }

    fn build_functions(
        &self,
        execution_order: &str,
        shutdown: Option<&Arc<CancellationToken>>,
    ) -> Result<Vec<Arc<dyn AppFunction>>> {
        split_list(execution_order)
            .map(|name| {
                let config = self
                    .functions
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, config)| config)
                    .ok_or_else(|| {
                        EdgeflowError::Config(format!(
                            "function '{name}' is in the execution order but has no configuration"
                        ))
                    })?;
                build_function(name, config, shutdown.cloned())
            })
            .collect()
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}
