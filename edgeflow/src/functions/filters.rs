//! Event filters by profile, device, source, or reading resource name.

use super::AppFunction;
use crate::context::FunctionContext;
use crate::core::{Event, FunctionOutput, PipelineData};
use crate::errors::FunctionError;
use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

/// The event property a [`Filter`] inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterTarget {
    /// `Event::profile_name`
    ProfileName,
    /// `Event::device_name`
    DeviceName,
    /// `Event::source_name`
    SourceName,
    /// `Reading::resource_name` of each reading
    ResourceName,
}

impl FilterTarget {
    const fn function_name(self) -> &'static str {
        match self {
            Self::ProfileName => "FilterByProfileName",
            Self::DeviceName => "FilterByDeviceName",
            Self::SourceName => "FilterBySourceName",
            Self::ResourceName => "FilterByResourceName",
        }
    }
}

/// Passes or drops events whose property matches one of the configured
/// patterns.
///
/// Patterns are regular expressions anchored at the start of the value. With
/// `filter_out` unset, only matching events pass; with it set, matching
/// events are dropped. An empty pattern list passes everything.
#[derive(Debug, Clone)]
pub struct Filter {
    target: FilterTarget,
    patterns: Vec<Regex>,
    filter_out: bool,
}

impl Filter {
    /// Creates a filter. Fails if a pattern is not a valid regular expression.
    pub fn new(
        target: FilterTarget,
        values: &[impl AsRef<str>],
        filter_out: bool,
    ) -> Result<Self, FunctionError> {
        let patterns = values
            .iter()
            .map(|v| {
                Regex::new(&format!("^(?:{})", v.as_ref())).map_err(|e| {
                    FunctionError::contract_invalid(format!(
                        "{}: invalid filter value '{}': {e}",
                        target.function_name(),
                        v.as_ref()
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            target,
            patterns,
            filter_out,
        })
    }

    fn any_match(&self, value: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(value))
    }

    fn accepts(&self, value: &str) -> bool {
        if self.patterns.is_empty() {
            return true;
        }
        self.any_match(value) != self.filter_out
    }

    fn filter_readings(&self, event: Event) -> Option<Event> {
        if self.patterns.is_empty() {
            return Some(event);
        }
        let Event { readings, .. } = &event;
        let kept: Vec<_> = readings
            .iter()
            .filter(|r| self.any_match(&r.resource_name) != self.filter_out)
            .cloned()
            .collect();
        if kept.is_empty() {
            return None;
        }
        Some(Event {
            readings: kept,
            ..event
        })
    }
}

#[async_trait]
impl AppFunction for Filter {
    fn name(&self) -> &str {
        self.target.function_name()
    }

    async fn apply(&self, ctx: &mut FunctionContext, data: Option<PipelineData>) -> FunctionOutput {
        let event = match data {
            Some(PipelineData::Event(event)) => event,
            Some(_) => {
                return FunctionOutput::fail(FunctionError::contract_invalid(format!(
                    "{}: type received is not an Event in pipeline '{}'",
                    self.name(),
                    ctx.pipeline_id()
                )))
            }
            None => {
                return FunctionOutput::fail(FunctionError::contract_invalid(format!(
                    "{}: no Event Received in pipeline '{}'",
                    self.name(),
                    ctx.pipeline_id()
                )))
            }
        };

        let value = match self.target {
            FilterTarget::ProfileName => &event.profile_name,
            FilterTarget::DeviceName => &event.device_name,
            FilterTarget::SourceName => &event.source_name,
            FilterTarget::ResourceName => {
                return match self.filter_readings(event) {
                    Some(event) => FunctionOutput::proceed(event),
                    None => {
                        debug!(pipeline_id = ctx.pipeline_id(), "No readings left after filtering");
                        FunctionOutput::halt()
                    }
                };
            }
        };

        if self.accepts(value) {
            FunctionOutput::proceed(event)
        } else {
            debug!(
                pipeline_id = ctx.pipeline_id(),
                filter = self.name(),
                value = %value,
                "Event not accepted"
            );
            FunctionOutput::halt()
        }
    }
}
