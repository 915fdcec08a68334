//! Function pipelines and their execution.
//!
//! This module provides:
//! - Pipeline definitions with a version hash over their function names
//! - A registry of pipelines keyed by id
//! - Topic matching with configurable wildcards
//! - The sequential execution engine
//! - A router that decodes messages and fans them out to matching pipelines

mod engine;
mod function_pipeline;
#[cfg(test)]
mod integration_tests;
mod registry;
mod router;
mod topics;

pub use engine::{ExecutionOutcome, PipelineEngine};
pub use function_pipeline::{FunctionPipeline, DEFAULT_PIPELINE_ID, TOPIC_WILDCARD};
pub use registry::PipelineRegistry;
pub use router::{OutputHandler, PipelineOutcome, PipelineRouter, TargetType};
pub use topics::{TopicMatcher, TopicSyntax};
