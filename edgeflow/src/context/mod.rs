//! Per-message execution context.

#[cfg(test)]
mod context_tests;
mod function_context;

pub use function_context::{
    FunctionContext, DEVICE_NAME_KEY, PIPELINE_ID_KEY, PROFILE_NAME_KEY, RECEIVED_TOPIC_KEY,
    SOURCE_NAME_KEY,
};
