//! Function output type with factory methods.

use super::{FunctionStatus, PipelineData};
use crate::errors::FunctionError;

/// The result of one pipeline function invocation.
///
/// `FunctionOutput` pairs the continue flag with either the next value or an
/// error marker. A halt without an error is a normal termination (a filter
/// dropping the message, a batch still filling up).
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionOutput {
    /// What the engine should do next.
    pub status: FunctionStatus,
    /// The value to pass on (continue) or the value a halt carries.
    pub data: Option<PipelineData>,
    /// The error marker (fail only).
    pub error: Option<FunctionError>,
}

impl FunctionOutput {
    /// Continues with `data` as the next function's input.
    #[must_use]
    pub fn proceed(data: impl Into<PipelineData>) -> Self {
        Self {
            status: FunctionStatus::Continue,
            data: Some(data.into()),
            error: None,
        }
    }

    /// Continues with an optional value.
    #[must_use]
    pub const fn proceed_with(data: Option<PipelineData>) -> Self {
        Self {
            status: FunctionStatus::Continue,
            data,
            error: None,
        }
    }

    /// Stops the pipeline without an error.
    #[must_use]
    pub const fn halt() -> Self {
        Self {
            status: FunctionStatus::Halt,
            data: None,
            error: None,
        }
    }

    /// Stops the pipeline without an error, carrying a value for the caller.
    #[must_use]
    pub fn halt_with(data: impl Into<PipelineData>) -> Self {
        Self {
            status: FunctionStatus::Halt,
            data: Some(data.into()),
            error: None,
        }
    }

    /// Stops the pipeline with an error.
    #[must_use]
    pub const fn fail(error: FunctionError) -> Self {
        Self {
            status: FunctionStatus::Fail,
            data: None,
            error: Some(error),
        }
    }

    /// Returns true if the engine should run the next function.
    #[must_use]
    pub const fn should_continue(&self) -> bool {
        self.status.should_continue()
    }

    /// Returns true if the output carries an error.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        self.status.is_failure()
    }

    /// Splits the output into the `(continue, result)` pair.
    #[must_use]
    pub fn into_parts(self) -> (bool, Result<Option<PipelineData>, FunctionError>) {
        let should_continue = self.should_continue();
        match self.error {
            Some(err) => (should_continue, Err(err)),
            None => (should_continue, Ok(self.data)),
        }
    }
}

impl Default for FunctionOutput {
    fn default() -> Self {
        Self::halt()
    }
}
