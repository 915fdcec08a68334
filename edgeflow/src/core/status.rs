//! Function status enum.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What a pipeline function asks the engine to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionStatus {
    /// Pass the result to the next function.
    Continue,
    /// Stop the pipeline without error (filtered out, batch not full).
    Halt,
    /// Stop the pipeline with an error.
    Fail,
}

impl Default for FunctionStatus {
    fn default() -> Self {
        Self::Continue
    }
}

impl fmt::Display for FunctionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::Halt => write!(f, "halt"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

impl FunctionStatus {
    /// Returns true if the engine should run the next function.
    #[must_use]
    pub const fn should_continue(self) -> bool {
        matches!(self, Self::Continue)
    }

    /// Returns true if the status indicates failure.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Fail)
    }
}
