//! Test assertions for execution outcomes.

use crate::core::PipelineData;
use crate::pipeline::ExecutionOutcome;

/// Asserts that every function continued and returns the final data.
#[track_caller]
pub fn assert_completed(outcome: &ExecutionOutcome) -> Option<&PipelineData> {
    match outcome {
        ExecutionOutcome::Completed(data) => data.as_ref(),
        other => panic!("Expected completed execution, got {other:?}"),
    }
}

/// Asserts that the pipeline halted without error at function `index`.
#[track_caller]
pub fn assert_halted_at(outcome: &ExecutionOutcome, index: usize) {
    assert!(
        matches!(outcome, ExecutionOutcome::Halted { at } if *at == index),
        "Expected halt at function #{index}, got {outcome:?}"
    );
}

/// Asserts that the pipeline failed at function `index`.
#[track_caller]
pub fn assert_failed_at(outcome: &ExecutionOutcome, index: usize) {
    assert!(
        matches!(outcome, ExecutionOutcome::Failed { at, .. } if *at == index),
        "Expected failure at function #{index}, got {outcome:?}"
    );
}
