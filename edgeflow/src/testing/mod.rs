//! Testing utilities for edgeflow pipelines.
//!
//! This module provides:
//! - Mock functions that count, record, fail or sleep
//! - A mock message client that can simulate a broker outage
//! - Assertions for execution outcomes

mod assertions;
mod client;
mod mocks;

pub use assertions::{assert_completed, assert_failed_at, assert_halted_at};
pub use client::MockMessageClient;
pub use mocks::{
    CountingFunction, FailingFunction, RecordedCall, RecordingFunction, SlowFunction,
};
