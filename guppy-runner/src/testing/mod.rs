//! Testing utilities for guppy-runner pipelines.
//!
//! This module provides:
//! - A stub frontend and a recording stage runner
//! - Fake external tools written as shell scripts (unix only)
//! - Assertions over run reports and emitted events

mod assertions;
#[cfg(unix)]
mod fixtures;
mod mocks;

pub use assertions::{
    assert_event_order, assert_report_failed_at, assert_report_stages, assert_report_succeeded,
};
#[cfg(unix)]
pub use fixtures::FakeToolbox;
pub use mocks::{RecordingRunner, StubFrontend};
