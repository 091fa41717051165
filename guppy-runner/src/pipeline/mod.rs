//! Pipeline building and execution.
//!
//! This module provides:
//! - Stage specifications
//! - A builder that validates kind compatibility before anything runs
//! - The sequential, fail-fast executor
//! - Run reports

mod builder;
mod executor;
mod report;
mod spec;

pub use builder::PipelineBuilder;
pub use executor::Pipeline;
pub use report::{PipelineReport, StageRecord};
pub use spec::StageSpec;
