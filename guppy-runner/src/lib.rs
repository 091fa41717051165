//! # guppy-runner
//!
//! Compiles Guppy quantum programs through the HUGR, MLIR and LLVM toolchain
//! and runs the resulting executable.
//!
//! The toolchain is modelled as a pipeline of stages, each turning one kind
//! of artifact into the next:
//!
//! - **Frontend**: Guppy source to HUGR, in-process
//! - **External tools**: `hugr-mlir-translate`, `hugr-mlir-opt`,
//!   `mlir-translate`, `llc` and `cc`, located through overrides,
//!   environment variables and `PATH`
//! - **Run**: the linked executable itself
//!
//! Runs can start from any intermediate kind, stop early, and persist
//! intermediates along the way.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use guppy_runner::prelude::*;
//!
//! let orchestrator = Orchestrator::new(RunnerConfig::guppy_toolchain(), Environment::from_process())?;
//! let request = RunRequest::from_path("program.py").until(ArtifactKind::LoweredMlir);
//!
//! let outcome = orchestrator.run(request, Arc::new(CancellationToken::new())).await?;
//! std::process::exit(outcome.exit_code());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod orchestrator;
pub mod pipeline;
pub mod process;
pub mod stages;
pub mod testing;
pub mod tools;
pub mod workdir;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{RunnerConfig, StageBackend, StageDefinition};
    pub use crate::context::RunContext;
    pub use crate::core::{Artifact, ArtifactKind, Encoding, StageKind, StageStatus};
    pub use crate::errors::{
        ConfigError, ErrorClass, PipelineValidationError, RunnerError, StageError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink, RunEvent};
    pub use crate::orchestrator::{InputSource, Orchestrator, RunOutcome, RunRequest};
    pub use crate::pipeline::{Pipeline, PipelineBuilder, PipelineReport, StageSpec};
    pub use crate::stages::{Frontend, PythonFrontend, StageRunner};
    pub use crate::tools::{Environment, ToolDefinition, ToolLocator};
    pub use std::sync::Arc;
}
