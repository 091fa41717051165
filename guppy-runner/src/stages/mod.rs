//! Stage runners.
//!
//! A [`StageRunner`] executes one pipeline stage: it takes the input artifact
//! and either produces the stage's output artifact or a classified
//! [`StageError`]. Two families implement it:
//!
//! - [`FrontendRunner`]: an in-process call into a [`Frontend`] compiler.
//! - [`ToolRunner`]: a subprocess, either a catalog tool or the input
//!   artifact itself for the final `run` stage.
//!
//! [`RetryingRunner`] wraps any runner to retry transient spawn failures.

mod frontend;
mod python;
mod retry;
mod tool;

pub use frontend::{CompileDiagnostic, CompileRequest, Frontend, FrontendError, FrontendRunner};
pub use python::PythonFrontend;
pub use retry::{BackoffStrategy, JitterStrategy, RetryConfig, RetryState, RetryingRunner};
pub use tool::{Program, ToolRunner};

use crate::context::RunContext;
use crate::core::{Artifact, StageKind};
use crate::errors::StageError;
use crate::pipeline::StageSpec;
use async_trait::async_trait;
use std::fmt::Debug;

/// The result of running one stage: an artifact or an error, never both.
pub type ExecutionResult = Result<Artifact, StageError>;

/// Executes a single pipeline stage.
///
/// The pipeline guarantees `input.kind() == spec.input` before calling
/// [`StageRunner::run`].
#[async_trait]
pub trait StageRunner: Send + Sync + Debug {
    /// Whether the runner works in-process or through a subprocess.
    fn kind(&self) -> StageKind;

    /// Runs the stage.
    async fn run(&self, spec: &StageSpec, input: Artifact, ctx: &RunContext) -> ExecutionResult;
}
