//! The in-process frontend stage.

use super::{ExecutionResult, StageRunner};
use crate::cancellation::CancellationToken;
use crate::context::RunContext;
use crate::core::{Artifact, StageKind};
use crate::errors::{SourceLocation, StageError};
use crate::pipeline::StageSpec;
use crate::tools::ResolvedTools;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// What a frontend is asked to compile.
#[derive(Debug, Clone, Copy)]
pub struct CompileRequest<'a> {
    /// The program text.
    pub source: &'a str,
    /// Where the source came from, for diagnostics (a path or `<stdin>`).
    pub origin: &'a str,
    /// The module to compile; the default module when `None`.
    pub module_name: Option<&'a str>,
    /// Tools resolved for the run, including those the frontend requires.
    pub tools: &'a ResolvedTools,
    /// Time budget for the compilation.
    pub timeout: Duration,
    /// The run's cancellation token.
    pub cancel: &'a CancellationToken,
}

/// A compiler diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileDiagnostic {
    /// The compiler's message.
    pub message: String,
    /// Where in the source the problem is, when known.
    pub location: Option<SourceLocation>,
}

impl CompileDiagnostic {
    /// Creates a diagnostic without a location.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
        }
    }

    /// Sets the location.
    #[must_use]
    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }
}

/// Why a frontend did not produce IR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendError {
    /// The program was rejected.
    Compile(CompileDiagnostic),
    /// A helper process could not be started.
    Spawn {
        /// The helper tool name.
        tool: String,
        /// The operating system error.
        message: String,
        /// Whether a retry could succeed.
        transient: bool,
    },
    /// The compilation exceeded its time budget.
    Timeout(Duration),
    /// The run was cancelled.
    Cancelled(String),
}

impl From<CompileDiagnostic> for FrontendError {
    fn from(diagnostic: CompileDiagnostic) -> Self {
        Self::Compile(diagnostic)
    }
}

/// A source-to-IR compiler.
#[async_trait]
pub trait Frontend: Send + Sync + Debug {
    /// A short name used in logs and errors.
    fn name(&self) -> &str;

    /// Catalog tools that must be resolved before the frontend can run.
    fn required_tools(&self) -> Vec<String> {
        Vec::new()
    }

    /// Compiles source text to serialized IR.
    ///
    /// Dropping the returned future must abandon the compilation.
    async fn compile(&self, request: CompileRequest<'_>) -> Result<Vec<u8>, FrontendError>;
}

/// Runs a [`Frontend`] as a pipeline stage.
#[derive(Debug, Clone)]
pub struct FrontendRunner {
    frontend: Arc<dyn Frontend>,
    tools: ResolvedTools,
    module_name: Option<String>,
    origin: String,
}

impl FrontendRunner {
    /// Creates a runner for the given frontend.
    #[must_use]
    pub fn new(frontend: Arc<dyn Frontend>) -> Self {
        Self {
            frontend,
            tools: ResolvedTools::new(),
            module_name: None,
            origin: "<input>".to_string(),
        }
    }

    /// Sets the tools available to the frontend.
    #[must_use]
    pub fn with_tools(mut self, tools: ResolvedTools) -> Self {
        self.tools = tools;
        self
    }

    /// Sets the module to compile.
    #[must_use]
    pub fn with_module(mut self, module_name: Option<String>) -> Self {
        self.module_name = module_name;
        self
    }

    /// Sets the source origin reported in diagnostics.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    fn stage_error(&self, stage: &str, err: FrontendError) -> StageError {
        match err {
            FrontendError::Compile(diagnostic) => StageError::Compile {
                stage: stage.to_string(),
                message: diagnostic.message,
                location: diagnostic.location,
            },
            FrontendError::Spawn {
                tool,
                message,
                transient,
            } => StageError::Spawn {
                stage: stage.to_string(),
                tool,
                message,
                transient,
            },
            FrontendError::Timeout(duration) => StageError::Timeout {
                stage: stage.to_string(),
                tool: self.frontend.name().to_string(),
                duration,
            },
            FrontendError::Cancelled(reason) => StageError::cancelled(stage, reason),
        }
    }
}

#[async_trait]
impl StageRunner for FrontendRunner {
    fn kind(&self) -> StageKind {
        StageKind::InProcess
    }

    async fn run(&self, spec: &StageSpec, input: Artifact, ctx: &RunContext) -> ExecutionResult {
        let source = input.as_text().map_err(|e| StageError::Compile {
            stage: spec.name.clone(),
            message: format!("source is not valid UTF-8: {e}"),
            location: None,
        })?;

        let cancel = ctx.cancellation();
        let request = CompileRequest {
            source,
            origin: &self.origin,
            module_name: self.module_name.as_deref(),
            tools: &self.tools,
            timeout: spec.timeout,
            cancel,
        };
        debug!(frontend = self.frontend.name(), origin = %self.origin, module = ?self.module_name, "Compiling source");

        // In-process frontends need not watch the clock or the token themselves.
        let result = tokio::select! {
            result = self.frontend.compile(request) => result,
            () = tokio::time::sleep(spec.timeout) => Err(FrontendError::Timeout(spec.timeout)),
            () = cancel.cancelled() => Err(FrontendError::Cancelled(cancel.reason_or_default())),
        };

        let payload = result.map_err(|e| self.stage_error(&spec.name, e))?;
        let artifact = Artifact::new(spec.output, spec.output_encoding, payload);
        artifact
            .validate()
            .map_err(|detail| StageError::invalid_artifact(&spec.name, detail))?;
        Ok(artifact)
    }
}
