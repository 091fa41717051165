//! The external tool stage.

use super::{ExecutionResult, StageRunner};
use crate::context::RunContext;
use crate::core::{Artifact, Encoding, StageKind};
use crate::errors::StageError;
use crate::pipeline::StageSpec;
use crate::process::{is_transient_spawn_error, run_process, ProcessCommand, ProcessError, ProcessOutcome};
use crate::tools::{ToolDefinition, ToolIo, ToolPath, INPUT_PLACEHOLDER, OUTPUT_PLACEHOLDER};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name reported for the program built by the pipeline itself.
const PROGRAM_NAME: &str = "program";

/// The executable a [`ToolRunner`] invokes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Program {
    /// A resolved catalog tool.
    Tool(ToolPath),
    /// The stage's input artifact, written out with execute permission.
    InputArtifact,
}

impl Program {
    /// The name used in errors and logs.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Tool(tool) => &tool.name,
            Self::InputArtifact => PROGRAM_NAME,
        }
    }
}

/// Runs a stage as a subprocess.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    program: Program,
    args: Vec<String>,
    input_args: BTreeMap<Encoding, Vec<String>>,
    output_args: BTreeMap<Encoding, Vec<String>>,
    io: ToolIo,
}

impl ToolRunner {
    /// Creates a runner for a resolved tool using its catalog definition.
    #[must_use]
    pub fn new(tool: ToolPath, definition: &ToolDefinition) -> Self {
        Self {
            program: Program::Tool(tool),
            args: definition.args.clone(),
            input_args: definition.input_args.clone(),
            output_args: definition.output_args.clone(),
            io: definition.io,
        }
    }

    /// Creates a stdio runner for a resolved tool.
    #[must_use]
    pub fn stdio(tool: ToolPath) -> Self {
        Self {
            program: Program::Tool(tool),
            args: Vec::new(),
            input_args: BTreeMap::new(),
            output_args: BTreeMap::new(),
            io: ToolIo::Stdio,
        }
    }

    /// Creates a runner that executes its input artifact.
    #[must_use]
    pub fn execute_input() -> Self {
        Self {
            program: Program::InputArtifact,
            args: Vec::new(),
            input_args: BTreeMap::new(),
            output_args: BTreeMap::new(),
            io: ToolIo::Stdio,
        }
    }

    /// Sets the arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the I/O convention.
    #[must_use]
    pub fn with_io(mut self, io: ToolIo) -> Self {
        self.io = io;
        self
    }

    /// The arguments for an input and output encoding pair.
    #[must_use]
    pub fn args_for(&self, input: Encoding, output: Encoding) -> Vec<String> {
        let mut args = self.args.clone();
        args.extend(self.input_args.get(&input).into_iter().flatten().cloned());
        args.extend(self.output_args.get(&output).into_iter().flatten().cloned());
        args
    }

    /// Returns the program this runner invokes.
    #[must_use]
    pub fn program(&self) -> &Program {
        &self.program
    }

    async fn program_path(&self, spec: &StageSpec, input: &Artifact, ctx: &RunContext) -> Result<PathBuf, StageError> {
        match &self.program {
            Program::Tool(tool) => Ok(tool.path.clone()),
            Program::InputArtifact => {
                let path = ctx.workdir().file(&spec.name, "exe", "out");
                write_executable(&path, input.as_bytes())
                    .await
                    .map_err(|e| StageError::io(&spec.name, format!("writing {}: {e}", path.display())))?;
                Ok(path)
            }
        }
    }
}

#[async_trait]
impl StageRunner for ToolRunner {
    fn kind(&self) -> StageKind {
        StageKind::External
    }

    async fn run(&self, spec: &StageSpec, input: Artifact, ctx: &RunContext) -> ExecutionResult {
        let stage = spec.name.as_str();
        let tool = self.program.name();
        let program = self.program_path(spec, &input, ctx).await?;
        let args = self.args_for(input.encoding(), spec.output_encoding);

        let (command, stdin, output_file) = match self.io {
            ToolIo::Stdio => {
                let stdin = match self.program {
                    Program::Tool(_) => Some(input.as_bytes()),
                    Program::InputArtifact => None,
                };
                (ProcessCommand::new(&program).args(args), stdin, None)
            }
            ToolIo::Files => {
                let workdir = ctx.workdir();
                let input_file = workdir.file(stage, "in", input.kind().extension(input.encoding()));
                let output_file = workdir.file(stage, "out", spec.output.extension(spec.output_encoding));
                tokio::fs::write(&input_file, input.as_bytes())
                    .await
                    .map_err(|e| StageError::io(stage, format!("writing {}: {e}", input_file.display())))?;
                remove_stale(&output_file)
                    .await
                    .map_err(|e| StageError::io(stage, format!("removing {}: {e}", output_file.display())))?;

                let args = substitute(&args, &input_file, &output_file);
                (ProcessCommand::new(&program).args(args), None, Some(output_file))
            }
        };
        let command = command.current_dir(ctx.workdir().path());

        info!(stage, tool, program = %program.display(), args = ?command.args, "Invoking tool");
        let outcome = run_process(&command, stdin, spec.timeout, ctx.cancellation())
            .await
            .map_err(|e| match e {
                ProcessError::Spawn(err) => StageError::Spawn {
                    stage: stage.to_string(),
                    tool: tool.to_string(),
                    message: err.to_string(),
                    transient: is_transient_spawn_error(&err),
                },
                ProcessError::Io(err) => StageError::io(stage, err),
            })?;

        let stdout = match outcome {
            ProcessOutcome::Exited { status, stdout, stderr } => {
                if !status.success() {
                    let err = StageError::tool_failed(stage, tool, status.code(), String::from_utf8_lossy(&stderr));
                    return Err(match self.program {
                        Program::InputArtifact => err.with_stdout(String::from_utf8_lossy(&stdout)),
                        Program::Tool(_) => err,
                    });
                }
                if !stderr.is_empty() {
                    debug!(stage, tool, stderr = %String::from_utf8_lossy(&stderr), "Tool wrote to stderr");
                }
                stdout
            }
            ProcessOutcome::TimedOut { .. } => {
                return Err(StageError::Timeout {
                    stage: stage.to_string(),
                    tool: tool.to_string(),
                    duration: spec.timeout,
                });
            }
            ProcessOutcome::Cancelled { reason } => return Err(StageError::cancelled(stage, reason)),
        };

        let payload = match output_file {
            None => stdout,
            Some(path) => match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(StageError::invalid_artifact(
                        stage,
                        format!("{tool} did not write its output file {}", path.display()),
                    ));
                }
                Err(e) => return Err(StageError::io(stage, format!("reading {}: {e}", path.display()))),
            },
        };

        let artifact = Artifact::new(spec.output, spec.output_encoding, payload);
        artifact
            .validate()
            .map_err(|detail| StageError::invalid_artifact(stage, detail))?;
        Ok(artifact)
    }
}

/// Replaces the file placeholders in every argument.
fn substitute(args: &[String], input: &Path, output: &Path) -> Vec<String> {
    let input = input.to_string_lossy();
    let output = output.to_string_lossy();
    args.iter()
        .map(|arg| {
            arg.replace(INPUT_PLACEHOLDER, &input)
                .replace(OUTPUT_PLACEHOLDER, &output)
        })
        .collect()
}

async fn remove_stale(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

async fn write_executable(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    tokio::fs::write(path, bytes).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    }
    Ok(())
}
