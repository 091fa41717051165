//! Error types for guppy-runner.
//!
//! Errors are split by the point at which they surface:
//!
//! - [`ConfigError`]: configuration and stage selection problems, raised before
//!   any stage runs.
//! - [`PipelineValidationError`]: a pipeline definition that cannot be assembled.
//! - [`StageError`]: the classified failure of a single stage.
//!
//! Every error maps onto an [`ErrorClass`], which in turn decides the process
//! exit code reported by the CLI.

use crate::core::{ArtifactKind, Encoding};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Coarse classification of a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Missing tools, malformed configuration or stage selection.
    Config,
    /// The frontend rejected the program.
    Compile,
    /// An external tool exited unsuccessfully or could not be started.
    ToolFailed,
    /// A stage exceeded its time budget.
    Timeout,
    /// A stage produced a structurally malformed artifact.
    InvalidArtifact,
    /// The run was cancelled.
    Cancelled,
    /// Anything else: I/O failures and pipeline assembly bugs.
    Internal,
}

impl ErrorClass {
    /// Returns the process exit code associated with this class.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Internal => 1,
            Self::Config => 2,
            Self::Compile => 3,
            Self::ToolFailed => 4,
            Self::Timeout => 5,
            Self::InvalidArtifact => 6,
            Self::Cancelled => 130,
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config => write!(f, "configuration error"),
            Self::Compile => write!(f, "compile error"),
            Self::ToolFailed => write!(f, "tool failure"),
            Self::Timeout => write!(f, "timeout"),
            Self::InvalidArtifact => write!(f, "invalid artifact"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Internal => write!(f, "internal error"),
        }
    }
}

/// The main error type for guppy-runner operations.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Configuration or stage selection error.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// The pipeline could not be assembled.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A stage failed outside of a pipeline run (e.g. loading the input).
    #[error("{0}")]
    Stage(#[from] StageError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RunnerError {
    /// Classifies the error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Config(_) => ErrorClass::Config,
            Self::Stage(err) => err.class(),
            Self::Validation(_) | Self::Io(_) | Self::Serialization(_) => ErrorClass::Internal,
        }
    }

    /// Returns the exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.class().exit_code()
    }
}

impl From<serde_json::Error> for RunnerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "PIPELINE-001-KIND_MISMATCH").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a pipeline definition cannot be assembled.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the contract error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// One configuration source consulted while resolving a tool, and why it was
/// rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCheck {
    /// Human-readable description of the source.
    pub source: String,
    /// Why the source did not yield a usable path.
    pub reason: String,
}

impl SourceCheck {
    /// Creates a new source check record.
    #[must_use]
    pub fn new(source: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for SourceCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source, self.reason)
    }
}

/// Configuration errors. These are always raised before any stage executes.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    /// No configured source produced an existing, executable path.
    #[error("Could not find tool '{tool}'. Checked:\n{}", list_checks(.checked))]
    MissingTool {
        /// The logical tool name.
        tool: String,
        /// Every source consulted, in priority order.
        checked: Vec<SourceCheck>,
    },

    /// A tool name that the configuration does not define.
    #[error("Unknown tool '{name}' (configured tools: {})", .known.join(", "))]
    UnknownTool {
        /// The requested name.
        name: String,
        /// The configured tool names.
        known: Vec<String>,
    },

    /// A stage name that the configuration does not define.
    #[error("Unknown stage '{name}' (configured stages: {})", .known.join(", "))]
    UnknownStage {
        /// The requested name.
        name: String,
        /// The configured stage names.
        known: Vec<String>,
    },

    /// The stage selection does not describe a runnable pipeline.
    #[error("Invalid stage selection: {0}")]
    InvalidSelection(String),

    /// An artifact was requested that the selected stages never produce.
    #[error("Cannot produce a {kind} artifact from the given input: {reason}")]
    UnreachableArtifact {
        /// The requested artifact kind.
        kind: ArtifactKind,
        /// Why it is unreachable.
        reason: String,
    },

    /// An artifact kind was paired with an encoding it does not support.
    #[error("{kind} artifacts cannot use the {encoding} encoding")]
    UnsupportedEncoding {
        /// The artifact kind.
        kind: ArtifactKind,
        /// The rejected encoding.
        encoding: Encoding,
    },

    /// A frontend stage was selected but no frontend is installed.
    #[error("Stage '{stage}' needs a frontend compiler, but none is configured")]
    MissingFrontend {
        /// The stage requiring the frontend.
        stage: String,
    },

    /// The configuration is internally inconsistent.
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// The configuration file could not be read or parsed.
    #[error("Failed to load configuration from {}: {message}", .path.display())]
    File {
        /// The configuration file path.
        path: PathBuf,
        /// The underlying error.
        message: String,
    },
}

impl ConfigError {
    /// Creates a missing tool error.
    #[must_use]
    pub fn missing_tool(tool: impl Into<String>, checked: Vec<SourceCheck>) -> Self {
        Self::MissingTool {
            tool: tool.into(),
            checked,
        }
    }

    /// Creates an invalid configuration error.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

fn list_checks(checked: &[SourceCheck]) -> String {
    if checked.is_empty() {
        return "  (no sources configured)".to_string();
    }
    checked
        .iter()
        .map(|check| format!("  - {check}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A position in a source program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// File name as reported by the compiler.
    pub file: String,
    /// 1-based line number.
    pub line: u32,
    /// 1-based column, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl SourceLocation {
    /// Creates a new source location.
    #[must_use]
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column: None,
        }
    }

    /// Sets the column.
    #[must_use]
    pub fn with_column(mut self, column: u32) -> Self {
        self.column = Some(column);
        self
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.column {
            Some(column) => write!(f, "{}:{}:{}", self.file, self.line, column),
            None => write!(f, "{}:{}", self.file, self.line),
        }
    }
}

/// The classified failure of a single pipeline stage.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageError {
    /// The frontend rejected the program.
    #[error("stage '{stage}' failed to compile{}: {message}", at_location(.location.as_ref()))]
    Compile {
        /// The stage name.
        stage: String,
        /// The compiler's message.
        message: String,
        /// Where in the source the problem is, when reported.
        location: Option<SourceLocation>,
    },

    /// An external tool exited unsuccessfully.
    #[error("stage '{stage}': tool '{tool}' {}", describe_exit(.exit_code))]
    ToolFailed {
        /// The stage name.
        stage: String,
        /// The tool name.
        tool: String,
        /// The exit code; `None` when the process was terminated by a signal.
        exit_code: Option<i32>,
        /// Captured standard error, verbatim.
        stderr: String,
        /// Captured standard output, kept when it is the user's program that
        /// failed.
        #[serde(default, skip_serializing_if = "String::is_empty")]
        stdout: String,
    },

    /// A stage exceeded its time budget and was killed.
    #[error("stage '{stage}': tool '{tool}' timed out after {:.1}s", .duration.as_secs_f64())]
    Timeout {
        /// The stage name.
        stage: String,
        /// The tool name.
        tool: String,
        /// The time budget that was exceeded.
        duration: Duration,
    },

    /// A stage ran successfully but produced a malformed artifact.
    #[error("stage '{stage}' produced an invalid artifact: {detail}")]
    InvalidArtifact {
        /// The stage name.
        stage: String,
        /// What is wrong with the artifact.
        detail: String,
    },

    /// The tool process could not be started.
    #[error("stage '{stage}': failed to start tool '{tool}': {message}")]
    Spawn {
        /// The stage name.
        stage: String,
        /// The tool name.
        tool: String,
        /// The operating system error.
        message: String,
        /// Whether the failure is worth retrying (resource exhaustion).
        transient: bool,
    },

    /// The run was cancelled while this stage was pending or running.
    #[error("stage '{stage}' cancelled: {reason}")]
    Cancelled {
        /// The stage name.
        stage: String,
        /// The cancellation reason.
        reason: String,
    },

    /// The stage received an artifact of the wrong kind.
    #[error("stage '{stage}' expects a {expected} artifact but received {actual}")]
    InputKindMismatch {
        /// The stage name.
        stage: String,
        /// The declared input kind.
        expected: ArtifactKind,
        /// The kind actually received.
        actual: ArtifactKind,
    },

    /// Reading or writing an intermediate file failed.
    #[error("stage '{stage}': I/O error: {message}")]
    Io {
        /// The stage name.
        stage: String,
        /// The underlying error.
        message: String,
    },
}

impl StageError {
    /// Creates a tool failure error.
    #[must_use]
    pub fn tool_failed(
        stage: impl Into<String>,
        tool: impl Into<String>,
        exit_code: Option<i32>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::ToolFailed {
            stage: stage.into(),
            tool: tool.into(),
            exit_code,
            stderr: stderr.into(),
            stdout: String::new(),
        }
    }

    /// Attaches captured standard output to a tool failure.
    #[must_use]
    pub fn with_stdout(mut self, output: impl Into<String>) -> Self {
        if let Self::ToolFailed { stdout, .. } = &mut self {
            *stdout = output.into();
        }
        self
    }

    /// Creates an invalid artifact error.
    #[must_use]
    pub fn invalid_artifact(stage: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvalidArtifact {
            stage: stage.into(),
            detail: detail.into(),
        }
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Cancelled {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    /// Creates an I/O error for a stage.
    #[must_use]
    pub fn io(stage: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Io {
            stage: stage.into(),
            message: message.to_string(),
        }
    }

    /// Returns the name of the stage that failed.
    #[must_use]
    pub fn stage(&self) -> &str {
        match self {
            Self::Compile { stage, .. }
            | Self::ToolFailed { stage, .. }
            | Self::Timeout { stage, .. }
            | Self::InvalidArtifact { stage, .. }
            | Self::Spawn { stage, .. }
            | Self::Cancelled { stage, .. }
            | Self::InputKindMismatch { stage, .. }
            | Self::Io { stage, .. } => stage,
        }
    }

    /// Returns the tool involved, if the failure came from an external tool.
    #[must_use]
    pub fn tool(&self) -> Option<&str> {
        match self {
            Self::ToolFailed { tool, .. } | Self::Timeout { tool, .. } | Self::Spawn { tool, .. } => {
                Some(tool)
            }
            _ => None,
        }
    }

    /// Classifies the error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Compile { .. } => ErrorClass::Compile,
            Self::ToolFailed { .. } | Self::Spawn { .. } => ErrorClass::ToolFailed,
            Self::Timeout { .. } => ErrorClass::Timeout,
            Self::InvalidArtifact { .. } => ErrorClass::InvalidArtifact,
            Self::Cancelled { .. } => ErrorClass::Cancelled,
            Self::InputKindMismatch { .. } | Self::Io { .. } => ErrorClass::Internal,
        }
    }

    /// Returns true if retrying the stage could plausibly succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Spawn { transient: true, .. })
    }

    /// Renders a multi-line diagnostic including captured tool output.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!("error[{}]: {self}", self.class());
        if let Self::ToolFailed { stderr, stdout, .. } = self {
            for (label, text) in [("stdout", stdout), ("stderr", stderr)] {
                let text = text.trim_end();
                if !text.is_empty() {
                    out.push_str("\n--- ");
                    out.push_str(label);
                    out.push_str(" ---\n");
                    out.push_str(text);
                }
            }
        }
        out
    }
}

fn at_location(location: Option<&SourceLocation>) -> String {
    location.map(|loc| format!(" at {loc}")).unwrap_or_default()
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with code {code}"),
        None => "was terminated by a signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_error_info_creation() {
        let info = ContractErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("stage", "optimize");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("stage"), Some(&"optimize".to_string()));
    }

    #[test]
    fn test_missing_tool_lists_every_source() {
        let err = ConfigError::missing_tool(
            "llc",
            vec![
                SourceCheck::new("override", "not given"),
                SourceCheck::new("environment variable LLC", "unset"),
                SourceCheck::new("PATH search for 'llc'", "not found"),
            ],
        );

        let message = err.to_string();
        assert!(message.contains("'llc'"));
        assert!(message.contains("override: not given"));
        assert!(message.contains("environment variable LLC: unset"));
        assert!(message.contains("PATH search for 'llc': not found"));
    }

    #[test]
    fn test_tool_failed_render_includes_stderr() {
        let err = StageError::tool_failed("optimize", "hugr-mlir-opt", Some(1), "bad pass\n");

        assert_eq!(err.class(), ErrorClass::ToolFailed);
        assert_eq!(err.stage(), "optimize");
        assert_eq!(err.tool(), Some("hugr-mlir-opt"));

        let rendered = err.render();
        assert!(rendered.contains("exited with code 1"));
        assert!(rendered.contains("bad pass"));
    }

    #[test]
    fn test_render_includes_program_stdout() {
        let err = StageError::tool_failed("run", "program", Some(3), "assertion failed")
            .with_stdout("measured 0\nmeasured 1\n");
        let rendered = err.render();

        let stdout_at = rendered.find("--- stdout ---\nmeasured 0\nmeasured 1").unwrap();
        let stderr_at = rendered.find("--- stderr ---\nassertion failed").unwrap();
        assert!(stdout_at < stderr_at);
    }

    #[test]
    fn test_signal_exit_description() {
        let err = StageError::tool_failed("run", "program", None, "");
        assert!(err.to_string().contains("terminated by a signal"));
    }

    #[test]
    fn test_compile_error_location() {
        let err = StageError::Compile {
            stage: "frontend".to_string(),
            message: "Variable `q` is not defined".to_string(),
            location: Some(SourceLocation::new("prog.py", 12).with_column(4)),
        };

        assert_eq!(err.class(), ErrorClass::Compile);
        assert!(err.to_string().contains("at prog.py:12:4"));
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let classes = [
            ErrorClass::Config,
            ErrorClass::Compile,
            ErrorClass::ToolFailed,
            ErrorClass::Timeout,
            ErrorClass::InvalidArtifact,
            ErrorClass::Cancelled,
            ErrorClass::Internal,
        ];
        let mut codes: Vec<i32> = classes.iter().map(|c| c.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();

        assert_eq!(codes.len(), classes.len());
        assert!(!codes.contains(&0));
    }

    #[test]
    fn test_only_transient_spawn_errors_retry() {
        let transient = StageError::Spawn {
            stage: "optimize".to_string(),
            tool: "opt".to_string(),
            message: "Resource temporarily unavailable".to_string(),
            transient: true,
        };
        let failed = StageError::tool_failed("optimize", "opt", Some(1), "");

        assert!(transient.is_transient());
        assert!(!failed.is_transient());
    }

    #[test]
    fn test_stage_error_serializes_with_kind_tag() {
        let err = StageError::invalid_artifact("translate", "empty output");
        let json = serde_json::to_value(&err).unwrap();

        assert_eq!(json["kind"], "invalid_artifact");
        assert_eq!(json["stage"], "translate");
    }
}
