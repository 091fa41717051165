//! External tool definitions.

use crate::core::Encoding;
use crate::errors::ConfigError;
use crate::stages::RetryConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Placeholder replaced by the input file path in `files` mode.
pub const INPUT_PLACEHOLDER: &str = "{input}";
/// Placeholder replaced by the output file path in `files` mode.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// How an artifact is handed to and collected from a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolIo {
    /// Input on stdin, output on stdout.
    #[default]
    Stdio,
    /// Input and output through files in the work directory, passed via the
    /// `{input}` and `{output}` argument placeholders.
    Files,
}

/// Definition of an external tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolDefinition {
    /// Default binary name, searched on `PATH`.
    pub binary: String,
    /// Environment variable that may hold an explicit path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_var: Option<String>,
    /// Arguments passed on every invocation.
    #[serde(default)]
    pub args: Vec<String>,
    /// Arguments appended according to the encoding of the input artifact.
    /// When empty, the tool accepts either encoding unchanged.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input_args: BTreeMap<Encoding, Vec<String>>,
    /// Arguments appended according to the requested output encoding.
    /// When empty, the tool only produces the stage's default encoding.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub output_args: BTreeMap<Encoding, Vec<String>>,
    /// Artifact hand-off convention.
    #[serde(default)]
    pub io: ToolIo,
    /// Per-tool timeout override, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Retry policy for transient spawn failures. No retries when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    /// Description of what the tool does.
    #[serde(default)]
    pub description: String,
}

impl ToolDefinition {
    /// Creates a new stdio tool definition.
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            env_var: None,
            args: Vec::new(),
            input_args: BTreeMap::new(),
            output_args: BTreeMap::new(),
            io: ToolIo::Stdio,
            timeout_secs: None,
            retry: None,
            description: String::new(),
        }
    }

    /// Sets the environment variable consulted for an explicit path.
    #[must_use]
    pub fn with_env_var(mut self, var: impl Into<String>) -> Self {
        self.env_var = Some(var.into());
        self
    }

    /// Sets the invocation arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the arguments used when the input has the given encoding.
    #[must_use]
    pub fn with_input_args<I, S>(mut self, encoding: Encoding, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_args
            .insert(encoding, args.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the arguments used to produce the given output encoding.
    #[must_use]
    pub fn with_output_args<I, S>(mut self, encoding: Encoding, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args
            .insert(encoding, args.into_iter().map(Into::into).collect());
        self
    }

    /// Returns true if the tool can read an input with this encoding.
    #[must_use]
    pub fn accepts(&self, encoding: Encoding) -> bool {
        self.input_args.is_empty() || self.input_args.contains_key(&encoding)
    }

    /// Returns true if the tool can be asked for this output encoding.
    #[must_use]
    pub fn can_emit(&self, encoding: Encoding) -> bool {
        self.output_args.contains_key(&encoding)
    }

    /// Sets the I/O convention.
    #[must_use]
    pub fn with_io(mut self, io: ToolIo) -> Self {
        self.io = io;
        self
    }

    /// Sets the timeout override.
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Checks that the definition is self-consistent.
    ///
    /// # Errors
    ///
    /// Returns an error if the binary name is empty, the timeout is zero, or
    /// the placeholders do not match the I/O convention.
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.binary.trim().is_empty() {
            return Err(ConfigError::invalid(format!("tool '{name}' has an empty binary name")));
        }
        if self.timeout_secs == Some(0) {
            return Err(ConfigError::invalid(format!("tool '{name}' has a zero timeout")));
        }

        let all_args = || {
            self.args
                .iter()
                .chain(self.input_args.values().flatten())
                .chain(self.output_args.values().flatten())
        };
        let has_input = all_args().any(|a| a.contains(INPUT_PLACEHOLDER));
        let has_output = all_args().any(|a| a.contains(OUTPUT_PLACEHOLDER));
        match self.io {
            ToolIo::Files if !(has_input && has_output) => Err(ConfigError::invalid(format!(
                "tool '{name}' uses file I/O but its arguments do not contain both \
                 {INPUT_PLACEHOLDER} and {OUTPUT_PLACEHOLDER}"
            ))),
            ToolIo::Stdio if has_input || has_output => Err(ConfigError::invalid(format!(
                "tool '{name}' uses stdio but its arguments contain a file placeholder"
            ))),
            _ => Ok(()),
        }
    }
}
