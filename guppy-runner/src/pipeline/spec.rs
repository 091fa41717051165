//! Stage specifications.

use crate::config::DEFAULT_TIMEOUT_SECS;
use crate::core::{ArtifactKind, Encoding, StageKind};
use crate::errors::{ContractErrorInfo, PipelineValidationError};
use crate::stages::StageRunner;
use std::sync::Arc;
use std::time::Duration;

/// Specification for a single stage in a pipeline.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// The unique name of the stage.
    pub name: String,
    /// Whether the stage runs in-process or as a subprocess.
    pub kind: StageKind,
    /// The artifact kind the stage accepts.
    pub input: ArtifactKind,
    /// The artifact kind the stage produces.
    pub output: ArtifactKind,
    /// The encoding of the produced artifact.
    pub output_encoding: Encoding,
    /// Time budget for the stage.
    pub timeout: Duration,
    /// The stage implementation.
    pub runner: Arc<dyn StageRunner>,
}

impl StageSpec {
    /// Creates a new stage specification.
    ///
    /// The output encoding defaults to the output kind's default and the
    /// timeout to the global default.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        input: ArtifactKind,
        output: ArtifactKind,
        runner: Arc<dyn StageRunner>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: runner.kind(),
            input,
            output,
            output_encoding: output.default_encoding(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            runner,
        }
    }

    /// Sets the output encoding.
    #[must_use]
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.output_encoding = encoding;
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validates the stage specification.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty, the output encoding is not
    /// supported by the output kind, or the timeout is zero.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        if self.name.trim().is_empty() {
            return Err(PipelineValidationError::new("Stage name cannot be empty"));
        }
        if !self.output.supports(self.output_encoding) {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' cannot produce {} artifacts with the {} encoding",
                self.name, self.output, self.output_encoding
            ))
            .with_stages(vec![self.name.clone()])
            .with_error_info(
                ContractErrorInfo::new("PIPELINE-004-ENCODING", "Unsupported output encoding")
                    .with_context_entry("kind", self.output.as_str())
                    .with_context_entry("encoding", self.output_encoding.to_string()),
            ));
        }
        if self.timeout.is_zero() {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' has a zero timeout",
                self.name
            ))
            .with_stages(vec![self.name.clone()]));
        }
        Ok(())
    }
}
