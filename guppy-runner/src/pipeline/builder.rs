//! Pipeline builder with validation.

use super::{Pipeline, StageSpec};
use crate::core::ArtifactKind;
use crate::errors::{ContractErrorInfo, PipelineValidationError};
use crate::stages::StageRunner;
use std::collections::HashSet;
use std::sync::Arc;

/// Builder for creating validated pipelines.
///
/// Stages are added in execution order. Nothing is checked until
/// [`PipelineBuilder::build`], which rejects the whole pipeline before any
/// stage can run.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    input: Option<ArtifactKind>,
    stages: Vec<StageSpec>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input: None,
            stages: Vec::new(),
        }
    }

    /// Declares the kind of the initial artifact; the first stage must accept it.
    #[must_use]
    pub fn with_input_kind(mut self, kind: ArtifactKind) -> Self {
        self.input = Some(kind);
        self
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage(
        self,
        name: impl Into<String>,
        input: ArtifactKind,
        output: ArtifactKind,
        runner: Arc<dyn StageRunner>,
    ) -> Self {
        self.push(StageSpec::new(name, input, output, runner))
    }

    /// Appends a fully configured stage specification.
    #[must_use]
    pub fn push(mut self, spec: StageSpec) -> Self {
        self.stages.push(spec);
        self
    }

    /// Returns the number of stages added so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if no stages were added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Validates the stage sequence and builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline is empty, a stage is invalid, two
    /// stages share a name, or a stage's input kind differs from the
    /// previous stage's output kind.
    pub fn build(self) -> Result<Pipeline, PipelineValidationError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new(format!(
                "Pipeline '{}' has no stages",
                self.name
            ))
            .with_error_info(
                ContractErrorInfo::new("PIPELINE-002-EMPTY", "Pipeline has no stages")
                    .with_fix_hint("Select at least one stage"),
            ));
        }

        let mut seen = HashSet::new();
        for spec in &self.stages {
            spec.validate()?;
            if !seen.insert(spec.name.as_str()) {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{}' appears more than once in pipeline '{}'",
                    spec.name, self.name
                ))
                .with_stages(vec![spec.name.clone()])
                .with_error_info(
                    ContractErrorInfo::new("PIPELINE-003-DUPLICATE_STAGE", "Duplicate stage name")
                        .with_context_entry("stage", spec.name.clone()),
                ));
            }
        }

        if let (Some(kind), Some(first)) = (self.input, self.stages.first()) {
            if first.input != kind {
                return Err(kind_mismatch(None, first, kind));
            }
        }
        for pair in self.stages.windows(2) {
            let (previous, next) = (&pair[0], &pair[1]);
            if next.input != previous.output {
                return Err(kind_mismatch(Some(previous), next, previous.output));
            }
        }

        Ok(Pipeline::new(self.name, self.stages))
    }
}

fn kind_mismatch(
    previous: Option<&StageSpec>,
    next: &StageSpec,
    provided: ArtifactKind,
) -> PipelineValidationError {
    let producer = previous.map_or_else(|| "the input".to_string(), |p| format!("stage '{}'", p.name));
    let mut stages: Vec<String> = previous.map(|p| p.name.clone()).into_iter().collect();
    stages.push(next.name.clone());

    PipelineValidationError::new(format!(
        "Stage '{}' expects {} but {producer} provides {provided}",
        next.name, next.input
    ))
    .with_stages(stages)
    .with_error_info(
        ContractErrorInfo::new("PIPELINE-001-KIND_MISMATCH", "Adjacent stages disagree on artifact kind")
            .with_fix_hint("Reorder the stages or start the pipeline from a different input kind")
            .with_context_entry("expected", next.input.as_str())
            .with_context_entry("provided", provided.as_str()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingRunner;

    fn passthrough(kind: ArtifactKind) -> Arc<RecordingRunner> {
        Arc::new(RecordingRunner::passthrough(kind))
    }

    #[test]
    fn test_compatible_sequence_builds() {
        let pipeline = PipelineBuilder::new("lower")
            .with_input_kind(ArtifactKind::Hugr)
            .stage("translate", ArtifactKind::Hugr, ArtifactKind::HugrMlir, passthrough(ArtifactKind::HugrMlir))
            .stage("optimize", ArtifactKind::HugrMlir, ArtifactKind::LoweredMlir, passthrough(ArtifactKind::LoweredMlir))
            .build()
            .unwrap();

        assert_eq!(pipeline.len(), 2);
        assert_eq!(pipeline.stage_names(), vec!["translate", "optimize"]);
    }

    #[test]
    fn test_mismatched_sequence_rejected_without_running() {
        let translate = passthrough(ArtifactKind::HugrMlir);
        let emit = passthrough(ArtifactKind::Llvm);

        let err = PipelineBuilder::new("broken")
            .stage("translate", ArtifactKind::Hugr, ArtifactKind::HugrMlir, translate.clone())
            .stage("emit-llvm", ArtifactKind::LoweredMlir, ArtifactKind::Llvm, emit.clone())
            .build()
            .unwrap_err();

        assert_eq!(err.code(), Some("PIPELINE-001-KIND_MISMATCH"));
        assert_eq!(err.stages, vec!["translate", "emit-llvm"]);
        assert!(err.message.contains("expects lowered-mlir but stage 'translate' provides hugr-mlir"));
        assert_eq!(translate.call_count(), 0);
        assert_eq!(emit.call_count(), 0);
    }

    #[test]
    fn test_first_stage_must_accept_input_kind() {
        let err = PipelineBuilder::new("p")
            .with_input_kind(ArtifactKind::Source)
            .stage("translate", ArtifactKind::Hugr, ArtifactKind::HugrMlir, passthrough(ArtifactKind::HugrMlir))
            .build()
            .unwrap_err();

        assert_eq!(err.code(), Some("PIPELINE-001-KIND_MISMATCH"));
        assert!(err.message.contains("the input provides source"));
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        let err = PipelineBuilder::new("empty").build().unwrap_err();
        assert_eq!(err.code(), Some("PIPELINE-002-EMPTY"));
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let err = PipelineBuilder::new("dup")
            .stage("optimize", ArtifactKind::HugrMlir, ArtifactKind::LoweredMlir, passthrough(ArtifactKind::LoweredMlir))
            .stage("optimize", ArtifactKind::LoweredMlir, ArtifactKind::Llvm, passthrough(ArtifactKind::Llvm))
            .build()
            .unwrap_err();

        assert_eq!(err.code(), Some("PIPELINE-003-DUPLICATE_STAGE"));
    }
}
