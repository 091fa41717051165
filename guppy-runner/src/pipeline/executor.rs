//! Sequential pipeline execution.

use super::{PipelineReport, StageRecord, StageSpec};
use crate::context::RunContext;
use crate::core::Artifact;
use crate::errors::StageError;
use crate::events::{EventKind, RunEvent};
use chrono::Utc;
use serde_json::json;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, info_span, warn, Instrument};

/// A validated, ordered sequence of stages.
///
/// Built by [`super::PipelineBuilder`]; immutable afterwards.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    stages: Vec<StageSpec>,
}

impl Pipeline {
    pub(crate) fn new(name: String, stages: Vec<StageSpec>) -> Self {
        Self { name, stages }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// Returns the stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the pipeline has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Threads `initial` through every stage in order.
    ///
    /// Stops at the first failure. The returned report holds one record per
    /// attempted stage and, on success, the final artifact.
    pub async fn execute(&self, initial: Artifact, ctx: &RunContext) -> PipelineReport {
        let clock = Instant::now();
        let mut report = PipelineReport::new(&self.name, ctx.run_id(), Utc::now());

        info!(pipeline = %self.name, run_id = %ctx.run_id(), stages = self.len(), "Pipeline started");
        ctx.emit(
            RunEvent::new(EventKind::PipelineStarted, ctx.run_id()).with_data(json!({
                "pipeline": self.name,
                "stages": self.stage_names(),
                "input": initial.summary(),
            })),
        )
        .await;

        let mut current = initial;
        for spec in &self.stages {
            let started_at = Utc::now();
            let stage_clock = Instant::now();
            let span = info_span!("stage", stage = %spec.name, kind = %spec.kind);
            let result = self.run_stage(spec, current, ctx).instrument(span).await;
            let duration_ms = elapsed_ms(stage_clock);

            match result {
                Ok((artifact, stored_at)) => {
                    let summary = artifact.summary();
                    info!(
                        stage = %spec.name,
                        bytes = summary.bytes,
                        sha256 = %summary.sha256,
                        duration_ms,
                        "Stage completed"
                    );
                    ctx.emit(
                        RunEvent::new(EventKind::StageCompleted, ctx.run_id())
                            .for_stage(&spec.name)
                            .with_data(json!({"output": summary, "duration_ms": duration_ms})),
                    )
                    .await;
                    report.record(StageRecord {
                        stage: spec.name.clone(),
                        kind: spec.kind,
                        started_at,
                        duration_ms,
                        result: Ok(summary),
                        stored_at,
                    });
                    current = artifact;
                }
                Err(err) => {
                    warn!(stage = %spec.name, class = %err.class(), error = %err, "Stage failed");
                    ctx.emit(
                        RunEvent::new(EventKind::StageFailed, ctx.run_id())
                            .for_stage(&spec.name)
                            .with_data(json!({"error": err, "message": err.to_string()})),
                    )
                    .await;
                    ctx.emit(
                        RunEvent::new(EventKind::PipelineFailed, ctx.run_id())
                            .with_data(json!({"pipeline": self.name, "failed_stage": spec.name})),
                    )
                    .await;
                    report.record(StageRecord {
                        stage: spec.name.clone(),
                        kind: spec.kind,
                        started_at,
                        duration_ms,
                        result: Err(err),
                        stored_at: None,
                    });
                    report.finish(elapsed_ms(clock), None);
                    return report;
                }
            }
        }

        let duration_ms = elapsed_ms(clock);
        info!(pipeline = %self.name, duration_ms, "Pipeline completed");
        ctx.emit(
            RunEvent::new(EventKind::PipelineCompleted, ctx.run_id())
                .with_data(json!({"pipeline": self.name, "output": current.summary()})),
        )
        .await;
        report.finish(duration_ms, Some(current));
        report
    }

    async fn run_stage(
        &self,
        spec: &StageSpec,
        input: Artifact,
        ctx: &RunContext,
    ) -> Result<(Artifact, Option<PathBuf>), StageError> {
        let cancel = ctx.cancellation();
        if cancel.is_cancelled() {
            return Err(StageError::cancelled(&spec.name, cancel.reason_or_default()));
        }
        if input.kind() != spec.input {
            return Err(StageError::InputKindMismatch {
                stage: spec.name.clone(),
                expected: spec.input,
                actual: input.kind(),
            });
        }

        ctx.emit(
            RunEvent::new(EventKind::StageStarted, ctx.run_id())
                .for_stage(&spec.name)
                .with_data(json!({"input": input.summary(), "timeout_ms": u64::try_from(spec.timeout.as_millis()).unwrap_or(u64::MAX)})),
        )
        .await;

        let artifact = spec.runner.run(spec, input, ctx).await?;
        if artifact.kind() != spec.output {
            return Err(StageError::invalid_artifact(
                &spec.name,
                format!("expected a {} artifact but the stage produced {}", spec.output, artifact.kind()),
            ));
        }

        let stored_at = match ctx.store_path(artifact.kind()) {
            Some(path) => {
                tokio::fs::write(path, artifact.as_bytes())
                    .await
                    .map_err(|e| StageError::io(&spec.name, format!("storing {}: {e}", path.display())))?;
                info!(stage = %spec.name, path = %path.display(), "Stored artifact");
                ctx.emit(
                    RunEvent::new(EventKind::ArtifactStored, ctx.run_id())
                        .for_stage(&spec.name)
                        .with_data(json!({"kind": artifact.kind(), "path": path})),
                )
                .await;
                Some(path.to_path_buf())
            }
            None => None,
        };

        Ok((artifact, stored_at))
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
