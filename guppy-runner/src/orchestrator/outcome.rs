//! Run outcomes.

use crate::core::Artifact;
use crate::pipeline::PipelineReport;

/// The result of a run that got as far as executing its pipeline.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    report: PipelineReport,
}

impl RunOutcome {
    pub(crate) fn new(report: PipelineReport) -> Self {
        Self { report }
    }

    /// Returns true if every stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.report.is_success()
    }

    /// The process exit code.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.report.exit_code()
    }

    /// Diagnostic text for a failed run.
    #[must_use]
    pub fn diagnostic(&self) -> Option<String> {
        self.report.diagnostic()
    }

    /// The run report.
    #[must_use]
    pub fn report(&self) -> &PipelineReport {
        &self.report
    }

    /// Consumes the outcome, returning the final artifact.
    #[must_use]
    pub fn into_artifact(self) -> Option<Artifact> {
        self.report.into_artifact()
    }
}
