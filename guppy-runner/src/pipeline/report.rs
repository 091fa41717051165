//! Run reports.

use crate::core::{Artifact, ArtifactSummary, StageKind, StageStatus};
use crate::errors::StageError;
use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::path::PathBuf;
use uuid::Uuid;

/// The record of one attempted stage.
#[derive(Debug, Clone)]
pub struct StageRecord {
    /// The stage name.
    pub stage: String,
    /// In-process or external.
    pub kind: StageKind,
    /// When the stage started.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// The produced artifact's summary, or the stage's error.
    pub result: Result<ArtifactSummary, StageError>,
    /// Where the produced artifact was stored, if requested.
    pub stored_at: Option<PathBuf>,
}

impl StageRecord {
    /// Returns the stage status.
    #[must_use]
    pub fn status(&self) -> StageStatus {
        match &self.result {
            Ok(_) => StageStatus::Ok,
            Err(StageError::Cancelled { .. }) => StageStatus::Cancel,
            Err(_) => StageStatus::Fail,
        }
    }
}

impl Serialize for StageRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut record = serializer.serialize_struct("StageRecord", 7)?;
        record.serialize_field("stage", &self.stage)?;
        record.serialize_field("kind", &self.kind)?;
        record.serialize_field("status", &self.status())?;
        record.serialize_field("started_at", &self.started_at)?;
        record.serialize_field("duration_ms", &self.duration_ms)?;
        match &self.result {
            Ok(summary) => record.serialize_field("output", summary)?,
            Err(err) => {
                record.serialize_field("error", err)?;
                record.serialize_field("message", &err.to_string())?;
            }
        }
        if let Some(path) = &self.stored_at {
            record.serialize_field("stored_at", path)?;
        }
        record.end()
    }
}

/// The ordered outcome of a pipeline run.
///
/// Holds one record per attempted stage. A failed run ends with the failing
/// stage's record; later stages never appear.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    /// The pipeline name.
    pub pipeline: String,
    /// The run id.
    pub run_id: Uuid,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Total wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// One record per attempted stage, in order.
    pub stages: Vec<StageRecord>,
    #[serde(skip)]
    final_artifact: Option<Artifact>,
}

impl PipelineReport {
    pub(crate) fn new(pipeline: impl Into<String>, run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            pipeline: pipeline.into(),
            run_id,
            started_at,
            duration_ms: 0,
            stages: Vec::new(),
            final_artifact: None,
        }
    }

    pub(crate) fn record(&mut self, record: StageRecord) {
        self.stages.push(record);
    }

    pub(crate) fn finish(&mut self, duration_ms: u64, artifact: Option<Artifact>) {
        self.duration_ms = duration_ms;
        self.final_artifact = artifact;
    }

    /// Returns true if every stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.final_artifact.is_some() && self.failure().is_none()
    }

    /// Returns the error that stopped the run, if any.
    #[must_use]
    pub fn failure(&self) -> Option<&StageError> {
        self.stages.last().and_then(|record| record.result.as_ref().err())
    }

    /// Returns the number of attempted stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if no stage was attempted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Returns the final artifact of a successful run.
    #[must_use]
    pub fn final_artifact(&self) -> Option<&Artifact> {
        self.final_artifact.as_ref()
    }

    /// Consumes the report, returning the final artifact.
    #[must_use]
    pub fn into_artifact(self) -> Option<Artifact> {
        self.final_artifact
    }

    /// The process exit code for this run.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.failure().map_or(0, |err| err.class().exit_code())
    }

    /// A human-readable diagnostic for a failed run.
    #[must_use]
    pub fn diagnostic(&self) -> Option<String> {
        self.failure().map(StageError::render)
    }

    /// Serializes the report as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
