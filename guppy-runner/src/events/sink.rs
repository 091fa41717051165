//! Event types, the sink trait and its implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn, Level};
use uuid::Uuid;

/// The lifecycle point an event marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A pipeline run began.
    #[serde(rename = "pipeline.started")]
    PipelineStarted,
    /// A stage began.
    #[serde(rename = "stage.started")]
    StageStarted,
    /// A stage produced an artifact.
    #[serde(rename = "stage.completed")]
    StageCompleted,
    /// A stage failed.
    #[serde(rename = "stage.failed")]
    StageFailed,
    /// An intermediate artifact was written to a store path.
    #[serde(rename = "artifact.stored")]
    ArtifactStored,
    /// Every stage succeeded.
    #[serde(rename = "pipeline.completed")]
    PipelineCompleted,
    /// The run stopped at a failed stage.
    #[serde(rename = "pipeline.failed")]
    PipelineFailed,
}

impl EventKind {
    /// Returns the dotted event type name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PipelineStarted => "pipeline.started",
            Self::StageStarted => "stage.started",
            Self::StageCompleted => "stage.completed",
            Self::StageFailed => "stage.failed",
            Self::ArtifactStored => "artifact.stored",
            Self::PipelineCompleted => "pipeline.completed",
            Self::PipelineFailed => "pipeline.failed",
        }
    }

    /// Returns true for events that mark a failure.
    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(self, Self::StageFailed | Self::PipelineFailed)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    /// What happened.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// The run this event belongs to.
    pub run_id: Uuid,
    /// The stage involved, for stage-level events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
    /// Event-specific payload.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl RunEvent {
    /// Creates a run-level event.
    #[must_use]
    pub fn new(kind: EventKind, run_id: Uuid) -> Self {
        Self {
            kind,
            run_id,
            stage: None,
            timestamp: Utc::now(),
            data: serde_json::Value::Null,
        }
    }

    /// Attaches the stage name.
    #[must_use]
    pub fn for_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    /// Attaches event data.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Receives pipeline lifecycle events.
///
/// Implementations must not fail; errors are theirs to log and swallow.
#[async_trait]
pub trait EventSink: Send + Sync + fmt::Debug {
    /// Delivers an event.
    async fn emit(&self, event: &RunEvent);
}

/// A sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: &RunEvent) {}
}

/// A sink that forwards events to `tracing`.
///
/// Failure events are always logged at `WARN`; everything else at the
/// configured level.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: &RunEvent) {
        let stage = event.stage.as_deref().unwrap_or("-");
        if event.kind.is_failure() {
            warn!(event_type = %event.kind, run_id = %event.run_id, stage, data = %event.data, "Event: {}", event.kind);
        } else if self.level == Level::DEBUG {
            debug!(event_type = %event.kind, run_id = %event.run_id, stage, data = %event.data, "Event: {}", event.kind);
        } else {
            info!(event_type = %event.kind, run_id = %event.run_id, stage, data = %event.data, "Event: {}", event.kind);
        }
    }
}

/// A sink that records events in memory, for tests and reports.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<RunEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.read().clone()
    }

    /// Returns the kinds of the collected events, in order.
    #[must_use]
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.read().iter().map(|e| e.kind).collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns events whose type starts with a prefix, such as `"stage."`.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<RunEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.kind.as_str().starts_with(type_prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: &RunEvent) {
        self.events.write().push(event.clone());
    }
}
