//! Per-run execution context shared by every stage.

use crate::cancellation::CancellationToken;
use crate::core::ArtifactKind;
use crate::events::{EventSink, NoOpEventSink, RunEvent};
use crate::workdir::WorkDir;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Everything a stage may need besides its input artifact.
///
/// Cheap to clone; all shared state sits behind `Arc`s.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: Uuid,
    workdir: Arc<WorkDir>,
    cancel: Arc<CancellationToken>,
    events: Arc<dyn EventSink>,
    stores: BTreeMap<ArtifactKind, PathBuf>,
}

impl RunContext {
    /// Creates a context around a work directory.
    #[must_use]
    pub fn new(workdir: WorkDir) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            workdir: Arc::new(workdir),
            cancel: Arc::new(CancellationToken::new()),
            events: Arc::new(NoOpEventSink),
            stores: BTreeMap::new(),
        }
    }

    /// Creates a context with a fresh temporary work directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn temporary() -> std::io::Result<Self> {
        Ok(Self::new(WorkDir::temporary()?))
    }

    /// Sets the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: Arc<CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Requests that artifacts of `kind` be written to `path`.
    #[must_use]
    pub fn with_store(mut self, kind: ArtifactKind, path: impl Into<PathBuf>) -> Self {
        self.stores.insert(kind, path.into());
        self
    }

    /// Replaces all store requests.
    #[must_use]
    pub fn with_stores(mut self, stores: BTreeMap<ArtifactKind, PathBuf>) -> Self {
        self.stores = stores;
        self
    }

    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the work directory.
    #[must_use]
    pub fn workdir(&self) -> &WorkDir {
        &self.workdir
    }

    /// Returns the cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns the store path for a kind, if one was requested.
    #[must_use]
    pub fn store_path(&self, kind: ArtifactKind) -> Option<&Path> {
        self.stores.get(&kind).map(PathBuf::as_path)
    }

    /// Delivers an event to the sink, stamped with this run's id.
    pub async fn emit(&self, event: RunEvent) {
        let event = RunEvent {
            run_id: self.run_id,
            ..event
        };
        self.events.emit(&event).await;
    }
}
