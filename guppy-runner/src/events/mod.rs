//! Pipeline lifecycle events.
//!
//! The pipeline reports its progress as [`RunEvent`]s delivered to an
//! [`EventSink`] carried by the run context. Sinks are for observation only;
//! they cannot influence the run.

mod sink;

pub use sink::{CollectingEventSink, EventKind, EventSink, LoggingEventSink, NoOpEventSink, RunEvent};
