//! Test assertions for run reports and events.

use crate::errors::ErrorClass;
use crate::events::{CollectingEventSink, EventKind};
use crate::pipeline::PipelineReport;

/// Asserts that every stage succeeded.
pub fn assert_report_succeeded(report: &PipelineReport) {
    assert!(
        report.is_success(),
        "Expected success, got failure: {:?}",
        report.failure()
    );
}

/// Asserts that the run stopped at `stage` with an error of `class`.
pub fn assert_report_failed_at(report: &PipelineReport, stage: &str, class: ErrorClass) {
    let Some(err) = report.failure() else {
        panic!("Expected stage '{stage}' to fail, but the run succeeded");
    };
    assert_eq!(err.stage(), stage, "Wrong failing stage: {err}");
    assert_eq!(err.class(), class, "Wrong error class: {err}");
}

/// Asserts the names of the attempted stages, in order.
pub fn assert_report_stages(report: &PipelineReport, expected: &[&str]) {
    let actual: Vec<&str> = report.stages.iter().map(|r| r.stage.as_str()).collect();
    assert_eq!(actual, expected, "Unexpected stage records");
}

/// Asserts the exact sequence of event kinds a sink received.
pub fn assert_event_order(sink: &CollectingEventSink, expected: &[EventKind]) {
    assert_eq!(sink.kinds(), expected, "Unexpected event sequence");
}
