//! Core domain model types for guppy-runner.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Artifact kinds, encodings and payloads
//! - Stage status and kind enums

mod artifact;
mod status;

pub use artifact::{Artifact, ArtifactKind, ArtifactSummary, Encoding};
pub use status::{StageKind, StageStatus};
