//! Run requests.

use crate::core::{Artifact, ArtifactKind, Encoding};
use crate::errors::StageError;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::info;

/// Stage name used in errors raised while loading the input.
pub const INPUT_STAGE: &str = "input";

/// Where the initial artifact comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// A file on disk.
    Path(PathBuf),
    /// Standard input, read to the end.
    Stdin,
    /// Bytes supplied by the caller.
    Inline(Vec<u8>),
}

impl InputSource {
    /// The name used for the input in diagnostics.
    #[must_use]
    pub fn origin(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Stdin => "<stdin>".to_string(),
            Self::Inline(_) => "<input>".to_string(),
        }
    }

    async fn read(&self) -> std::io::Result<Vec<u8>> {
        match self {
            Self::Path(path) => tokio::fs::read(path).await,
            Self::Stdin => {
                let mut buf = Vec::new();
                tokio::io::stdin().read_to_end(&mut buf).await?;
                Ok(buf)
            }
            Self::Inline(bytes) => Ok(bytes.clone()),
        }
    }
}

/// Which stages a run executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageSelection {
    /// Every catalog stage from the input kind up to this kind.
    Until(ArtifactKind),
    /// Exactly these stages, in this order.
    Named(Vec<String>),
}

/// Everything needed to plan and execute one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// The input.
    pub input: InputSource,
    /// The kind of the input.
    pub input_kind: ArtifactKind,
    /// The input encoding; detected when `None`.
    pub encoding: Option<Encoding>,
    /// The stages to run.
    pub selection: StageSelection,
    /// Paths at which to persist intermediates, by kind.
    pub stores: BTreeMap<ArtifactKind, PathBuf>,
    /// The Guppy module to compile.
    pub module: Option<String>,
    /// A work directory to use and keep; a temporary one otherwise.
    pub work_dir: Option<PathBuf>,
    /// Timeout applied to every stage, replacing configured ones.
    pub timeout: Option<Duration>,
}

impl RunRequest {
    /// Creates a request that compiles Guppy source and runs the result.
    #[must_use]
    pub fn new(input: InputSource) -> Self {
        Self {
            input,
            input_kind: ArtifactKind::Source,
            encoding: None,
            selection: StageSelection::Until(ArtifactKind::RunOutput),
            stores: BTreeMap::new(),
            module: None,
            work_dir: None,
            timeout: None,
        }
    }

    /// Creates a request for a file.
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::new(InputSource::Path(path.into()))
    }

    /// Creates a request for in-memory input.
    #[must_use]
    pub fn inline(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(InputSource::Inline(bytes.into()))
    }

    /// Sets the input kind.
    #[must_use]
    pub fn starting_at(mut self, kind: ArtifactKind) -> Self {
        self.input_kind = kind;
        self
    }

    /// Sets the input encoding explicitly.
    #[must_use]
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    /// Stops after producing `kind`.
    #[must_use]
    pub fn until(mut self, kind: ArtifactKind) -> Self {
        self.selection = StageSelection::Until(kind);
        self
    }

    /// Runs exactly the named stages.
    #[must_use]
    pub fn with_stages<I, S>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selection = StageSelection::Named(stages.into_iter().map(Into::into).collect());
        self
    }

    /// Persists the intermediate of `kind` at `path`.
    #[must_use]
    pub fn store(mut self, kind: ArtifactKind, path: impl Into<PathBuf>) -> Self {
        self.stores.insert(kind, path.into());
        self
    }

    /// Sets the Guppy module name.
    #[must_use]
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    /// Uses and keeps the given work directory.
    #[must_use]
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Applies one timeout to every stage.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The input encoding: explicit, else detected from the file extension,
    /// else textual for streamed input and binary for files.
    #[must_use]
    pub fn resolved_encoding(&self) -> Encoding {
        if let Some(encoding) = self.encoding {
            return encoding;
        }
        match &self.input {
            InputSource::Path(path) => self.input_kind.detect_encoding(path).unwrap_or_else(|| {
                info!(
                    path = %path.display(),
                    kind = %self.input_kind,
                    "Could not detect input encoding from extension, assuming binary"
                );
                Encoding::Binary
            }),
            InputSource::Stdin | InputSource::Inline(_) => {
                if self.input_kind.supports(Encoding::Textual) {
                    Encoding::Textual
                } else {
                    Encoding::Binary
                }
            }
        }
    }

    /// Reads and validates the initial artifact.
    pub(crate) async fn load(&self) -> Result<Artifact, StageError> {
        let bytes = self
            .input
            .read()
            .await
            .map_err(|e| StageError::io(INPUT_STAGE, format!("reading {}: {e}", self.input.origin())))?;
        let artifact = Artifact::new(self.input_kind, self.resolved_encoding(), bytes);
        artifact
            .validate()
            .map_err(|detail| StageError::invalid_artifact(INPUT_STAGE, detail))?;
        Ok(artifact)
    }
}
