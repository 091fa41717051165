//! Per-run scratch directories.

use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// The directory holding a run's intermediate files.
///
/// A temporary directory is removed when the `WorkDir` is dropped, whether
/// the run succeeded or not. A persistent directory, named by the user, is
/// created if needed and left in place.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
    temp: Option<TempDir>,
}

impl WorkDir {
    /// Creates a fresh temporary directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn temporary() -> std::io::Result<Self> {
        let temp = tempfile::Builder::new().prefix("guppy-runner-").tempdir()?;
        Ok(Self {
            path: temp.path().to_path_buf(),
            temp: Some(temp),
        })
    }

    /// Uses (and creates) a directory that outlives the run.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn persistent(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        std::fs::create_dir_all(&path)?;
        Ok(Self { path, temp: None })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the directory is kept after the run.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.temp.is_none()
    }

    /// Path of a stage's file with the given role (`in`, `out`) and extension.
    #[must_use]
    pub fn file(&self, stage: &str, role: &str, extension: &str) -> PathBuf {
        let stem: String = stage
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.path.join(format!("{stem}.{role}.{extension}"))
    }
}
