//! Fake external tools for process-level tests.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

use crate::tools::{ToolPath, ToolSource};

/// A temporary directory of executable shell scripts standing in for the
/// real toolchain.
///
/// Fixed payloads are kept in sidecar files so scripts never need quoting.
#[derive(Debug)]
pub struct FakeToolbox {
    dir: TempDir,
}

impl Default for FakeToolbox {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeToolbox {
    /// Creates an empty toolbox.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dir: tempfile::Builder::new()
                .prefix("fake-tools-")
                .tempdir()
                .expect("create toolbox directory"),
        }
    }

    /// The toolbox directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Writes an executable `/bin/sh` script and returns its path.
    ///
    /// # Panics
    ///
    /// Panics if the script cannot be written.
    #[must_use]
    pub fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write fake tool");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("make fake tool executable");
        path
    }

    /// Wraps a script path as an override-sourced tool.
    #[must_use]
    pub fn tool(&self, name: &str, path: PathBuf) -> ToolPath {
        ToolPath {
            name: name.to_string(),
            path,
            source: ToolSource::Override,
        }
    }

    /// A tool that copies stdin to stdout.
    #[must_use]
    pub fn echo(&self, name: &str) -> PathBuf {
        self.script(name, "exec cat")
    }

    /// A tool that upper-cases stdin.
    #[must_use]
    pub fn uppercase(&self, name: &str) -> PathBuf {
        self.script(name, "exec tr '[:lower:]' '[:upper:]'")
    }

    /// A tool that ignores stdin and prints `text`.
    #[must_use]
    pub fn fixed_output(&self, name: &str, text: &str) -> PathBuf {
        let payload = self.sidecar(name, "out", text);
        self.script(name, &format!("cat > /dev/null\ncat '{}'", payload.display()))
    }

    /// A tool that prints `stderr` to standard error and exits with `code`.
    #[must_use]
    pub fn exit_with(&self, name: &str, code: i32, stderr: &str) -> PathBuf {
        let payload = self.sidecar(name, "err", stderr);
        self.script(name, &format!("cat '{}' >&2\nexit {code}", payload.display()))
    }

    /// A tool that records its pid in `pid_file` and sleeps.
    #[must_use]
    pub fn sleeper(&self, name: &str, pid_file: &Path) -> PathBuf {
        self.script(name, &format!("echo $$ > '{}'\nexec sleep 30", pid_file.display()))
    }

    /// Returns true if a process with `pid` is still running.
    #[must_use]
    pub fn is_alive(pid: &str) -> bool {
        Command::new("kill")
            .args(["-0", pid])
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
    }

    fn sidecar(&self, name: &str, role: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(format!("{name}.{role}"));
        std::fs::write(&path, contents).expect("write fake tool payload");
        path
    }
}
