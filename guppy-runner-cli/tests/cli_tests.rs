//! End-to-end tests driving the built `guppy-runner` binary with fake tools.

#![cfg(unix)]

use pretty_assertions::assert_eq;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const HUGR: &str = r#"{"version": "v1", "modules": []}"#;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn tool(&self, name: &str, body: &str) -> PathBuf {
        let path = self.file(name, &format!("#!/bin/sh\n{body}\n"));
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }
}

fn guppy_runner(args: &[&str]) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_guppy-runner"));
    command.args(args).env_remove("GUPPY_RUNNER_CONFIG").env_remove("RUST_LOG");
    command
}

fn tool_arg(name: &str, path: &Path) -> String {
    format!("{name}={}", path.display())
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_hugr_to_lowered_mlir() {
    let ws = Workspace::new();
    let input = ws.file("prog.json", HUGR);
    let translate = ws.tool("translate", "exec tr '[:lower:]' '[:upper:]'");
    let optimize = ws.tool("optimize", "exec cat");

    let output = guppy_runner(&[
        input.to_str().unwrap(),
        "--hugr",
        "--emit",
        "lowered-mlir",
        "--tool",
        &tool_arg("hugr-mlir-translate", &translate),
        "--tool",
        &tool_arg("hugr-mlir-opt", &optimize),
    ])
    .output()
    .unwrap();

    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert_eq!(String::from_utf8(output.stdout).unwrap(), HUGR.to_uppercase());
}

#[test]
fn test_failing_tool_reports_stage_and_stderr() {
    let ws = Workspace::new();
    let input = ws.file("prog.json", HUGR);
    let translate = ws.tool("translate", "exec cat");
    let optimize = ws.tool("optimize", "cat > /dev/null\necho 'bad pass' >&2\nexit 1");

    let output = guppy_runner(&[
        input.to_str().unwrap(),
        "--hugr",
        "--emit",
        "lowered-mlir",
        "--tool",
        &tool_arg("hugr-mlir-translate", &translate),
        "--tool",
        &tool_arg("hugr-mlir-opt", &optimize),
    ])
    .output()
    .unwrap();

    assert_eq!(output.status.code(), Some(4));
    let stderr = stderr(&output);
    assert!(stderr.contains("bad pass"), "stderr: {stderr}");
    assert!(stderr.contains("optimize"), "stderr: {stderr}");
    assert!(output.stdout.is_empty());
}

#[test]
fn test_missing_tool_is_configuration_error() {
    let ws = Workspace::new();
    let input = ws.file("prog.json", HUGR);

    let output = guppy_runner(&[input.to_str().unwrap(), "--hugr", "--emit", "hugr-mlir"])
        .env("PATH", ws.path("empty-bin"))
        .env_remove("HUGR_MLIR_TRANSLATE")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("hugr-mlir-translate"));
}

#[test]
fn test_store_output_file_and_report() {
    let ws = Workspace::new();
    let input = ws.file("prog.json", HUGR);
    let translate = ws.tool("translate", "exec cat");
    let optimize = ws.tool("optimize", "exec tr '[:lower:]' '[:upper:]'");
    let stored = ws.path("prog.hugr.mlir");
    let out = ws.path("prog.lowered.mlir");
    let report = ws.path("report.json");

    let output = guppy_runner(&[
        input.to_str().unwrap(),
        "--hugr",
        "--emit",
        "lowered-mlir",
        "--store-hugr-mlir",
        stored.to_str().unwrap(),
        "-o",
        out.to_str().unwrap(),
        "--report",
        report.to_str().unwrap(),
        "--tool",
        &tool_arg("hugr-mlir-translate", &translate),
        "--tool",
        &tool_arg("hugr-mlir-opt", &optimize),
    ])
    .output()
    .unwrap();

    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert!(output.stdout.is_empty());
    assert_eq!(std::fs::read_to_string(&stored).unwrap(), HUGR);
    assert_eq!(std::fs::read_to_string(&out).unwrap(), HUGR.to_uppercase());

    let report: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(report["stages"][0]["stage"], "translate");
    assert_eq!(report["stages"][1]["stage"], "optimize");
    assert_eq!(report["stages"][1]["status"], "ok");
}

#[test]
fn test_store_outside_selection_is_rejected() {
    let ws = Workspace::new();
    let input = ws.file("prog.json", HUGR);

    let output = guppy_runner(&[
        input.to_str().unwrap(),
        "--hugr",
        "--emit",
        "hugr-mlir",
        "--store-obj",
        ws.path("prog.o").to_str().unwrap(),
    ])
    .output()
    .unwrap();

    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("object"));
}

#[test]
fn test_malformed_input_is_invalid_artifact() {
    let ws = Workspace::new();
    let input = ws.file("prog.json", "{not json");
    let translate = ws.tool("translate", "exec cat");

    let output = guppy_runner(&[
        input.to_str().unwrap(),
        "--hugr",
        "--emit",
        "hugr-mlir",
        "--tool",
        &tool_arg("hugr-mlir-translate", &translate),
    ])
    .output()
    .unwrap();

    assert_eq!(output.status.code(), Some(6));
}

#[test]
fn test_usage_error_exit_code() {
    let output = guppy_runner(&["--hugr", "--llvm"]).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_binary_output_is_not_written_to_stdout() {
    let ws = Workspace::new();
    let input = ws.file("prog.ll", "define i32 @main() { ret i32 0 }");
    let llc = ws.tool("llc", "printf '\\177ELF' > \"$4\"");

    let output = guppy_runner(&[
        input.to_str().unwrap(),
        "--llvm",
        "--emit",
        "object",
        "--tool",
        &tool_arg("llc", &llc),
    ])
    .output()
    .unwrap();

    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert!(output.stdout.is_empty());
    assert!(stderr(&output).contains("-o FILE"));
}

#[test]
fn test_store_encoding_the_toolchain_cannot_emit() {
    let ws = Workspace::new();
    let input = ws.file("prog.json", HUGR);
    let stored = ws.path("prog.bc");

    let output = guppy_runner(&[
        input.to_str().unwrap(),
        "--hugr",
        "--emit",
        "llvm",
        "--store-llvm",
        stored.to_str().unwrap(),
    ])
    .output()
    .unwrap();

    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("binary"));
    assert!(!stored.exists());
}
