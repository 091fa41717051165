//! Command-line arguments.

use clap::{ArgAction, ArgGroup, Parser};
use guppy_runner::core::{ArtifactKind, Encoding};
use guppy_runner::orchestrator::{InputSource, RunRequest};
use std::path::PathBuf;
use std::time::Duration;

/// Compile a Guppy program through HUGR, MLIR and LLVM, then run it
#[derive(Debug, Parser)]
#[command(name = "guppy-runner")]
#[command(author, version, about, long_about = None)]
#[command(group(ArgGroup::new("input_kind").args(["hugr", "hugr_mlir", "llvm_mlir", "llvm"])))]
#[command(group(ArgGroup::new("target").args(["stages", "emit", "no_run"])))]
pub struct Cli {
    /// Input file (reads stdin when omitted)
    pub input: Option<PathBuf>,

    /// The input is HUGR
    #[arg(long)]
    pub hugr: bool,

    /// The input is HUGR-dialect MLIR
    #[arg(long)]
    pub hugr_mlir: bool,

    /// The input is LLVM-dialect MLIR
    #[arg(long)]
    pub llvm_mlir: bool,

    /// The input is LLVM IR
    #[arg(long)]
    pub llvm: bool,

    /// The input uses the binary encoding (msgpack, MLIR bytecode, bitcode)
    #[arg(long, conflicts_with = "textual")]
    pub bitcode: bool,

    /// The input uses the textual encoding
    #[arg(long)]
    pub textual: bool,

    /// Run exactly these stages, in order
    #[arg(long, value_delimiter = ',')]
    pub stages: Vec<String>,

    /// Stop after producing this artifact kind
    #[arg(long, value_name = "KIND")]
    pub emit: Option<ArtifactKind>,

    /// Stop after linking the executable
    #[arg(long)]
    pub no_run: bool,

    /// Store the HUGR
    #[arg(long, value_name = "PATH")]
    pub store_hugr: Option<PathBuf>,

    /// Store the HUGR-dialect MLIR
    #[arg(long, value_name = "PATH")]
    pub store_hugr_mlir: Option<PathBuf>,

    /// Store the LLVM-dialect MLIR
    #[arg(long, value_name = "PATH")]
    pub store_llvm_mlir: Option<PathBuf>,

    /// Store the LLVM IR
    #[arg(long, value_name = "PATH")]
    pub store_llvm: Option<PathBuf>,

    /// Store the object file
    #[arg(long, value_name = "PATH")]
    pub store_obj: Option<PathBuf>,

    /// Store the executable
    #[arg(long, value_name = "PATH")]
    pub store_bin: Option<PathBuf>,

    /// Write the final artifact here instead of stdout
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Use this path for a tool (repeatable)
    #[arg(long = "tool", value_name = "NAME=PATH", value_parser = parse_tool_override)]
    pub tools: Vec<(String, PathBuf)>,

    /// Timeout for every stage, in seconds
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    /// JSON configuration replacing the built-in toolchain
    #[arg(long, value_name = "FILE", env = "GUPPY_RUNNER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Keep intermediate files in this directory
    #[arg(long, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// The Guppy module to compile
    #[arg(long, value_name = "NAME")]
    pub module: Option<String>,

    /// Write a JSON run report here
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// The kind of the input artifact.
    pub fn input_kind(&self) -> ArtifactKind {
        if self.hugr {
            ArtifactKind::Hugr
        } else if self.hugr_mlir {
            ArtifactKind::HugrMlir
        } else if self.llvm_mlir {
            ArtifactKind::LoweredMlir
        } else if self.llvm {
            ArtifactKind::Llvm
        } else {
            ArtifactKind::Source
        }
    }

    fn encoding(&self) -> Option<Encoding> {
        if self.bitcode {
            Some(Encoding::Binary)
        } else if self.textual {
            Some(Encoding::Textual)
        } else {
            None
        }
    }

    fn stores(&self) -> impl Iterator<Item = (ArtifactKind, &PathBuf)> {
        [
            (ArtifactKind::Hugr, &self.store_hugr),
            (ArtifactKind::HugrMlir, &self.store_hugr_mlir),
            (ArtifactKind::LoweredMlir, &self.store_llvm_mlir),
            (ArtifactKind::Llvm, &self.store_llvm),
            (ArtifactKind::Object, &self.store_obj),
            (ArtifactKind::Executable, &self.store_bin),
        ]
        .into_iter()
        .filter_map(|(kind, path)| path.as_ref().map(|p| (kind, p)))
    }

    /// Builds the run request described by the arguments.
    pub fn to_request(&self) -> RunRequest {
        let input = self
            .input
            .clone()
            .map_or(InputSource::Stdin, InputSource::Path);
        let mut request = RunRequest::new(input).starting_at(self.input_kind());

        if let Some(encoding) = self.encoding() {
            request = request.with_encoding(encoding);
        }
        if !self.stages.is_empty() {
            request = request.with_stages(self.stages.iter().cloned());
        } else if let Some(kind) = self.emit {
            request = request.until(kind);
        } else if self.no_run {
            request = request.until(ArtifactKind::Executable);
        }
        for (kind, path) in self.stores() {
            request = request.store(kind, path);
        }
        if let Some(module) = &self.module {
            request = request.with_module(module);
        }
        if let Some(dir) = &self.work_dir {
            request = request.with_work_dir(dir);
        }
        if let Some(secs) = self.timeout {
            request = request.with_timeout(Duration::from_secs(secs));
        }
        request
    }
}

fn parse_tool_override(value: &str) -> Result<(String, PathBuf), String> {
    match value.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => {
            Ok((name.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected NAME=PATH, got '{value}'")),
    }
}
