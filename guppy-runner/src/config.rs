//! Runner configuration: the tool catalog and the ordered stage catalog.
//!
//! The built-in [`RunnerConfig::guppy_toolchain`] describes the standard
//! Guppy → HUGR → MLIR → LLVM → native pipeline. A JSON file with the same
//! shape replaces it wholesale:
//!
//! ```json
//! {
//!   "default_timeout_secs": 600,
//!   "tools": {
//!     "hugr-mlir-opt": { "binary": "hugr-mlir-opt", "env_var": "HUGR_MLIR_OPT", "args": ["--lower-hugr"] }
//!   },
//!   "stages": [
//!     { "name": "optimize", "input": "hugr-mlir", "output": "lowered-mlir",
//!       "backend": { "type": "tool", "tool": "hugr-mlir-opt" } }
//!   ]
//! }
//! ```

use crate::core::{ArtifactKind, Encoding};
use crate::errors::ConfigError;
use crate::tools::{ToolDefinition, ToolIo};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Default per-stage timeout, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Logical name of the interpreter tool used by the Python frontend.
pub const PYTHON_TOOL: &str = "python";

const fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// What executes a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum StageBackend {
    /// The in-process frontend compiler.
    Frontend,
    /// An external tool from the tool catalog.
    Tool {
        /// The logical tool name.
        tool: String,
    },
    /// The input artifact itself, executed as a program.
    Execute,
}

/// One entry of the stage catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageDefinition {
    /// Unique stage name.
    pub name: String,
    /// Accepted artifact kind.
    pub input: ArtifactKind,
    /// Produced artifact kind.
    pub output: ArtifactKind,
    /// Encoding of the produced artifact; the kind's default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_encoding: Option<Encoding>,
    /// Per-stage timeout override, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// What executes the stage.
    pub backend: StageBackend,
}

impl StageDefinition {
    /// Creates a stage definition.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        input: ArtifactKind,
        output: ArtifactKind,
        backend: StageBackend,
    ) -> Self {
        Self {
            name: name.into(),
            input,
            output,
            output_encoding: None,
            timeout_secs: None,
            backend,
        }
    }

    /// Creates a stage backed by a catalog tool.
    #[must_use]
    pub fn tool(
        name: impl Into<String>,
        input: ArtifactKind,
        output: ArtifactKind,
        tool: impl Into<String>,
    ) -> Self {
        Self::new(name, input, output, StageBackend::Tool { tool: tool.into() })
    }

    /// Sets the output encoding.
    #[must_use]
    pub fn with_output_encoding(mut self, encoding: Encoding) -> Self {
        self.output_encoding = Some(encoding);
        self
    }

    /// The encoding of the produced artifact.
    #[must_use]
    pub fn output_encoding(&self) -> Encoding {
        self.output_encoding
            .unwrap_or_else(|| self.output.default_encoding())
    }

    /// The tool this stage invokes, if any.
    #[must_use]
    pub fn tool_name(&self) -> Option<&str> {
        match &self.backend {
            StageBackend::Tool { tool } => Some(tool),
            StageBackend::Frontend | StageBackend::Execute => None,
        }
    }
}

/// The complete runner configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    /// Timeout applied to stages and tools without their own.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// External tool catalog, keyed by logical name.
    #[serde(default)]
    pub tools: BTreeMap<String, ToolDefinition>,
    /// Stage catalog, in toolchain order.
    pub stages: Vec<StageDefinition>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::guppy_toolchain()
    }
}

impl RunnerConfig {
    /// The standard Guppy toolchain.
    #[must_use]
    pub fn guppy_toolchain() -> Self {
        let mut tools = BTreeMap::new();
        tools.insert(
            PYTHON_TOOL.to_string(),
            ToolDefinition::new("python3")
                .with_env_var("GUPPY_PYTHON")
                .with_description("Python interpreter with guppylang installed"),
        );
        tools.insert(
            "hugr-mlir-translate".to_string(),
            ToolDefinition::new("hugr-mlir-translate")
                .with_env_var("HUGR_MLIR_TRANSLATE")
                .with_input_args(Encoding::Textual, ["--hugr-json-to-mlir"])
                .with_input_args(Encoding::Binary, ["--hugr-msgpack-to-mlir"])
                .with_output_args(Encoding::Binary, ["--emit-bytecode"])
                .with_description("Translates HUGR into the HUGR MLIR dialect"),
        );
        tools.insert(
            "hugr-mlir-opt".to_string(),
            ToolDefinition::new("hugr-mlir-opt")
                .with_env_var("HUGR_MLIR_OPT")
                .with_args(["--lower-hugr"])
                .with_output_args(Encoding::Binary, ["--emit-bytecode"])
                .with_description("Lowers HUGR MLIR to the LLVM dialect"),
        );
        tools.insert(
            "mlir-translate".to_string(),
            ToolDefinition::new("mlir-translate")
                .with_env_var("MLIR_TRANSLATE")
                .with_args(["--mlir-to-llvmir"])
                .with_description("Translates LLVM-dialect MLIR to LLVM IR"),
        );
        tools.insert(
            "llc".to_string(),
            ToolDefinition::new("llc")
                .with_env_var("LLC")
                .with_args(["{input}", "--filetype=obj", "-o", "{output}"])
                .with_io(ToolIo::Files)
                .with_description("Compiles LLVM IR to a native object file"),
        );
        tools.insert(
            "cc".to_string(),
            ToolDefinition::new("cc")
                .with_env_var("CC")
                .with_args(["{input}", "-o", "{output}"])
                .with_io(ToolIo::Files)
                .with_description("Links the object file into an executable"),
        );

        let stages = vec![
            StageDefinition::new(
                "frontend",
                ArtifactKind::Source,
                ArtifactKind::Hugr,
                StageBackend::Frontend,
            ),
            StageDefinition::tool(
                "translate",
                ArtifactKind::Hugr,
                ArtifactKind::HugrMlir,
                "hugr-mlir-translate",
            ),
            StageDefinition::tool(
                "optimize",
                ArtifactKind::HugrMlir,
                ArtifactKind::LoweredMlir,
                "hugr-mlir-opt",
            ),
            StageDefinition::tool(
                "emit-llvm",
                ArtifactKind::LoweredMlir,
                ArtifactKind::Llvm,
                "mlir-translate",
            ),
            StageDefinition::tool(
                "compile-object",
                ArtifactKind::Llvm,
                ArtifactKind::Object,
                "llc",
            ),
            StageDefinition::tool("link", ArtifactKind::Object, ArtifactKind::Executable, "cc"),
            StageDefinition::new(
                "run",
                ArtifactKind::Executable,
                ArtifactKind::RunOutput,
                StageBackend::Execute,
            ),
        ];

        Self {
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            tools,
            stages,
        }
    }

    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed, has unknown fields or
    /// fails validation.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::File`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file_error = |message: String| ConfigError::File {
            path: path.to_path_buf(),
            message,
        };
        let json = std::fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
        Self::from_json(&json).map_err(|e| match e {
            ConfigError::Invalid(message) => file_error(message),
            other => other,
        })
    }

    /// Checks the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistency found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout_secs == 0 {
            return Err(ConfigError::invalid("default_timeout_secs must be positive"));
        }
        for (name, tool) in &self.tools {
            tool.validate(name)?;
        }
        if self.stages.is_empty() {
            return Err(ConfigError::invalid("no stages configured"));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if stage.name.trim().is_empty() {
                return Err(ConfigError::invalid("stage with empty name"));
            }
            if !seen.insert(stage.name.as_str()) {
                return Err(ConfigError::invalid(format!("duplicate stage '{}'", stage.name)));
            }
            if stage.input == stage.output {
                return Err(ConfigError::invalid(format!(
                    "stage '{}' consumes and produces {}",
                    stage.name, stage.input
                )));
            }
            if stage.timeout_secs == Some(0) {
                return Err(ConfigError::invalid(format!(
                    "stage '{}' has a zero timeout",
                    stage.name
                )));
            }
            let encoding = stage.output_encoding();
            if !stage.output.supports(encoding) {
                return Err(ConfigError::UnsupportedEncoding {
                    kind: stage.output,
                    encoding,
                });
            }

            match &stage.backend {
                StageBackend::Tool { tool } if !self.tools.contains_key(tool) => {
                    return Err(ConfigError::UnknownTool {
                        name: tool.clone(),
                        known: self.tools.keys().cloned().collect(),
                    });
                }
                StageBackend::Frontend if stage.input != ArtifactKind::Source => {
                    return Err(ConfigError::invalid(format!(
                        "frontend stage '{}' must consume source",
                        stage.name
                    )));
                }
                StageBackend::Execute if stage.input != ArtifactKind::Executable => {
                    return Err(ConfigError::invalid(format!(
                        "execute stage '{}' must consume an executable",
                        stage.name
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Looks up a stage by name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownStage`] if no stage has that name.
    pub fn stage(&self, name: &str) -> Result<&StageDefinition, ConfigError> {
        self.stages
            .iter()
            .find(|stage| stage.name == name)
            .ok_or_else(|| ConfigError::UnknownStage {
                name: name.to_string(),
                known: self.stages.iter().map(|s| s.name.clone()).collect(),
            })
    }

    /// Plans the stages that turn a `from` artifact into an `until` artifact,
    /// walking the catalog in order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSelection`] if there is nothing to do and
    /// [`ConfigError::UnreachableArtifact`] if the catalog cannot get there.
    pub fn plan(
        &self,
        from: ArtifactKind,
        until: ArtifactKind,
    ) -> Result<Vec<&StageDefinition>, ConfigError> {
        if until <= from {
            return Err(ConfigError::InvalidSelection(format!(
                "the input is already {from}, nothing to do to reach {until}"
            )));
        }

        let mut current = from;
        let mut planned = Vec::new();
        for stage in &self.stages {
            if current == until {
                break;
            }
            if stage.input == current {
                planned.push(stage);
                current = stage.output;
            }
        }

        if current == until {
            Ok(planned)
        } else {
            Err(ConfigError::UnreachableArtifact {
                kind: until,
                reason: format!("no configured stage chain leads from {from} to {until}"),
            })
        }
    }

    /// Selects stages by name, checking that they chain from `from`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownStage`] for undefined names and
    /// [`ConfigError::InvalidSelection`] for empty or broken chains.
    pub fn select<S: AsRef<str>>(
        &self,
        from: ArtifactKind,
        names: &[S],
    ) -> Result<Vec<&StageDefinition>, ConfigError> {
        if names.is_empty() {
            return Err(ConfigError::InvalidSelection("no stages selected".to_string()));
        }

        let mut current = from;
        let mut selected = Vec::with_capacity(names.len());
        for name in names {
            let stage = self.stage(name.as_ref())?;
            if stage.input != current {
                return Err(ConfigError::InvalidSelection(format!(
                    "stage '{}' expects {} but would receive {current}",
                    stage.name, stage.input
                )));
            }
            current = stage.output;
            selected.push(stage);
        }
        Ok(selected)
    }

    /// Checks that a stage can read an input with encoding `input` and can be
    /// asked to produce `output`.
    ///
    /// A stage always produces its configured output encoding. A tool stage
    /// can produce another one when its tool declares arguments for it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnsupportedEncoding`] naming the side that does
    /// not fit.
    pub fn check_encodings(
        &self,
        stage: &StageDefinition,
        input: Encoding,
        output: Encoding,
    ) -> Result<(), ConfigError> {
        let tool = stage.tool_name().and_then(|name| self.tools.get(name));
        if let Some(tool) = tool {
            if !tool.accepts(input) {
                return Err(ConfigError::UnsupportedEncoding {
                    kind: stage.input,
                    encoding: input,
                });
            }
        }

        let emits = output == stage.output_encoding() || tool.is_some_and(|tool| tool.can_emit(output));
        if emits && stage.output.supports(output) {
            Ok(())
        } else {
            Err(ConfigError::UnsupportedEncoding {
                kind: stage.output,
                encoding: output,
            })
        }
    }

    /// The effective timeout of a stage: its own, else its tool's, else the
    /// default.
    #[must_use]
    pub fn timeout_for(&self, stage: &StageDefinition) -> Duration {
        let secs = stage
            .timeout_secs
            .or_else(|| {
                stage
                    .tool_name()
                    .and_then(|tool| self.tools.get(tool))
                    .and_then(|tool| tool.timeout_secs)
            })
            .unwrap_or(self.default_timeout_secs);
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(stages: &[&StageDefinition]) -> Vec<String> {
        stages.iter().map(|s| s.name.clone()).collect()
    }

    #[test]
    fn test_default_toolchain_is_valid() {
        let config = RunnerConfig::guppy_toolchain();
        assert!(config.validate().is_ok());
        assert!(config.tools.contains_key(PYTHON_TOOL));
    }

    #[test]
    fn test_plan_full_toolchain() {
        let config = RunnerConfig::guppy_toolchain();
        let plan = config.plan(ArtifactKind::Source, ArtifactKind::RunOutput).unwrap();

        assert_eq!(
            names(&plan),
            vec!["frontend", "translate", "optimize", "emit-llvm", "compile-object", "link", "run"]
        );
    }

    #[test]
    fn test_plan_from_intermediate_to_target() {
        let config = RunnerConfig::guppy_toolchain();
        let plan = config.plan(ArtifactKind::HugrMlir, ArtifactKind::Llvm).unwrap();
        assert_eq!(names(&plan), vec!["optimize", "emit-llvm"]);
    }

    #[test]
    fn test_plan_nothing_to_do() {
        let config = RunnerConfig::guppy_toolchain();
        let err = config.plan(ArtifactKind::Llvm, ArtifactKind::Hugr).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSelection(_)));
    }

    #[test]
    fn test_plan_unreachable() {
        let mut config = RunnerConfig::guppy_toolchain();
        config.stages.retain(|s| s.name != "link");

        let err = config.plan(ArtifactKind::Source, ArtifactKind::RunOutput).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnreachableArtifact { kind: ArtifactKind::RunOutput, .. }
        ));
    }

    #[test]
    fn test_select_checks_chaining() {
        let config = RunnerConfig::guppy_toolchain();

        let selected = config.select(ArtifactKind::Hugr, &["translate", "optimize"]).unwrap();
        assert_eq!(names(&selected), vec!["translate", "optimize"]);

        let err = config.select(ArtifactKind::Hugr, &["optimize"]).unwrap_err();
        assert!(err.to_string().contains("expects hugr-mlir but would receive hugr"));

        let err = config.select(ArtifactKind::Hugr, &["translate", "polish"]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownStage { .. }));

        let empty: [&str; 0] = [];
        assert!(config.select(ArtifactKind::Hugr, &empty).is_err());
    }

    #[test]
    fn test_timeout_resolution_order() {
        let mut config = RunnerConfig::guppy_toolchain();
        config.default_timeout_secs = 30;
        if let Some(tool) = config.tools.get_mut("llc") {
            tool.timeout_secs = Some(20);
        }

        let optimize = config.stage("optimize").unwrap().clone();
        assert_eq!(config.timeout_for(&optimize), Duration::from_secs(30));

        let mut compile = config.stage("compile-object").unwrap().clone();
        assert_eq!(config.timeout_for(&compile), Duration::from_secs(20));

        compile.timeout_secs = Some(5);
        assert_eq!(config.timeout_for(&compile), Duration::from_secs(5));
    }

    #[test]
    fn test_from_json_minimal() {
        let config = RunnerConfig::from_json(
            r#"{
                "tools": {"opt": {"binary": "my-opt", "env_var": "MY_OPT"}},
                "stages": [
                    {"name": "optimize", "input": "hugr-mlir", "output": "lowered-mlir",
                     "backend": {"type": "tool", "tool": "opt"}}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.default_timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.stages[0].tool_name(), Some("opt"));
    }

    #[test]
    fn test_from_json_rejects_misspelled_field() {
        let err = RunnerConfig::from_json(
            r#"{"stages": [], "tool": {}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn test_validate_unknown_tool_reference() {
        let err = RunnerConfig::from_json(
            r#"{"stages": [
                {"name": "optimize", "input": "hugr-mlir", "output": "lowered-mlir",
                 "backend": {"type": "tool", "tool": "missing"}}
            ]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTool { .. }));
    }

    #[test]
    fn test_validate_duplicate_stage() {
        let mut config = RunnerConfig::guppy_toolchain();
        let dup = config.stages[1].clone();
        config.stages.push(dup);
        assert!(config.validate().unwrap_err().to_string().contains("duplicate stage"));
    }

    #[test]
    fn test_validate_unsupported_encoding() {
        let mut config = RunnerConfig::guppy_toolchain();
        config.stages[5].output_encoding = Some(Encoding::Textual);
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::UnsupportedEncoding { kind: ArtifactKind::Executable, .. }
        ));
    }

    #[test]
    fn test_check_encodings() {
        let config = RunnerConfig::guppy_toolchain();
        let translate = config.stage("translate").unwrap();
        let emit_llvm = config.stage("emit-llvm").unwrap();
        let frontend = config.stage("frontend").unwrap();

        assert!(config.check_encodings(translate, Encoding::Binary, Encoding::Binary).is_ok());
        assert!(config.check_encodings(emit_llvm, Encoding::Binary, Encoding::Textual).is_ok());
        assert!(matches!(
            config.check_encodings(emit_llvm, Encoding::Textual, Encoding::Binary),
            Err(ConfigError::UnsupportedEncoding { kind: ArtifactKind::Llvm, encoding: Encoding::Binary })
        ));
        assert!(matches!(
            config.check_encodings(frontend, Encoding::Textual, Encoding::Binary),
            Err(ConfigError::UnsupportedEncoding { kind: ArtifactKind::Hugr, .. })
        ));
    }

    #[test]
    fn test_check_encodings_rejects_unaccepted_input() {
        let mut config = RunnerConfig::guppy_toolchain();
        if let Some(tool) = config.tools.get_mut("hugr-mlir-translate") {
            tool.input_args.remove(&Encoding::Binary);
        }
        let translate = config.stage("translate").unwrap();

        assert!(matches!(
            config.check_encodings(translate, Encoding::Binary, Encoding::Textual),
            Err(ConfigError::UnsupportedEncoding { kind: ArtifactKind::Hugr, encoding: Encoding::Binary })
        ));
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("runner.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = RunnerConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::File { .. }));
        assert!(err.to_string().contains("runner.json"));
    }

    #[test]
    fn test_config_serde_roundtrip_preserves_catalog() {
        let config = RunnerConfig::guppy_toolchain();
        let json = serde_json::to_string_pretty(&config).unwrap();
        assert_eq!(RunnerConfig::from_json(&json).unwrap(), config);
    }
}
