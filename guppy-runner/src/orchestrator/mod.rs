//! Turning a run request into an executed pipeline.
//!
//! The [`Orchestrator`] owns the immutable configuration, the tool locator
//! and the frontend. For each [`RunRequest`] it plans the stage list, checks
//! the request against the plan, resolves every tool the plan needs and only
//! then loads the input and executes the pipeline. Every configuration
//! problem therefore surfaces before the first stage starts.

mod outcome;
mod request;

pub use outcome::RunOutcome;
pub use request::{InputSource, RunRequest, StageSelection, INPUT_STAGE};

use crate::cancellation::CancellationToken;
use crate::config::{RunnerConfig, StageBackend, StageDefinition};
use crate::context::RunContext;
use crate::core::Encoding;
use crate::errors::{ConfigError, RunnerError};
use crate::events::{EventSink, LoggingEventSink};
use crate::pipeline::{Pipeline, PipelineBuilder, StageSpec};
use crate::stages::{Frontend, FrontendRunner, PythonFrontend, RetryingRunner, StageRunner, ToolRunner};
use crate::tools::{Environment, ResolvedTools, ToolLocator};
use crate::workdir::WorkDir;
use futures::future::join_all;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, info_span, Instrument};

const PIPELINE_NAME: &str = "guppy";

/// Plans, assembles and executes runs.
#[derive(Debug)]
pub struct Orchestrator {
    config: Arc<RunnerConfig>,
    locator: ToolLocator,
    frontend: Option<Arc<dyn Frontend>>,
    events: Arc<dyn EventSink>,
}

impl Orchestrator {
    /// Creates an orchestrator using the Python-backed Guppy frontend.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: RunnerConfig, env: Environment) -> Result<Self, ConfigError> {
        config.validate()?;
        let locator = ToolLocator::new(Arc::new(config.tools.clone()), Arc::new(env));
        Ok(Self {
            config: Arc::new(config),
            locator,
            frontend: Some(Arc::new(PythonFrontend::new())),
            events: Arc::new(LoggingEventSink::debug()),
        })
    }

    /// Sets explicit tool paths, which take priority over the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownTool`] for names the configuration does
    /// not define.
    pub fn with_tool_overrides<I>(mut self, overrides: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, PathBuf)>,
    {
        self.locator = self.locator.with_overrides(overrides)?;
        Ok(self)
    }

    /// Replaces the frontend.
    #[must_use]
    pub fn with_frontend(mut self, frontend: Arc<dyn Frontend>) -> Self {
        self.frontend = Some(frontend);
        self
    }

    /// Removes the frontend; runs starting from source are then rejected.
    #[must_use]
    pub fn without_frontend(mut self) -> Self {
        self.frontend = None;
        self
    }

    /// Sets the event sink shared by all runs.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Plans the stages for a request and checks the request against them.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for unknown or broken stage selections,
    /// unsupported input encodings, unreachable store requests, store
    /// encodings no stage can produce and a missing frontend.
    pub fn plan(&self, request: &RunRequest) -> Result<Vec<&StageDefinition>, ConfigError> {
        if let Some(encoding) = request.encoding {
            if !request.input_kind.supports(encoding) {
                return Err(ConfigError::UnsupportedEncoding {
                    kind: request.input_kind,
                    encoding,
                });
            }
        }

        let planned = match &request.selection {
            StageSelection::Until(kind) => self.config.plan(request.input_kind, *kind)?,
            StageSelection::Named(names) => self.config.select(request.input_kind, names.as_slice())?,
        };

        for &kind in request.stores.keys() {
            if kind <= request.input_kind {
                return Err(ConfigError::UnreachableArtifact {
                    kind,
                    reason: format!("the input is already {}", request.input_kind),
                });
            }
            if !planned.iter().any(|stage| stage.output == kind) {
                return Err(ConfigError::UnreachableArtifact {
                    kind,
                    reason: "none of the selected stages produces it".to_string(),
                });
            }
        }

        self.output_encodings(request, &planned)?;

        if self.frontend.is_none() {
            if let Some(stage) = planned
                .iter()
                .find(|stage| matches!(stage.backend, StageBackend::Frontend))
            {
                return Err(ConfigError::MissingFrontend {
                    stage: stage.name.clone(),
                });
            }
        }

        Ok(planned)
    }

    /// Resolves the tools a plan needs and assembles its pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Config`] if a tool cannot be resolved and
    /// [`RunnerError::Validation`] if the stages do not form a valid pipeline.
    pub fn assemble(
        &self,
        request: &RunRequest,
        planned: &[&StageDefinition],
    ) -> Result<Pipeline, RunnerError> {
        let encodings = self.output_encodings(request, planned)?;
        let tools = self.resolve_tools(planned)?;

        let mut builder = PipelineBuilder::new(PIPELINE_NAME).with_input_kind(request.input_kind);
        for (stage, encoding) in planned.iter().zip(encodings) {
            let runner = self.runner_for(stage, request, &tools)?;
            let timeout = request.timeout.unwrap_or_else(|| self.config.timeout_for(stage));
            builder = builder.push(
                StageSpec::new(&stage.name, stage.input, stage.output, runner)
                    .with_encoding(encoding)
                    .with_timeout(timeout),
            );
        }
        Ok(builder.build()?)
    }

    /// Executes one run.
    ///
    /// Configuration, tool resolution and input errors are returned as
    /// `Err`; stage failures are reported in the [`RunOutcome`].
    ///
    /// # Errors
    ///
    /// Returns an error if the run cannot start.
    pub async fn run(
        &self,
        request: RunRequest,
        cancel: Arc<CancellationToken>,
    ) -> Result<RunOutcome, RunnerError> {
        let span = info_span!("run", input = %request.input.origin(), from = %request.input_kind);
        async move {
            let planned = self.plan(&request)?;
            info!(
                stages = ?planned.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
                "Planned run"
            );
            let pipeline = self.assemble(&request, &planned)?;
            let initial = request.load().await?;

            let workdir = match &request.work_dir {
                Some(dir) => WorkDir::persistent(dir)?,
                None => WorkDir::temporary()?,
            };
            debug!(workdir = %workdir.path().display(), keep = workdir.is_persistent(), "Using work directory");

            let ctx = RunContext::new(workdir)
                .with_cancellation(cancel)
                .with_event_sink(Arc::clone(&self.events))
                .with_stores(request.stores.clone());

            let report = pipeline.execute(initial, &ctx).await;
            Ok::<_, RunnerError>(RunOutcome::new(report))
        }
        .instrument(span)
        .await
    }

    /// Executes independent runs concurrently, each with its own pipeline
    /// and work directory. Results are in request order.
    pub async fn run_many(
        &self,
        requests: Vec<RunRequest>,
        cancel: Arc<CancellationToken>,
    ) -> Vec<Result<RunOutcome, RunnerError>> {
        join_all(
            requests
                .into_iter()
                .map(|request| self.run(request, Arc::clone(&cancel))),
        )
        .await
    }

    /// The output encoding of every planned stage.
    ///
    /// A stage whose output is stored produces the encoding its store path's
    /// extension names; every other stage produces its configured encoding.
    fn output_encodings(
        &self,
        request: &RunRequest,
        planned: &[&StageDefinition],
    ) -> Result<Vec<Encoding>, ConfigError> {
        let mut input = request.resolved_encoding();
        let mut encodings = Vec::with_capacity(planned.len());
        for stage in planned {
            let output = request
                .stores
                .get(&stage.output)
                .and_then(|path| stage.output.detect_encoding(path))
                .unwrap_or_else(|| stage.output_encoding());
            self.config.check_encodings(stage, input, output)?;
            encodings.push(output);
            input = output;
        }
        Ok(encodings)
    }

    fn resolve_tools(&self, planned: &[&StageDefinition]) -> Result<ResolvedTools, ConfigError> {
        let mut names = BTreeSet::new();
        for stage in planned {
            match &stage.backend {
                StageBackend::Tool { tool } => {
                    names.insert(tool.clone());
                }
                StageBackend::Frontend => {
                    if let Some(frontend) = &self.frontend {
                        names.extend(frontend.required_tools());
                    }
                }
                StageBackend::Execute => {}
            }
        }
        self.locator.resolve_all(names.iter().map(String::as_str))
    }

    fn runner_for(
        &self,
        stage: &StageDefinition,
        request: &RunRequest,
        tools: &ResolvedTools,
    ) -> Result<Arc<dyn StageRunner>, ConfigError> {
        match &stage.backend {
            StageBackend::Frontend => {
                let frontend = self.frontend.clone().ok_or_else(|| ConfigError::MissingFrontend {
                    stage: stage.name.clone(),
                })?;
                Ok(Arc::new(
                    FrontendRunner::new(frontend)
                        .with_tools(tools.clone())
                        .with_module(request.module.clone())
                        .with_origin(request.input.origin()),
                ))
            }
            StageBackend::Tool { tool } => {
                let definition = self.config.tools.get(tool).ok_or_else(|| ConfigError::UnknownTool {
                    name: tool.clone(),
                    known: self.locator.known_tools(),
                })?;
                let path = match tools.get(tool) {
                    Some(path) => path.clone(),
                    None => self.locator.resolve(tool)?,
                };
                let runner = ToolRunner::new(path, definition);
                Ok(match &definition.retry {
                    Some(retry) => Arc::new(RetryingRunner::new(Arc::new(runner), retry.clone())),
                    None => Arc::new(runner),
                })
            }
            StageBackend::Execute => Ok(Arc::new(ToolRunner::execute_input())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ArtifactKind, Encoding};
    use crate::testing::StubFrontend;
    use pretty_assertions::assert_eq;

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(RunnerConfig::guppy_toolchain(), Environment::empty())
            .unwrap()
            .with_frontend(Arc::new(StubFrontend::new()))
    }

    fn names(planned: &[&StageDefinition]) -> Vec<String> {
        planned.iter().map(|s| s.name.clone()).collect()
    }

    #[test]
    fn test_plan_full_toolchain() {
        let orchestrator = orchestrator();
        let planned = orchestrator.plan(&RunRequest::from_path("prog.py")).unwrap();

        assert_eq!(
            names(&planned),
            vec!["frontend", "translate", "optimize", "emit-llvm", "compile-object", "link", "run"]
        );
    }

    #[test]
    fn test_plan_from_intermediate_until_target() {
        let orchestrator = orchestrator();
        let request = RunRequest::from_path("prog.mlir")
            .starting_at(ArtifactKind::HugrMlir)
            .until(ArtifactKind::Llvm);

        assert_eq!(names(&orchestrator.plan(&request).unwrap()), vec!["optimize", "emit-llvm"]);
    }

    #[test]
    fn test_store_before_input_is_unreachable() {
        let orchestrator = orchestrator();
        let request = RunRequest::from_path("prog.json")
            .starting_at(ArtifactKind::Hugr)
            .store(ArtifactKind::Hugr, "out.json");

        let err = orchestrator.plan(&request).unwrap_err();
        assert!(matches!(err, ConfigError::UnreachableArtifact { kind: ArtifactKind::Hugr, .. }));
    }

    #[test]
    fn test_store_after_target_is_unreachable() {
        let orchestrator = orchestrator();
        let request = RunRequest::from_path("prog.py")
            .until(ArtifactKind::LoweredMlir)
            .store(ArtifactKind::Object, "out.o");

        let err = orchestrator.plan(&request).unwrap_err();
        assert!(matches!(err, ConfigError::UnreachableArtifact { kind: ArtifactKind::Object, .. }));
    }

    #[test]
    fn test_unsupported_input_encoding() {
        let orchestrator = orchestrator();
        let request = RunRequest::from_path("prog.py").with_encoding(Encoding::Binary);

        let err = orchestrator.plan(&request).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedEncoding { .. }));
    }

    #[test]
    fn test_source_input_needs_frontend() {
        let orchestrator = orchestrator().without_frontend();
        let err = orchestrator.plan(&RunRequest::from_path("prog.py")).unwrap_err();
        assert_eq!(err, ConfigError::MissingFrontend { stage: "frontend".to_string() });
    }

    #[test]
    fn test_unknown_override_rejected() {
        let err = orchestrator()
            .with_tool_overrides([("opt".to_string(), PathBuf::from("/bin/true"))])
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTool { .. }));
    }

    #[tokio::test]
    async fn test_missing_tool_fails_before_any_stage() {
        let frontend = Arc::new(StubFrontend::new());
        let orchestrator = orchestrator().with_frontend(frontend.clone());

        let err = orchestrator
            .run(RunRequest::inline("let x = 1"), Arc::new(CancellationToken::new()))
            .await
            .unwrap_err();

        let RunnerError::Config(ConfigError::MissingTool { tool, .. }) = &err else {
            panic!("expected a missing tool, got {err:?}");
        };
        assert_eq!(tool, "hugr-mlir-translate");
        assert_eq!(err.exit_code(), 2);
        assert_eq!(frontend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_frontend_only_run() {
        let orchestrator = orchestrator();
        let outcome = orchestrator
            .run(
                RunRequest::inline("let x = 1").until(ArtifactKind::Hugr),
                Arc::new(CancellationToken::new()),
            )
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.exit_code(), 0);
        let artifact = outcome.into_artifact().unwrap();
        assert_eq!(artifact.as_text().unwrap(), StubFrontend::ir_for("let x = 1"));
    }

    #[test]
    fn test_empty_selection_rejected() {
        let request = RunRequest::from_path("prog.json")
            .starting_at(ArtifactKind::Hugr)
            .until(ArtifactKind::Hugr);

        let err = orchestrator().plan(&request).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSelection(_)));
    }

    #[test]
    fn test_store_encoding_must_be_producible() {
        let request = RunRequest::inline("let x = 1")
            .until(ArtifactKind::Llvm)
            .store(ArtifactKind::Llvm, "prog.bc");

        let err = orchestrator().plan(&request).unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnsupportedEncoding {
                kind: ArtifactKind::Llvm,
                encoding: Encoding::Binary,
            }
        );
    }

    #[test]
    fn test_store_extension_selects_stage_encoding() {
        let orchestrator = orchestrator();
        let request = RunRequest::from_path("prog.json")
            .starting_at(ArtifactKind::Hugr)
            .until(ArtifactKind::Llvm)
            .store(ArtifactKind::HugrMlir, "prog.mlirbc");
        let planned = orchestrator.plan(&request).unwrap();

        let encodings = orchestrator.output_encodings(&request, &planned).unwrap();
        assert_eq!(encodings, vec![Encoding::Binary, Encoding::Textual, Encoding::Textual]);
    }

    #[test]
    fn test_named_stages_must_chain() {
        let request = RunRequest::from_path("prog.json")
            .starting_at(ArtifactKind::Hugr)
            .with_stages(["translate", "emit-llvm"]);

        let err = orchestrator().plan(&request).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSelection(_)));
    }
}
