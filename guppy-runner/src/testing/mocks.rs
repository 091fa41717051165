//! Mock frontends and stage runners for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;

use crate::context::RunContext;
use crate::core::{Artifact, ArtifactKind, StageKind};
use crate::errors::StageError;
use crate::pipeline::StageSpec;
use crate::stages::{
    CompileDiagnostic, CompileRequest, ExecutionResult, Frontend, FrontendError, StageRunner,
};

/// A frontend that compiles any source to a small JSON document.
///
/// Useful wherever a real Guppy installation is not available.
#[derive(Debug, Default)]
pub struct StubFrontend {
    delay: Option<Duration>,
    rejection: Option<CompileDiagnostic>,
    output: Option<Vec<u8>>,
    calls: Mutex<usize>,
}

impl StubFrontend {
    /// Creates a frontend that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The IR the stub produces for `source`.
    #[must_use]
    pub fn ir_for(source: &str) -> String {
        serde_json::json!({ "program": source }).to_string()
    }

    /// Makes every compilation fail with `diagnostic`.
    #[must_use]
    pub fn rejecting(mut self, diagnostic: CompileDiagnostic) -> Self {
        self.rejection = Some(diagnostic);
        self
    }

    /// Sleeps before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns `payload` verbatim instead of the generated IR.
    #[must_use]
    pub fn emitting(mut self, payload: Vec<u8>) -> Self {
        self.output = Some(payload);
        self
    }

    /// Returns how many compilations were started.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl Frontend for StubFrontend {
    fn name(&self) -> &str {
        "stub"
    }

    async fn compile(&self, request: CompileRequest<'_>) -> Result<Vec<u8>, FrontendError> {
        *self.calls.lock() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(diagnostic) = &self.rejection {
            return Err(FrontendError::Compile(diagnostic.clone()));
        }
        Ok(self
            .output
            .clone()
            .unwrap_or_else(|| Self::ir_for(request.source).into_bytes()))
    }
}

/// A stage runner that records its calls.
///
/// By default it copies its input payload into an artifact of the configured
/// kind. It can be told to fail always or for a number of leading calls.
#[derive(Debug)]
pub struct RecordingRunner {
    output: ArtifactKind,
    failure: Option<StageError>,
    fail_first: usize,
    inputs: Mutex<Vec<ArtifactKind>>,
}

impl RecordingRunner {
    /// Creates a runner that relabels its input as `output`.
    #[must_use]
    pub fn passthrough(output: ArtifactKind) -> Self {
        Self {
            output,
            failure: None,
            fail_first: 0,
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Creates a runner that always fails with `err`.
    #[must_use]
    pub fn failing(err: StageError) -> Self {
        Self {
            failure: Some(err),
            fail_first: usize::MAX,
            ..Self::passthrough(ArtifactKind::Source)
        }
    }

    /// Fails the first `attempts` calls with `err`, then passes through.
    #[must_use]
    pub fn failing_first(mut self, attempts: usize, err: StageError) -> Self {
        self.failure = Some(err);
        self.fail_first = attempts;
        self
    }

    /// Returns the number of times the runner was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.inputs.lock().len()
    }

    /// Returns the input kinds received, in call order.
    #[must_use]
    pub fn inputs(&self) -> Vec<ArtifactKind> {
        self.inputs.lock().clone()
    }
}

#[async_trait]
impl StageRunner for RecordingRunner {
    fn kind(&self) -> StageKind {
        StageKind::External
    }

    async fn run(&self, spec: &StageSpec, input: Artifact, _ctx: &RunContext) -> ExecutionResult {
        let call = {
            let mut inputs = self.inputs.lock();
            inputs.push(input.kind());
            inputs.len()
        };
        if let Some(err) = &self.failure {
            if call <= self.fail_first {
                return Err(err.clone());
            }
        }
        Ok(Artifact::new(self.output, spec.output_encoding, input.into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationToken;
    use crate::tools::ResolvedTools;

    #[tokio::test]
    async fn test_stub_frontend_counts_calls() {
        let frontend = StubFrontend::new();
        let tools = ResolvedTools::new();
        let cancel = CancellationToken::new();
        let request = CompileRequest {
            source: "x = 1",
            origin: "<stdin>",
            module_name: None,
            tools: &tools,
            timeout: Duration::from_secs(1),
            cancel: &cancel,
        };

        let ir = frontend.compile(request).await.unwrap();
        assert_eq!(ir, StubFrontend::ir_for("x = 1").into_bytes());
        assert_eq!(frontend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failing_first_recovers() {
        let runner = std::sync::Arc::new(
            RecordingRunner::passthrough(ArtifactKind::Llvm)
                .failing_first(1, StageError::invalid_artifact("emit-llvm", "empty")),
        );
        let spec = StageSpec::new("emit-llvm", ArtifactKind::LoweredMlir, ArtifactKind::Llvm, runner.clone());
        let ctx = RunContext::temporary().unwrap();
        let input = Artifact::text(ArtifactKind::LoweredMlir, "module {}");

        assert!(runner.run(&spec, input.clone(), &ctx).await.is_err());
        let artifact = runner.run(&spec, input, &ctx).await.unwrap();

        assert_eq!(artifact.kind(), ArtifactKind::Llvm);
        assert_eq!(runner.inputs(), vec![ArtifactKind::LoweredMlir; 2]);
    }
}
