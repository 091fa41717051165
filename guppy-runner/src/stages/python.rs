//! A frontend that drives the Guppy compiler through a Python interpreter.

use super::{CompileDiagnostic, CompileRequest, Frontend, FrontendError};
use crate::config::PYTHON_TOOL;
use crate::errors::SourceLocation;
use crate::process::{is_transient_spawn_error, run_process, ProcessCommand, ProcessError, ProcessOutcome};
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

/// Executes the program read from stdin and prints the compiled HUGR.
///
/// Arguments: the source origin and the module name (empty for the default
/// `@guppy` module).
const DRIVER: &str = r#"
import sys
from guppylang.decorator import guppy

origin, module_name = sys.argv[1], sys.argv[2]
namespace = {"__name__": "__main__", "__file__": origin}
exec(compile(sys.stdin.read(), origin, "exec"), namespace)

if module_name:
    module = namespace.get(module_name)
    if module is None:
        raise NameError(f"module '{module_name}' is not defined in {origin}")
else:
    module = guppy.take_module()

hugr = module.compile()
data = hugr.to_json() if hasattr(hugr, "to_json") else hugr.serialize()
if isinstance(data, bytes):
    sys.stdout.buffer.write(data)
else:
    sys.stdout.write(data)
"#;

/// Compiles Guppy source by running `guppylang` in the resolved `python` tool.
#[derive(Debug, Clone, Copy, Default)]
pub struct PythonFrontend;

impl PythonFrontend {
    /// Creates the frontend.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Frontend for PythonFrontend {
    fn name(&self) -> &str {
        "guppylang"
    }

    fn required_tools(&self) -> Vec<String> {
        vec![PYTHON_TOOL.to_string()]
    }

    async fn compile(&self, request: CompileRequest<'_>) -> Result<Vec<u8>, FrontendError> {
        let Some(python) = request.tools.get(PYTHON_TOOL) else {
            return Err(FrontendError::Spawn {
                tool: PYTHON_TOOL.to_string(),
                message: "no Python interpreter was resolved".to_string(),
                transient: false,
            });
        };

        let command = ProcessCommand::new(&python.path).args([
            "-c",
            DRIVER,
            request.origin,
            request.module_name.unwrap_or_default(),
        ]);
        debug!(python = %python.path.display(), "Invoking Guppy compiler");

        let outcome = run_process(
            &command,
            Some(request.source.as_bytes()),
            request.timeout,
            request.cancel,
        )
        .await
        .map_err(|e| match e {
            ProcessError::Spawn(err) => FrontendError::Spawn {
                tool: PYTHON_TOOL.to_string(),
                message: err.to_string(),
                transient: is_transient_spawn_error(&err),
            },
            ProcessError::Io(err) => FrontendError::Compile(CompileDiagnostic::new(format!(
                "lost contact with the Guppy compiler: {err}"
            ))),
        })?;

        match outcome {
            ProcessOutcome::Exited { status, stdout, .. } if status.success() => Ok(stdout),
            ProcessOutcome::Exited { stderr, .. } => Err(FrontendError::Compile(parse_diagnostic(
                &String::from_utf8_lossy(&stderr),
                request.origin,
            ))),
            ProcessOutcome::TimedOut { elapsed } => Err(FrontendError::Timeout(elapsed)),
            ProcessOutcome::Cancelled { reason } => Err(FrontendError::Cancelled(reason)),
        }
    }
}

fn traceback_location() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"File "([^"]+)", line (\d+)"#).ok())
        .as_ref()
}

fn arrow_location() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?m)^\s*--> (\S+?):(\d+):(\d+)\s*$").ok())
        .as_ref()
}

/// Extracts a message and source location from the compiler's stderr.
///
/// The message is the last non-empty line (the exception line of a Python
/// traceback). The location is the innermost frame in the user's file, or a
/// `--> file:line:col` marker when the compiler renders one.
pub(crate) fn parse_diagnostic(stderr: &str, origin: &str) -> CompileDiagnostic {
    let message = stderr
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .unwrap_or("the Guppy compiler failed without printing a diagnostic")
        .to_string();

    let arrow = arrow_location().and_then(|re| {
        re.captures_iter(stderr).last().and_then(|caps| {
            let line = caps[2].parse().ok()?;
            let column = caps[3].parse().ok()?;
            Some(SourceLocation::new(&caps[1], line).with_column(column))
        })
    });

    let frame = || {
        traceback_location().and_then(|re| {
            re.captures_iter(stderr)
                .filter(|caps| &caps[1] == origin)
                .last()
                .and_then(|caps| Some(SourceLocation::new(&caps[1], caps[2].parse().ok()?)))
        })
    };

    let diagnostic = CompileDiagnostic::new(message);
    match arrow.or_else(frame) {
        Some(location) => diagnostic.at(location),
        None => diagnostic,
    }
}


#[cfg(all(test, unix))]
mod process_tests {
    use super::*;
    use crate::cancellation::CancellationToken;
    use crate::testing::FakeToolbox;
    use crate::tools::{ResolvedTools, ToolPath, ToolSource};
    use std::time::Duration;

    fn tools_with(path: std::path::PathBuf) -> ResolvedTools {
        let mut tools = ResolvedTools::new();
        tools.insert(ToolPath {
            name: PYTHON_TOOL.to_string(),
            path,
            source: ToolSource::Override,
        });
        tools
    }

    #[tokio::test]
    async fn test_fake_interpreter_output_is_returned() {
        let toolbox = FakeToolbox::new();
        let python = toolbox.fixed_output("python", r#"{"modules": []}"#);
        let tools = tools_with(python);
        let cancel = CancellationToken::new();

        let ir = PythonFrontend
            .compile(CompileRequest {
                source: "@guppy\ndef main() -> int:\n    return 1\n",
                origin: "prog.py",
                module_name: None,
                tools: &tools,
                timeout: Duration::from_secs(10),
                cancel: &cancel,
            })
            .await
            .unwrap();
        assert_eq!(ir, br#"{"modules": []}"#);
    }

    #[tokio::test]
    async fn test_failing_interpreter_yields_diagnostic() {
        let toolbox = FakeToolbox::new();
        let python = toolbox.exit_with(
            "python",
            1,
            "  File \"prog.py\", line 2, in <module>\nNameError: name 'qubit' is not defined",
        );
        let tools = tools_with(python);
        let cancel = CancellationToken::new();

        let err = PythonFrontend
            .compile(CompileRequest {
                source: "qubit()",
                origin: "prog.py",
                module_name: Some("main_module"),
                tools: &tools,
                timeout: Duration::from_secs(10),
                cancel: &cancel,
            })
            .await
            .unwrap_err();

        let FrontendError::Compile(diagnostic) = err else {
            panic!("expected a diagnostic, got {err:?}");
        };
        assert_eq!(diagnostic.message, "NameError: name 'qubit' is not defined");
        assert_eq!(diagnostic.location, Some(SourceLocation::new("prog.py", 2)));
    }
}
