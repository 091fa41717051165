//! Bounded, cancellable execution of child processes.
//!
//! [`run_process`] feeds stdin, drains stdout and stderr concurrently (a tool
//! that fills one pipe while we wait on the other would otherwise deadlock),
//! and waits for exit. The whole exchange races the timeout and the run's
//! cancellation token; on either, the child is killed and reaped before the
//! function returns.

use crate::cancellation::CancellationToken;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

#[cfg(unix)]
const ETXTBSY: i32 = 26;
const SPAWN_ATTEMPTS: u32 = 5;

/// A program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCommand {
    /// The executable.
    pub program: PathBuf,
    /// Arguments, already substituted.
    pub args: Vec<String>,
    /// Working directory for the child.
    pub cwd: Option<PathBuf>,
}

impl ProcessCommand {
    /// Creates a command with no arguments.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    /// Appends arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    fn to_command(&self, with_stdin: bool) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(if with_stdin { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        command
    }
}

/// How a process run ended.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// The process exited on its own.
    Exited {
        /// Exit status.
        status: ExitStatus,
        /// Everything written to stdout.
        stdout: Vec<u8>,
        /// Everything written to stderr.
        stderr: Vec<u8>,
    },
    /// The timeout elapsed; the process was killed.
    TimedOut {
        /// Time from spawn to kill.
        elapsed: Duration,
    },
    /// The run was cancelled; the process was killed.
    Cancelled {
        /// The cancellation reason.
        reason: String,
    },
}

/// Errors that prevent a process outcome from being observed.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The process could not be started.
    #[error("{0}")]
    Spawn(#[source] io::Error),
    /// Talking to the running process failed.
    #[error("{0}")]
    Io(#[source] io::Error),
}

impl ProcessError {
    /// Returns true if a later spawn attempt could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Spawn(err) => is_transient_spawn_error(err),
            Self::Io(_) => false,
        }
    }
}

enum Interrupt {
    Timeout,
    Cancelled,
}

/// Runs a command to completion, timeout or cancellation.
///
/// # Errors
///
/// Returns [`ProcessError::Spawn`] if the process cannot be started and
/// [`ProcessError::Io`] if its pipes or exit status cannot be read.
pub async fn run_process(
    command: &ProcessCommand,
    stdin: Option<&[u8]>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ProcessOutcome, ProcessError> {
    if cancel.is_cancelled() {
        return Ok(ProcessOutcome::Cancelled {
            reason: cancel.reason_or_default(),
        });
    }

    let mut child = spawn(command, stdin.is_some()).await?;
    let started = Instant::now();
    debug!(program = %command.program.display(), pid = child.id(), "Spawned process");

    let stdin_pipe = child.stdin.take();
    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();

    let interrupt = {
        let exchange = async {
            let write = async {
                if let (Some(mut pipe), Some(data)) = (stdin_pipe, stdin) {
                    match pipe.write_all(data).await {
                        // The tool may exit without reading its input.
                        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
                        other => other?,
                    }
                    // Dropping the pipe closes the child's stdin.
                }
                Ok::<_, io::Error>(())
            };
            let (written, stdout, stderr) =
                tokio::join!(write, read_all(stdout_pipe), read_all(stderr_pipe));
            written?;
            let (stdout, stderr) = (stdout?, stderr?);
            let status = child.wait().await?;
            Ok::<_, io::Error>((status, stdout, stderr))
        };

        tokio::select! {
            result = exchange => {
                let (status, stdout, stderr) = result.map_err(ProcessError::Io)?;
                debug!(
                    program = %command.program.display(),
                    code = status.code(),
                    elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "Process exited"
                );
                return Ok(ProcessOutcome::Exited { status, stdout, stderr });
            }
            () = tokio::time::sleep(timeout) => Interrupt::Timeout,
            () = cancel.cancelled() => Interrupt::Cancelled,
        }
    };

    // Kill and reap so no process outlives its stage.
    if let Err(e) = child.kill().await {
        warn!(program = %command.program.display(), error = %e, "Failed to kill process");
    }

    Ok(match interrupt {
        Interrupt::Timeout => ProcessOutcome::TimedOut {
            elapsed: started.elapsed(),
        },
        Interrupt::Cancelled => ProcessOutcome::Cancelled {
            reason: cancel.reason_or_default(),
        },
    })
}

async fn spawn(command: &ProcessCommand, with_stdin: bool) -> Result<Child, ProcessError> {
    let mut attempt = 1;
    loop {
        match command.to_command(with_stdin).spawn() {
            Ok(child) => return Ok(child),
            // A freshly written executable can still be open for writing in
            // a concurrently forked process.
            #[cfg(unix)]
            Err(e) if e.raw_os_error() == Some(ETXTBSY) && attempt < SPAWN_ATTEMPTS => {
                debug!(program = %command.program.display(), attempt, "Executable busy, retrying spawn");
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(e) => return Err(ProcessError::Spawn(e)),
        }
    }
}

async fn read_all<R: AsyncRead + Unpin>(pipe: Option<R>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Resource exhaustion and busy-file errors, which a retry may get past.
#[must_use]
pub fn is_transient_spawn_error(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::OutOfMemory
    ) {
        return true;
    }
    // EAGAIN, ENOMEM, ENFILE, EMFILE, ETXTBSY
    cfg!(unix) && matches!(err.raw_os_error(), Some(11 | 12 | 23 | 24 | 26))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> ProcessCommand {
        ProcessCommand::new("/bin/sh").args(["-c", script])
    }

    const LONG: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn test_stdin_roundtrip() {
        let cancel = CancellationToken::new();
        let outcome = run_process(&sh("cat"), Some(b"hello"), LONG, &cancel).await.unwrap();

        let ProcessOutcome::Exited { status, stdout, .. } = outcome else {
            panic!("expected exit, got {outcome:?}");
        };
        assert!(status.success());
        assert_eq!(stdout, b"hello");
    }

    #[tokio::test]
    async fn test_large_output_on_both_streams() {
        // Well past the pipe buffer size on both streams.
        let script = "head -c 200000 /dev/zero; head -c 200000 /dev/zero >&2";
        let cancel = CancellationToken::new();
        let outcome = run_process(&sh(script), None, LONG, &cancel).await.unwrap();

        let ProcessOutcome::Exited { stdout, stderr, .. } = outcome else {
            panic!("expected exit, got {outcome:?}");
        };
        assert_eq!(stdout.len(), 200_000);
        assert_eq!(stderr.len(), 200_000);
    }

    #[tokio::test]
    async fn test_nonzero_exit_and_stderr() {
        let cancel = CancellationToken::new();
        let outcome = run_process(&sh("echo oops >&2; exit 2"), None, LONG, &cancel)
            .await
            .unwrap();

        let ProcessOutcome::Exited { status, stderr, .. } = outcome else {
            panic!("expected exit, got {outcome:?}");
        };
        assert_eq!(status.code(), Some(2));
        assert_eq!(stderr, b"oops\n");
    }

    #[tokio::test]
    async fn test_unread_stdin_is_not_an_error() {
        let cancel = CancellationToken::new();
        let input = vec![b'x'; 1 << 20];
        let outcome = run_process(&sh("exit 0"), Some(input.as_slice()), LONG, &cancel).await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Exited { status, .. } if status.success()));
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let outcome = run_process(&sh("exec sleep 30"), None, Duration::from_millis(200), &cancel)
            .await
            .unwrap();

        assert!(matches!(outcome, ProcessOutcome::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancellation_kills_process() {
        let cancel = std::sync::Arc::new(CancellationToken::new());
        let trigger = std::sync::Arc::clone(&cancel);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel("user interrupt");
        });

        let outcome = run_process(&sh("exec sleep 30"), None, LONG, &cancel).await.unwrap();
        let ProcessOutcome::Cancelled { reason } = outcome else {
            panic!("expected cancellation, got {outcome:?}");
        };
        assert_eq!(reason, "user interrupt");
    }

    #[tokio::test]
    async fn test_already_cancelled_does_not_spawn() {
        let cancel = CancellationToken::new();
        cancel.cancel("early");
        let outcome = run_process(
            &ProcessCommand::new("/nonexistent/tool"),
            None,
            LONG,
            &cancel,
        )
        .await
        .unwrap();
        assert!(matches!(outcome, ProcessOutcome::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let cancel = CancellationToken::new();
        let err = run_process(&ProcessCommand::new("/nonexistent/tool"), None, LONG, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient_classification() {
        assert!(is_transient_spawn_error(&io::Error::from_raw_os_error(11)));
        assert!(is_transient_spawn_error(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(!is_transient_spawn_error(&io::Error::from(io::ErrorKind::NotFound)));
        assert!(!is_transient_spawn_error(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }
}
