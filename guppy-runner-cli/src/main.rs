//! guppy-runner command-line interface.
//!
//! Compiles a Guppy program (or an intermediate artifact) through the
//! HUGR, MLIR and LLVM toolchain and runs the resulting executable.

mod cli;

use anyhow::Context;
use clap::Parser;
use console::style;
use guppy_runner::cancellation::CancellationToken;
use guppy_runner::config::RunnerConfig;
use guppy_runner::core::Encoding;
use guppy_runner::errors::{ConfigError, ErrorClass, RunnerError};
use guppy_runner::events::LoggingEventSink;
use guppy_runner::orchestrator::Orchestrator;
use guppy_runner::tools::Environment;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins over -v
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let code = match run(&cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            exit_code(&err)
        }
    };
    std::process::exit(code);
}

async fn run(cli: &Cli) -> anyhow::Result<i32> {
    let config = match &cli.config {
        Some(path) => RunnerConfig::load(path)?,
        None => RunnerConfig::guppy_toolchain(),
    };
    let orchestrator = Orchestrator::new(config, Environment::from_process())?
        .with_tool_overrides(cli.tools.iter().cloned())?
        .with_event_sink(Arc::new(LoggingEventSink::default()));

    let cancel = Arc::new(CancellationToken::new());
    let interrupt = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            interrupt.cancel("interrupted");
        }
    });

    let outcome = orchestrator.run(cli.to_request(), cancel).await?;

    if let Some(path) = &cli.report {
        let json = outcome.report().to_json()?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        debug!(path = %path.display(), "Wrote run report");
    }

    if let Some(diagnostic) = outcome.diagnostic() {
        let (headline, details) = diagnostic.split_once('\n').unwrap_or((diagnostic.as_str(), ""));
        eprintln!("{}", style(headline).red().bold());
        if !details.is_empty() {
            eprintln!("{details}");
        }
        return Ok(outcome.exit_code());
    }

    let Some(artifact) = outcome.into_artifact() else {
        anyhow::bail!("the run finished without producing an artifact");
    };
    match &cli.output {
        Some(path) => std::fs::write(path, artifact.as_bytes())
            .with_context(|| format!("Failed to write output to {}", path.display()))?,
        None if artifact.encoding() == Encoding::Binary => {
            eprintln!(
                "{} not writing the binary {} artifact to stdout; pass -o FILE to keep it",
                style("Warning:").yellow().bold(),
                artifact.kind()
            );
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(artifact.as_bytes())?;
            stdout.flush()?;
        }
    }
    Ok(0)
}

fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(err) = err.downcast_ref::<RunnerError>() {
        err.exit_code()
    } else if err.downcast_ref::<ConfigError>().is_some() {
        ErrorClass::Config.exit_code()
    } else {
        ErrorClass::Internal.exit_code()
    }
}
