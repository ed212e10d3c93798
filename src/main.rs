//! `drivetest` entry point.
//!
//! Parses the command line, merges configuration, then runs one command
//! against `<root>/drivetest`. Ctrl-C drains running workers instead of
//! killing them mid-write.

mod cli;
mod commands;
mod error;

use crate::cli::Cli;
use crate::error::ErrorKind;
use clap::Parser;
use exn::ResultExt;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version go to stdout and are not failures.
            let _ = e.print();
            return if e.use_stderr() { ExitCode::FAILURE } else { ExitCode::SUCCESS };
        },
    };
    init_logging(cli.debug);

    let settings = match drivetest_config::load(cli.config.as_deref(), &cli.overrides()).or_raise(|| ErrorKind::Config) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!("{e:?}");
            return ExitCode::FAILURE;
        },
    };
    tracing::debug!(?settings, "Loaded configuration");

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted; finishing files in progress");
            signal.cancel();
        }
    });

    match commands::run(cli.command, &settings, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:?}");
            ExitCode::FAILURE
        },
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
