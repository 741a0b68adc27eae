#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod commands;
mod config;
mod telemetry;

use std::process;

use anyhow::Context;
use rill_runtime::JobStatus;

use crate::config::{Cli, Command};

// Tracing target constants
pub const TRACING_TARGET_STARTUP: &str = "rill_cli::startup";
pub const TRACING_TARGET_SHUTDOWN: &str = "rill_cli::shutdown";
pub const TRACING_TARGET_CONFIG: &str = "rill_cli::config";
pub const TRACING_TARGET_COMMAND: &str = "rill_cli::command";

/// The run finished.
const EXIT_SUCCESS: i32 = 0;
/// The run stopped on an error in the pipeline definition or its user code.
const EXIT_USER_ERROR: i32 = 1;
/// The engine failed.
const EXIT_INTERNAL_ERROR: i32 = 2;

#[tokio::main]
async fn main() {
    let cli = Cli::init();

    if let Err(error) = telemetry::init_tracing(cli.project.env_dir.as_deref()) {
        eprintln!("Error: {error:#}");
        process::exit(EXIT_INTERNAL_ERROR);
    }

    let error = match run(cli).await {
        Ok(JobStatus::Succeeded) => {
            tracing::info!(target: TRACING_TARGET_SHUTDOWN, "rill finished successfully");
            process::exit(EXIT_SUCCESS);
        }
        // Already reported with its trace by the job runner.
        Ok(JobStatus::Failed(_)) => process::exit(EXIT_USER_ERROR),
        Err(error) => error,
    };

    let user_error = error
        .downcast_ref::<rill_core::Error>()
        .is_some_and(rill_core::Error::is_user_error);
    if user_error {
        tracing::error!(target: TRACING_TARGET_SHUTDOWN, "{error:#}");
        process::exit(EXIT_USER_ERROR);
    }

    tracing::error!(
        target: TRACING_TARGET_SHUTDOWN,
        error = ?error,
        "rill terminated with an internal error: {error:#}"
    );
    process::exit(EXIT_INTERNAL_ERROR);
}

/// Main application entry point.
async fn run(cli: Cli) -> anyhow::Result<JobStatus> {
    cli.validate().context("invalid configuration")?;
    cli.log();

    match &cli.command {
        Command::Run(args) => commands::run(&cli, args).await,
        Command::List => commands::list(&cli).map(|()| JobStatus::Succeeded),
        Command::Init(args) => commands::init(args).map(|()| JobStatus::Succeeded),
    }
}
