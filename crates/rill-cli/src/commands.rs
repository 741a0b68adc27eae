//! Subcommand implementations.

use std::sync::Arc;

use anyhow::Context;
use rill_core::Error;
use rill_http::HttpClient;
use rill_project::FsProject;
use rill_runtime::op::{OpOptions, OpRegistry};
use rill_runtime::project::Project;
use rill_runtime::{Engine, JobStatus};
use serde_json::Value;

use crate::TRACING_TARGET_COMMAND;
use crate::config::{Cli, InitArgs, RunArgs};

/// Builds an engine over the project directory with every op registered.
fn engine(cli: &Cli) -> anyhow::Result<Engine> {
    let project = FsProject::open(&cli.project.project_dir)?;
    let client = HttpClient::new(cli.http.clone()).context("failed to create HTTP client")?;

    let mut registry = OpRegistry::with_builtins();
    rill_http::register(&mut registry, client);

    Ok(Engine::new(Arc::new(project), registry).with_sandbox(cli.sandbox.clone()))
}

/// Parses `--foreach-record`, which must be a JSON object.
fn foreach_record(text: &str) -> Result<Value, Error> {
    match serde_json::from_str(text) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(Error::invalid_definition()
            .with_message(format!("--foreach-record must be a JSON object, got: {other}"))),
        Err(err) => Err(Error::invalid_definition()
            .with_message(format!("--foreach-record is not valid JSON: {err}"))
            .with_source(err)),
    }
}

/// Runs a flow, or one op of it when `--op-id` is given.
pub async fn run(cli: &Cli, args: &RunArgs) -> anyhow::Result<JobStatus> {
    let engine = engine(cli)?;
    let options = OpOptions {
        foreach_record: args.foreach_record.as_deref().map(foreach_record).transpose()?,
        preview: args.op_mode,
    };

    let job = match &args.op_id {
        Some(op_id) => engine.op_job(&args.flow, op_id)?,
        None => engine.flow_job(&args.flow)?,
    };
    tracing::info!(
        target: TRACING_TARGET_COMMAND,
        job_id = %job.id(),
        flow = %args.flow,
        op_id = args.op_id.as_deref(),
        debug = options.is_debug(),
        "Running job"
    );
    Ok(job.run(&options).await?)
}

/// Prints the flow names of the project, one per line.
pub fn list(cli: &Cli) -> anyhow::Result<()> {
    let project = FsProject::open(&cli.project.project_dir)?;
    for name in project.flow_names() {
        println!("{name}");
    }
    Ok(())
}

/// Writes a project skeleton.
pub fn init(args: &InitArgs) -> anyhow::Result<()> {
    let manifest = rill_project::scaffold(&args.dir, args.name.as_deref())?;
    println!("Created project '{}' in {}", manifest.name, args.dir.display());
    Ok(())
}
