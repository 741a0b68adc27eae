//! Subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};
use rill_runtime::op::PreviewMode;

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run a flow, or a single op of it
    Run(RunArgs),
    /// List the flows of the project
    List,
    /// Create a project skeleton
    Init(InitArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Name of the flow to run
    pub flow: String,

    /// Run only the op with this id
    #[arg(long = "op-id")]
    pub op_id: Option<String>,

    /// Send one request of the op and log it instead of running it
    #[arg(long = "op-mode", requires = "op_id")]
    pub op_mode: Option<PreviewMode>,

    /// JSON object bound to the op's for_each variable instead of scanning
    #[arg(long = "foreach-record", requires = "op_id")]
    pub foreach_record: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct InitArgs {
    /// Directory to create the project in
    pub dir: PathBuf,

    /// Project name, defaults to the directory name
    #[arg(long)]
    pub name: Option<String>,
}
