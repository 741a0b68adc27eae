//! CLI configuration management.
//!
//! ```text
//! Cli
//! ├── project: ProjectConfig     # Project and environment directories
//! ├── http: HttpClientConfig     # Request timeout, user agent
//! ├── sandbox: SandboxConfig     # Limits of user code
//! └── command: Command           # run | list | init
//! ```
//!
//! All configuration can be provided via CLI arguments or environment variables.
//! Use `--help` to see all available options.

mod command;

use std::path::PathBuf;
use std::process;

use clap::{Args, Parser};
use rill_http::HttpClientConfig;
use rill_runtime::eval::SandboxConfig;

pub use self::command::{Command, InitArgs, RunArgs};
use crate::{TRACING_TARGET_CONFIG, TRACING_TARGET_STARTUP};

/// Location of the project and its runtime environment.
#[derive(Debug, Clone, Args)]
pub struct ProjectConfig {
    /// Project directory holding rill_project.yaml
    #[arg(short = 'p', long = "project-dir", env = "RILL_PROJECT_DIR", default_value = ".", global = true)]
    pub project_dir: PathBuf,

    /// Environment directory for logs and local state
    #[arg(long = "env-dir", env = "RILL_ENV_DIR", global = true)]
    pub env_dir: Option<PathBuf>,
}

/// Complete CLI configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "rill")]
#[command(about = "Declarative data pipelines over HTTP APIs")]
#[command(version)]
pub struct Cli {
    #[clap(flatten)]
    pub project: ProjectConfig,

    /// HTTP client configuration for http_request ops.
    #[clap(flatten)]
    pub http: HttpClientConfig,

    /// Limits applied to sandboxed user code.
    #[clap(flatten)]
    pub sandbox: SandboxConfig,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Loads environment variables from .env file (if enabled) and parses CLI arguments.
    pub fn init() -> Self {
        Self::load_dotenv();
        Self::parse()
    }

    /// Loads environment variables from .env file if the dotenv feature is enabled.
    #[cfg(feature = "dotenv")]
    fn load_dotenv() {
        if let Err(err) = dotenvy::dotenv()
            && !err.not_found()
        {
            eprintln!("Warning: failed to load .env file: {err}");
        }
    }

    /// No-op when dotenv feature is disabled.
    #[cfg(not(feature = "dotenv"))]
    fn load_dotenv() {}

    /// Validates values clap cannot check on its own.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sandbox.max_operations == 0 {
            anyhow::bail!("--sandbox-max-operations must be at least 1");
        }
        if self.sandbox.max_call_levels == 0 {
            anyhow::bail!("--sandbox-max-call-levels must be at least 1");
        }
        if self.http.http_timeout == 0 {
            anyhow::bail!("--http-timeout must be at least 1");
        }
        Ok(())
    }

    /// Logs build information and configuration.
    pub fn log(&self) {
        tracing::debug!(
            target: TRACING_TARGET_STARTUP,
            version = env!("CARGO_PKG_VERSION"),
            pid = process::id(),
            arch = std::env::consts::ARCH,
            os = std::env::consts::OS,
            features = ?Self::enabled_features(),
            "Build information"
        );

        tracing::debug!(
            target: TRACING_TARGET_CONFIG,
            project_dir = %self.project.project_dir.display(),
            env_dir = ?self.project.env_dir,
            http_timeout_secs = self.http.http_timeout,
            user_agent = %self.http.effective_user_agent(),
            sandbox_max_operations = self.sandbox.max_operations,
            sandbox_max_call_levels = self.sandbox.max_call_levels,
            "Configuration"
        );
    }

    /// Returns a list of enabled compile-time features.
    fn enabled_features() -> Vec<&'static str> {
        [cfg!(feature = "dotenv").then_some("dotenv")]
            .into_iter()
            .flatten()
            .collect()
    }
}
