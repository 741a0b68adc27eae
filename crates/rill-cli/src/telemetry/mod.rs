//! Tracing initialization.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Directory under the environment directory holding log files.
const LOG_DIR: &str = "logs";
const LOG_FILE: &str = "rill.log";

/// Initializes the tracing subscriber.
///
/// Logs go to stderr and, when `env_dir` is given, also to
/// `<env_dir>/logs/rill.log` without ANSI colors. The level is read from
/// `RUST_LOG` and defaults to `info`.
///
/// ```bash
/// RUST_LOG=debug rill run main
/// RUST_LOG=rill_http=trace rill run main
/// ```
pub fn init_tracing(env_dir: Option<&Path>) -> anyhow::Result<()> {
    let env_filter = create_env_filter()?;
    let file_layer = env_dir
        .map(open_log_file)
        .transpose()?
        .map(|file| fmt::layer().with_ansi(false).with_target(true).with_writer(Mutex::new(file)));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    Ok(())
}

/// Creates an environment filter for tracing.
fn create_env_filter() -> anyhow::Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {e}"))
}

fn open_log_file(env_dir: &Path) -> anyhow::Result<File> {
    let dir = env_dir.join(LOG_DIR);
    std::fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(LOG_FILE);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_is_created_under_env_dir() {
        let dir = tempfile::tempdir().unwrap();
        open_log_file(dir.path()).unwrap();
        assert!(dir.path().join("logs").join("rill.log").exists());
    }
}
