//! Log output setup for the node binary.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Install the global `fmt` subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise from `log_level`.
/// With a `log_file`, output goes through a non-blocking file writer whose
/// guard must be held until exit so buffered lines are flushed.
pub fn init_logging(log_level: &str, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let builder = tracing_subscriber::fmt();

    let Some(log_file) = log_file else {
        builder
            .with_env_filter(filter())
            .try_init()
            .map_err(|e| anyhow!("Failed to install subscriber: {e}"))?;
        return Ok(None);
    };

    let (directory, file_name) = split_log_path(log_file)?;
    fs::create_dir_all(&directory)
        .with_context(|| format!("Failed to create log directory: {}", directory.display()))?;

    let file_appender = tracing_appender::rolling::never(directory, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    builder
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true)
        .with_env_filter(filter())
        .try_init()
        .map_err(|e| anyhow!("Failed to install subscriber: {e}"))?;
    Ok(Some(guard))
}

fn split_log_path(log_file: &Path) -> Result<(PathBuf, String)> {
    let file_name = log_file
        .file_name()
        .ok_or_else(|| anyhow!("Invalid log file name: {}", log_file.display()))?
        .to_string_lossy()
        .to_string();
    let directory = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();
    Ok((directory, file_name))
}
