//! Shared logging utilities for BrandBrain binaries.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str =
    "brandbrain_worker=info,brandbrain_compile=info,brandbrain_db=info,brandbrain_api=info,brandbrain_apify=info";

/// Logging configuration shared by BrandBrain binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
    /// Also write to a file under `$BRANDBRAIN_HOME/logs`.
    pub log_to_file: bool,
}

/// Initialize tracing with stderr output and an optional daily-rolling
/// file writer. The returned guard must be held for the process lifetime
/// or buffered file output is lost.
pub fn init_logging(config: LogConfig<'_>) -> Result<Option<WorkerGuard>> {
    let base_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.verbose {
        EnvFilter::new("debug")
    } else {
        base_filter
    };

    let registry = tracing_subscriber::registry().with(
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(console_filter),
    );

    if config.log_to_file {
        let log_dir = ensure_logs_dir().context("Failed to ensure log directory")?;
        let appender =
            tracing_appender::rolling::daily(log_dir, format!("{}.log", config.app_name));
        let (writer, guard) = tracing_appender::non_blocking(appender);
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(EnvFilter::new(DEFAULT_LOG_FILTER)),
            )
            .init();
        Ok(Some(guard))
    } else {
        registry.init();
        Ok(None)
    }
}

/// The BrandBrain home directory: `$BRANDBRAIN_HOME` or `~/.brandbrain`.
pub fn brandbrain_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("BRANDBRAIN_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".brandbrain")
}

/// The logs directory: `<home>/logs`.
pub fn logs_dir() -> PathBuf {
    brandbrain_home().join("logs")
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}
