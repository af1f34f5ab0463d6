//! Logging setup: stdout plus an appended log file.

use std::path::Path;

use thiserror::Error;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::{fmt, prelude::*};

use crate::config::LogFormat;

/// Logging setup errors.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log file path: {0}")]
    InvalidPath(String),
    #[error("Failed to create log directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to open log file: {0}")]
    Appender(String),
    #[error("Failed to initialize tracing: {0}")]
    Init(String),
}

/// Parse a log level name, case-insensitively.
///
/// Accepts the usual `tracing` names plus `WARNING` and `CRITICAL`.
pub fn parse_level(level: &str) -> Option<Level> {
    match level.trim().to_ascii_lowercase().as_str() {
        "warning" => Some(Level::WARN),
        "critical" => Some(Level::ERROR),
        other => other.parse().ok(),
    }
}

/// Parse a log level from the command line, naming the accepted values on
/// failure.
pub fn level_arg(value: &str) -> Result<Level, String> {
    parse_level(value).ok_or_else(|| {
        format!(
            "unknown log level '{value}' \
             (expected TRACE, DEBUG, INFO, WARNING, ERROR or CRITICAL)"
        )
    })
}

/// Initialize tracing for the exporter.
///
/// Events go to stdout and are appended to `log_file`. `RUST_LOG`, when set,
/// takes precedence over `level`. The returned guard must be held until exit
/// so buffered file output is flushed.
pub fn init_tracing(
    level: Level,
    format: LogFormat,
    log_file: &Path,
) -> Result<WorkerGuard, LoggingError> {
    let file_name = log_file
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| LoggingError::InvalidPath(log_file.display().to_string()))?;
    let directory = log_file
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    std::fs::create_dir_all(directory)?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(directory)
        .map_err(|e| LoggingError::Appender(e.to_string()))?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    match format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .with(fmt::layer().with_writer(file_writer).with_ansi(false))
                .try_init()
                .map_err(|e| LoggingError::Init(e.to_string()))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .with(fmt::layer().json().with_writer(file_writer))
                .try_init()
                .map_err(|e| LoggingError::Init(e.to_string()))?;
        }
    }

    Ok(guard)
}
