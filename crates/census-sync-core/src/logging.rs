//! File logging bootstrap.
//!
//! # Invariants
//! - Logging is initialized at most once per process.
//! - Repeating initialization with the same level and directory is a no-op.
//! - Re-initialization with a different level or directory is rejected.
//!
//! Log lines are `key=value` events, e.g.
//! `event=record_save module=store status=ok namespace=production date=2025-03-01`.
//! Record contents (patient names, notes) are never logged.

use std::path::{Path, PathBuf};

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::info;
use once_cell::sync::OnceCell;
use thiserror::Error;

use crate::config::LoggingConfig;

const LOG_FILE_BASENAME: &str = "census-sync";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;

static LOGGING_STATE: OnceCell<LoggingState> = OnceCell::new();

struct LoggingState {
    level: &'static str,
    log_dir: PathBuf,
    _logger: LoggerHandle,
}

/// Logging setup errors.
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("unsupported log level `{0}`; expected trace|debug|info|warn|error")]
    Level(String),

    #[error("log directory must be an absolute path, got `{0}`")]
    RelativeDir(String),

    #[error("failed to create log directory `{path}`: {source}")]
    CreateDir {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to start logger: {0}")]
    Backend(String),

    #[error("logging already initialized with {field} `{active}`; refusing to switch to `{requested}`")]
    Conflict {
        field: &'static str,
        active: String,
        requested: String,
    },
}

/// Start rotating file logs in `log_dir` at `level`.
pub fn init_logging(level: &str, log_dir: &Path) -> Result<(), LoggingError> {
    let level = normalize_level(level)?;
    if !log_dir.is_absolute() {
        return Err(LoggingError::RelativeDir(log_dir.display().to_string()));
    }

    let state = LOGGING_STATE.get_or_try_init(|| -> Result<LoggingState, LoggingError> {
        std::fs::create_dir_all(log_dir).map_err(|source| LoggingError::CreateDir {
            path: log_dir.display().to_string(),
            source,
        })?;

        let logger = Logger::try_with_str(level)
            .map_err(|e| LoggingError::Backend(e.to_string()))?
            .log_to_file(
                FileSpec::default()
                    .directory(log_dir)
                    .basename(LOG_FILE_BASENAME),
            )
            .rotate(
                Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
                Naming::Numbers,
                Cleanup::KeepLogFiles(MAX_LOG_FILES),
            )
            .write_mode(WriteMode::BufferAndFlush)
            .append()
            .format_for_files(flexi_logger::detailed_format)
            .start()
            .map_err(|e| LoggingError::Backend(e.to_string()))?;

        info!(
            "event=logging_init module=logging status=ok level={} log_dir={} version={}",
            level,
            log_dir.display(),
            env!("CARGO_PKG_VERSION")
        );

        Ok(LoggingState {
            level,
            log_dir: log_dir.to_path_buf(),
            _logger: logger,
        })
    })?;

    if state.log_dir != log_dir {
        return Err(LoggingError::Conflict {
            field: "directory",
            active: state.log_dir.display().to_string(),
            requested: log_dir.display().to_string(),
        });
    }
    if state.level != level {
        return Err(LoggingError::Conflict {
            field: "level",
            active: state.level.to_string(),
            requested: level.to_string(),
        });
    }
    Ok(())
}

/// Initialize logging from configuration.
///
/// Returns false, doing nothing, when no log directory is configured.
pub fn init_from_config(config: &LoggingConfig) -> Result<bool, LoggingError> {
    match &config.dir {
        Some(dir) => init_logging(&config.level, dir).map(|_| true),
        None => Ok(false),
    }
}

/// Active `(level, directory)`, if logging has been initialized.
pub fn logging_status() -> Option<(&'static str, PathBuf)> {
    LOGGING_STATE
        .get()
        .map(|state| (state.level, state.log_dir.clone()))
}

pub(crate) fn normalize_level(level: &str) -> Result<&'static str, LoggingError> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        other => Err(LoggingError::Level(other.to_string())),
    }
}
