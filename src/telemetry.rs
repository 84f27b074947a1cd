//! Structured logging to the persisted run log.
//!
//! The log file is truncated at the start of every run and later becomes
//! the body of the failure notification.

use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use once_cell::sync::OnceCell;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

static TELEMETRY_GUARD: OnceCell<Utf8PathBuf> = OnceCell::new();

/// Handle to the installed log sink.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TelemetryHandle {
    log_file: Utf8PathBuf,
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Failed to open or read the log file.
    #[error("log file {path}: {message}")]
    LogFile {
        /// Log file path.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

impl TelemetryHandle {
    /// Path of the log file.
    #[must_use]
    pub fn log_file(&self) -> &Utf8Path {
        &self.log_file
    }

    /// Reads back everything logged so far.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::LogFile`] when the file cannot be read.
    pub fn read_log(&self) -> Result<String, TelemetryError> {
        let (dir, name) = open_parent(&self.log_file)?;
        dir.read_to_string(name)
            .map_err(|err| log_file_error(&self.log_file, &err.to_string()))
    }
}

/// Maps a level name to an `EnvFilter` directive.
///
/// Accepts any case, plus the `warning` and `critical` spellings; other
/// values pass through unchanged as filter directives.
#[must_use]
pub fn log_filter(level: &str) -> String {
    let lowered = level.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "warning" => String::from("warn"),
        "critical" => String::from("error"),
        _ => lowered,
    }
}

/// Installs the global subscriber writing to `log_file`.
///
/// Only the first call installs anything; later calls return a handle to
/// the file chosen by the first.
///
/// # Errors
///
/// Returns [`TelemetryError`] when the filter is invalid, the log file
/// cannot be created, or a subscriber is already installed.
pub fn initialise(
    log_level: &str,
    log_file: &Utf8Path,
) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| {
            install_subscriber(log_level, log_file).map(|()| log_file.to_path_buf())
        })
        .map(|path| TelemetryHandle {
            log_file: path.clone(),
        })
}

fn install_subscriber(log_level: &str, log_file: &Utf8Path) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(log_filter(log_level))
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;

    let (dir, name) = open_parent(log_file)?;
    let file = dir
        .create(name)
        .map_err(|err| log_file_error(log_file, &err.to_string()))?
        .into_std();

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .with_ansi(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_writer(Mutex::new(file))
        .finish();

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}

fn open_parent(path: &Utf8Path) -> Result<(Dir, &str), TelemetryError> {
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return Err(log_file_error(path, "not a file path"));
    };
    let dir_path = if parent.as_str().is_empty() {
        Utf8Path::new(".")
    } else {
        parent
    };
    let dir = Dir::open_ambient_dir(dir_path, ambient_authority())
        .map_err(|err| log_file_error(path, &err.to_string()))?;
    Ok((dir, name))
}

fn log_file_error(path: &Utf8Path, message: &str) -> TelemetryError {
    TelemetryError::LogFile {
        path: path.to_path_buf(),
        message: message.to_owned(),
    }
}
