//! Per-run log file setup.
//!
//! Each run writes to its own `orchestration-<Y>-<M>-<D>-<h>-<m>-<s>.log`
//! under the configured directory. `RUST_LOG` takes precedence over the
//! configured level when it is set.

use crate::{loader::error::ConfigError, models::LoggingConfig};

use chrono::{Datelike, Local, NaiveDateTime, Timelike};
use std::{
    fs::{self, OpenOptions},
    path::PathBuf,
    sync::Mutex,
};
use tracing_subscriber::{
    EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Verbosity accepted by the `[Logging] loglevel` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// `DEBUG`
    Debug,
    /// `INFO`
    Info,
    /// `WARNING`, also accepted as `WARN`.
    Warning,
    /// `ERROR`
    Error,
    /// `CRITICAL`; written at error level.
    Critical,
}

impl LogLevel {
    /// Case-insensitive level name.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Some(Self::Debug),
            "INFO" => Some(Self::Info),
            "WARNING" | "WARN" => Some(Self::Warning),
            "ERROR" => Some(Self::Error),
            "CRITICAL" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Directive understood by [`EnvFilter`].
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            // tracing has no level above error
            Self::Error | Self::Critical => "error",
        }
    }
}

/// Name of the log file for a run started at `started`.
pub fn log_file_name(started: NaiveDateTime) -> String {
    format!(
        "orchestration-{}-{}-{}-{}-{}-{}.log",
        started.year(),
        started.month(),
        started.day(),
        started.hour(),
        started.minute(),
        started.second()
    )
}

/// Expand `$VAR`, `${VAR}` and `%VAR%` references using `lookup`.
///
/// Unknown variables are left untouched.
pub fn expand_vars_with<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find(['$', '%']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        let (name, consumed) = if let Some(braced) = tail.strip_prefix("${") {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 3),
                None => ("", 0),
            }
        } else if let Some(percent) = tail.strip_prefix('%') {
            match percent.find('%') {
                Some(end) => (&percent[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let body = &tail[1..];
            let end = body
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(body.len());
            (&body[..end], end + 1)
        };

        match (consumed, lookup(name)) {
            (n, Some(value)) if n > 0 && !name.is_empty() => {
                out.push_str(&value);
                rest = &tail[n..];
            }
            _ => {
                out.push_str(&tail[..1]);
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

fn expand_env_vars(input: &str) -> String {
    expand_vars_with(input, |name| std::env::var(name).ok())
}

/// Create the log directory and the file for this run.
pub fn prepare_log_file(
    config: &LoggingConfig,
    started: NaiveDateTime,
) -> Result<(PathBuf, fs::File), ConfigError> {
    let dir = PathBuf::from(expand_env_vars(&config.log_path.to_string_lossy()));
    fs::create_dir_all(&dir).map_err(|source| ConfigError::LogDirectory {
        path: dir.clone(),
        source,
    })?;

    let path = dir.join(log_file_name(started));
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|source| ConfigError::LogFile {
            path: path.clone(),
            source,
        })?;
    Ok((path, file))
}

fn env_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_directive()))
}

/// Install the global subscriber writing to this run's log file.
///
/// With `mirror_stdout` the same events are also printed to stdout.
/// Returns the path of the log file.
pub fn init_logging(
    config: &LoggingConfig,
    mirror_stdout: bool,
) -> Result<PathBuf, ConfigError> {
    let (path, file) = prepare_log_file(config, Local::now().naive_local())?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(file))
        .with_filter(env_filter(config.log_level));
    let stdout_layer = mirror_stdout.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_filter(env_filter(config.log_level))
    });

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(|_| ConfigError::SubscriberAlreadySet)?;

    tracing::info!(log_file = %path.display(), "logging started");
    Ok(path)
}
