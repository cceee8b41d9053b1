//! Configuration and logging setup errors.

use std::path::PathBuf;
use thiserror::Error;

/// Everything that can stop a run before the first network call.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}")]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Not valid INI, or a required section is absent.
    #[error("failed to parse config file {path}")]
    Parse {
        /// File that was being parsed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: config::ConfigError,
    },
    /// A required key is absent or blank.
    #[error("missing required key '{key}' in section [{section}]")]
    MissingKey {
        /// INI section name.
        section: &'static str,
        /// Key within the section.
        key: &'static str,
    },
    /// A key is present but its value is out of range or unknown.
    #[error("invalid value for [{section}] {key}: {reason}")]
    InvalidValue {
        /// INI section name.
        section: &'static str,
        /// Key within the section.
        key: &'static str,
        /// What was expected.
        reason: String,
    },
    /// A server address cannot be parsed as a URL.
    #[error("invalid URL for [{section}] {key}")]
    InvalidUrl {
        /// INI section name.
        section: &'static str,
        /// Key within the section.
        key: &'static str,
        /// Underlying error.
        #[source]
        source: url::ParseError,
    },
    /// The log directory could not be created.
    #[error("failed to create log directory {path}")]
    LogDirectory {
        /// Directory that was being created.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The per-run log file could not be opened.
    #[error("failed to open log file {path}")]
    LogFile {
        /// File that was being opened.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Logging was already initialised in this process.
    #[error("a global tracing subscriber is already installed")]
    SubscriberAlreadySet,
}
