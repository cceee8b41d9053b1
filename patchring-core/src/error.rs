//! Error types, one enum per layer.

use crate::model::ResourceKind;

use reqwest::{Method, StatusCode};
use std::path::PathBuf;
use thiserror::Error;

/// Failure talking to the console API (or vCenter).
#[derive(Debug, Error)]
pub enum ApiError {
    /// The reqwest client could not be constructed.
    #[error("failed to build HTTP client")]
    ClientBuild(#[source] reqwest::Error),

    /// `path_to_cert` could not be read.
    #[error("failed to read CA certificate {path}")]
    CertificateRead {
        /// Configured certificate path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// `path_to_cert` is not a PEM certificate.
    #[error("invalid CA certificate {path}")]
    CertificateInvalid {
        /// Configured certificate path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// An API path could not be joined onto the API root.
    #[error("invalid endpoint '{path}'")]
    InvalidUrl {
        /// API-relative path.
        path: String,
        /// Underlying error.
        #[source]
        source: url::ParseError,
    },

    /// No response was received.
    #[error("{method} {url} failed")]
    Transport {
        /// Request method.
        method: Method,
        /// Request URL.
        url: String,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// A non-2xx response where success was required.
    #[error("{method} {url} returned {status}")]
    Status {
        /// Request method.
        method: Method,
        /// Request URL.
        url: String,
        /// Status returned.
        status: StatusCode,
        /// Response body, kept for the error report.
        body: String,
    },

    /// A 2xx response whose body or headers lack what was expected.
    #[error("unexpected response from {url}: {reason}")]
    Malformed {
        /// Request URL.
        url: String,
        /// What was missing or unparseable.
        reason: String,
    },
}

/// A configured name could not be mapped to an identifier.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// The listing has no entry with exactly this name.
    #[error("no {kind} named '{name}' was found")]
    NotFound {
        /// Listing that was searched.
        kind: ResourceKind,
        /// Configured name.
        name: String,
    },

    /// The listing request itself failed.
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// A status poll that did not produce a usable snapshot.
///
/// These are retried by the wait loops rather than surfaced.
#[derive(Debug, Error)]
pub enum TransientPollError {
    /// Non-200 status.
    #[error("status poll returned {0}")]
    Status(StatusCode),

    /// 200 with a body that is not an operation snapshot.
    #[error("status poll body could not be parsed: {0}")]
    Body(String),
}

/// A wait loop gave up.
#[derive(Debug, Error)]
pub enum PollError {
    /// A poll could not reach the console at all.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// `[Polling] max_attempts` was reached.
    #[error("{label} did not finish after {attempts} polls")]
    Exhausted {
        /// Name of the wait.
        label: String,
        /// Polls made.
        attempts: u32,
    },

    /// The operation reported `Failed` and `stop_on_failure` is set.
    #[error("{label} reported status Failed")]
    OperationFailed {
        /// Name of the wait.
        label: String,
    },
}

/// A shutdown or reboot command could not be started.
///
/// A command that runs and exits non-zero is not an error.
#[derive(Debug, Error)]
pub enum RemoteControlError {
    /// Spawning the process failed.
    #[error("failed to launch '{program}' for {address}")]
    Launch {
        /// Executable that was spawned.
        program: String,
        /// Target machine.
        address: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// First error that aborted a workflow run.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// A configured name is unknown to the console.
    #[error("failed to resolve configured names")]
    Resolution(#[from] ResolutionError),

    /// Starting an operation or listing machines failed.
    #[error("console API request failed")]
    Api(#[from] ApiError),

    /// A wait gave up.
    #[error("waiting for an operation failed")]
    Poll(#[from] PollError),

    /// A shutdown or reboot could not be launched.
    #[error("remote shutdown failed")]
    RemoteControl(#[from] RemoteControlError),
}
