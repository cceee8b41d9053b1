//! Configuration library for patchring.
//!
//! Reads the INI file that drives a rollout run into an immutable [`Config`]
//! and sets up the per-run log file. Everything downstream receives the
//! config by reference; nothing here is global apart from the tracing
//! subscriber installed by [`logging::init_logging`].

pub mod loader;
pub mod logging;
pub mod models;

pub use loader::{ConfigLoader, error::ConfigError};
pub use logging::{LogLevel, init_logging};
pub use models::{
    BasicAuth, Config, DEFAULT_MAX_BACKOFF_INTERVAL, LoggingConfig,
    PollingConfig, RemoteControlKind, ServerConfig, VCenterConfig,
    WorkflowConfig,
};
