//! Immutable configuration handed to the rest of the program.

use crate::logging::LogLevel;

use std::{fmt, path::PathBuf, time::Duration};
use url::Url;

/// Validated configuration for one rollout run.
///
/// Built once by [`crate::ConfigLoader`] and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    /// `[Server]`
    pub server: ServerConfig,
    /// `[Configuration]`
    pub workflow: WorkflowConfig,
    /// `[Logging]`
    pub logging: LoggingConfig,
    /// `[Polling]`, defaulted when the section is absent.
    pub polling: PollingConfig,
    /// Present only when `[Server] vcenter_server` is set.
    pub vcenter: Option<VCenterConfig>,
}

/// Connection settings for the patch management server (`[Server]`).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Root URL of the console, e.g. `https://patch.example.com:3121`.
    pub url: Url,
    /// PEM bundle trusted in addition to the system roots.
    pub ca_cert_path: Option<PathBuf>,
    /// Sent as an HTTP basic `Authorization` header on every request.
    pub basic_auth: Option<BasicAuth>,
    /// Skip certificate verification entirely. Test consoles only.
    pub accept_invalid_certs: bool,
}

/// Username and password for HTTP basic authentication.
///
/// `Debug` redacts the password.
#[derive(Clone)]
pub struct BasicAuth {
    /// Account name; `DOMAIN\user` names are passed through as is.
    pub username: String,
    /// Never logged.
    pub password: String,
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Names of the server-side resources the workflow operates on
/// (`[Configuration]`), plus the optional pipeline switches.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Name of the credential scans and deployments run as.
    pub run_as_credentials: String,
    /// Name of the patch scan template.
    pub scan_template: String,
    /// Name of the deployment template.
    pub deployment_template: String,
    /// Machine group patched and shut down first.
    pub machine_group_server: String,
    /// Machine group patched and rebooted second.
    pub machine_group_database: String,
    /// How machines are shut down or rebooted.
    pub remote_control: RemoteControlKind,
    /// Power the server VMs back on through vCenter after the database ring.
    pub power_on_servers: bool,
    /// TCP port probed on database machines before the power-on stage.
    pub sql_probe_port: u16,
    /// When set, a session credential is registered with this password for
    /// the run and removed afterwards.
    pub session_credential_password: Option<String>,
}

/// Transport used to shut down or reboot patched machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemoteControlKind {
    /// `shutdown.exe /m \\host`
    #[default]
    Windows,
    /// `ssh host sudo shutdown`
    Ssh,
}

impl RemoteControlKind {
    /// Case-insensitive `windows` or `ssh`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "windows" => Some(Self::Windows),
            "ssh" => Some(Self::Ssh),
            _ => None,
        }
    }
}

/// Where and how verbosely the per-run log file is written (`[Logging]`).
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory that receives one log file per run.
    pub log_path: PathBuf,
    /// Minimum level written; `RUST_LOG` overrides it.
    pub log_level: LogLevel,
}

/// Cap on a growing poll interval when `max_interval_secs` is not given.
pub const DEFAULT_MAX_BACKOFF_INTERVAL: Duration = Duration::from_secs(3600);

/// Optional hardening of the status polling loops (`[Polling]`).
///
/// The defaults keep polling forever at a fixed interval and treat a
/// remote `Failed` status like any other non-terminal status.
#[derive(Debug, Clone, PartialEq)]
pub struct PollingConfig {
    /// Give up after this many polls. `None` polls forever.
    pub max_attempts: Option<u32>,
    /// Multiplier applied to the interval after each poll, at least 1.0.
    pub backoff_factor: f64,
    /// Upper bound on a grown interval. Defaulted to
    /// [`DEFAULT_MAX_BACKOFF_INTERVAL`] when backoff is enabled.
    pub max_interval: Option<Duration>,
    /// Treat a remote `Failed` status as terminal.
    pub stop_on_failure: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_factor: 1.0,
            max_interval: None,
            stop_on_failure: false,
        }
    }
}

/// vCenter endpoint used by the optional power-on stage.
#[derive(Debug, Clone)]
pub struct VCenterConfig {
    /// Root URL of the vCenter server.
    pub url: Url,
    /// Credentials for the REST session login.
    pub credentials: BasicAuth,
}
