//! INI loader for the rollout configuration.
//!
//! The file has three required sections (`[Server]`, `[Configuration]`,
//! `[Logging]`) and an optional `[Polling]` section. Every key is read as a
//! string and validated here so that a bad value fails before any network
//! call is made.

pub mod error;

use crate::{
    logging::LogLevel,
    models::{
        BasicAuth, Config, DEFAULT_MAX_BACKOFF_INTERVAL, LoggingConfig,
        PollingConfig, RemoteControlKind, ServerConfig, VCenterConfig,
        WorkflowConfig,
    },
};

use config::{File, FileFormat};
use error::ConfigError;
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use url::Url;

/// Default port probed on database machines before servers are powered on.
pub const DEFAULT_SQL_PROBE_PORT: u16 = 1434;

const SERVER: &str = "Server";
const CONFIGURATION: &str = "Configuration";
const LOGGING: &str = "Logging";
const POLLING: &str = "Polling";

/// Loads a [`Config`] from an INI file on disk.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    path: PathBuf,
}

impl ConfigLoader {
    /// Loader for the file at `path`. Nothing is read until [`Self::load`].
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the configuration file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and validate the file.
    pub fn load(&self) -> Result<Config, ConfigError> {
        let contents =
            fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
                path: self.path.clone(),
                source,
            })?;
        parse_ini(&contents, &self.path)
    }

    /// Parse configuration from INI text instead of a file.
    pub fn from_ini_str(contents: &str) -> Result<Config, ConfigError> {
        parse_ini(contents, Path::new("<inline>"))
    }
}

/// Values are taken literally: a backslash is never an escape character,
/// so `C:\certs\ca.pem` and `CORP\svc-patch` survive intact.
fn escape_backslashes(contents: &str) -> String {
    contents.replace('\\', "\\\\")
}

fn parse_ini(contents: &str, path: &Path) -> Result<Config, ConfigError> {
    let literal = escape_backslashes(contents);
    config::Config::builder()
        .add_source(File::from_str(&literal, FileFormat::Ini))
        .build()
        .and_then(|cfg| cfg.try_deserialize::<RawConfig>())
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?
        .into_config()
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(rename = "Server", alias = "server")]
    server: RawServer,
    #[serde(rename = "Configuration", alias = "configuration")]
    configuration: RawWorkflow,
    #[serde(rename = "Logging", alias = "logging")]
    logging: RawLogging,
    #[serde(rename = "Polling", alias = "polling", default)]
    polling: RawPolling,
}

#[derive(Debug, Default, Deserialize)]
struct RawServer {
    server: Option<String>,
    path_to_cert: Option<String>,
    username: Option<String>,
    password: Option<String>,
    accept_invalid_certs: Option<String>,
    vcenter_server: Option<String>,
    vcenter_username: Option<String>,
    vcenter_password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawWorkflow {
    run_as_credentials: Option<String>,
    scan_template: Option<String>,
    deployment_template: Option<String>,
    machine_group_server: Option<String>,
    machine_group_database: Option<String>,
    remote_control: Option<String>,
    power_on_servers: Option<String>,
    sql_probe_port: Option<String>,
    session_credential_password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLogging {
    logpath: Option<String>,
    loglevel: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPolling {
    max_attempts: Option<String>,
    backoff_factor: Option<String>,
    max_interval_secs: Option<String>,
    stop_on_failure: Option<String>,
}

impl RawConfig {
    fn into_config(self) -> Result<Config, ConfigError> {
        let server = self.server.validate_server()?;
        let vcenter = self.server.validate_vcenter()?;
        let workflow = self.configuration.validate()?;
        if workflow.power_on_servers && vcenter.is_none() {
            return Err(ConfigError::MissingKey {
                section: SERVER,
                key: "vcenter_server",
            });
        }

        Ok(Config {
            server,
            workflow,
            logging: self.logging.validate()?,
            polling: self.polling.validate()?,
            vcenter,
        })
    }
}

impl RawServer {
    fn validate_server(&self) -> Result<ServerConfig, ConfigError> {
        let url = parse_url(
            SERVER,
            "server",
            &required(SERVER, "server", &self.server)?,
        )?;
        let basic_auth = match (optional(&self.username), optional(&self.password))
        {
            (Some(username), Some(password)) => {
                Some(BasicAuth { username, password })
            }
            (None, None) => None,
            (Some(_), None) => {
                return Err(ConfigError::MissingKey {
                    section: SERVER,
                    key: "password",
                });
            }
            (None, Some(_)) => {
                return Err(ConfigError::MissingKey {
                    section: SERVER,
                    key: "username",
                });
            }
        };

        Ok(ServerConfig {
            url,
            ca_cert_path: optional(&self.path_to_cert).map(PathBuf::from),
            basic_auth,
            accept_invalid_certs: parse_bool(
                SERVER,
                "accept_invalid_certs",
                &self.accept_invalid_certs,
            )?
            .unwrap_or(false),
        })
    }

    fn validate_vcenter(&self) -> Result<Option<VCenterConfig>, ConfigError> {
        let Some(raw_url) = optional(&self.vcenter_server) else {
            return Ok(None);
        };
        let url = parse_url(SERVER, "vcenter_server", &raw_url)?;
        let credentials = BasicAuth {
            username: required(
                SERVER,
                "vcenter_username",
                &self.vcenter_username,
            )?,
            password: required(
                SERVER,
                "vcenter_password",
                &self.vcenter_password,
            )?,
        };
        Ok(Some(VCenterConfig { url, credentials }))
    }
}

impl RawWorkflow {
    fn validate(self) -> Result<WorkflowConfig, ConfigError> {
        let remote_control = match optional(&self.remote_control) {
            None => RemoteControlKind::default(),
            Some(raw) => RemoteControlKind::parse(&raw).ok_or_else(|| {
                ConfigError::InvalidValue {
                    section: CONFIGURATION,
                    key: "remote_control",
                    reason: format!("expected 'windows' or 'ssh', got '{raw}'"),
                }
            })?,
        };

        Ok(WorkflowConfig {
            run_as_credentials: required(
                CONFIGURATION,
                "run_as_credentials",
                &self.run_as_credentials,
            )?,
            scan_template: required(
                CONFIGURATION,
                "scan_template",
                &self.scan_template,
            )?,
            deployment_template: required(
                CONFIGURATION,
                "deployment_template",
                &self.deployment_template,
            )?,
            machine_group_server: required(
                CONFIGURATION,
                "machine_group_server",
                &self.machine_group_server,
            )?,
            machine_group_database: required(
                CONFIGURATION,
                "machine_group_database",
                &self.machine_group_database,
            )?,
            remote_control,
            power_on_servers: parse_bool(
                CONFIGURATION,
                "power_on_servers",
                &self.power_on_servers,
            )?
            .unwrap_or(false),
            sql_probe_port: parse_number(
                CONFIGURATION,
                "sql_probe_port",
                &self.sql_probe_port,
            )?
            .unwrap_or(DEFAULT_SQL_PROBE_PORT),
            session_credential_password: optional(
                &self.session_credential_password,
            ),
        })
    }
}

impl RawLogging {
    fn validate(self) -> Result<LoggingConfig, ConfigError> {
        let raw_level = required(LOGGING, "loglevel", &self.loglevel)?;
        let log_level = LogLevel::parse(&raw_level).ok_or_else(|| {
            ConfigError::InvalidValue {
                section: LOGGING,
                key: "loglevel",
                reason: format!(
                    "expected DEBUG, INFO, WARNING, ERROR or CRITICAL, got '{raw_level}'"
                ),
            }
        })?;

        Ok(LoggingConfig {
            log_path: PathBuf::from(required(LOGGING, "logpath", &self.logpath)?),
            log_level,
        })
    }
}

impl RawPolling {
    fn validate(self) -> Result<PollingConfig, ConfigError> {
        let defaults = PollingConfig::default();

        let max_attempts: Option<u32> =
            parse_number(POLLING, "max_attempts", &self.max_attempts)?;
        if max_attempts == Some(0) {
            return Err(ConfigError::InvalidValue {
                section: POLLING,
                key: "max_attempts",
                reason: "must be at least 1".into(),
            });
        }

        let backoff_factor: f64 =
            parse_number(POLLING, "backoff_factor", &self.backoff_factor)?
                .unwrap_or(defaults.backoff_factor);
        if !backoff_factor.is_finite() || backoff_factor < 1.0 {
            return Err(ConfigError::InvalidValue {
                section: POLLING,
                key: "backoff_factor",
                reason: format!("must be a number >= 1.0, got {backoff_factor}"),
            });
        }

        let max_interval = parse_number::<u64>(
            POLLING,
            "max_interval_secs",
            &self.max_interval_secs,
        )?
        .map(Duration::from_secs)
        .or((backoff_factor > 1.0).then_some(DEFAULT_MAX_BACKOFF_INTERVAL));

        Ok(PollingConfig {
            max_attempts,
            backoff_factor,
            max_interval,
            stop_on_failure: parse_bool(
                POLLING,
                "stop_on_failure",
                &self.stop_on_failure,
            )?
            .unwrap_or(defaults.stop_on_failure),
        })
    }
}

fn optional(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn required(
    section: &'static str,
    key: &'static str,
    value: &Option<String>,
) -> Result<String, ConfigError> {
    optional(value).ok_or(ConfigError::MissingKey { section, key })
}

fn parse_bool(
    section: &'static str,
    key: &'static str,
    value: &Option<String>,
) -> Result<Option<bool>, ConfigError> {
    let Some(raw) = optional(value) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(Some(true)),
        "false" | "no" | "off" | "0" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidValue {
            section,
            key,
            reason: format!("expected a boolean, got '{raw}'"),
        }),
    }
}

fn parse_number<T>(
    section: &'static str,
    key: &'static str,
    value: &Option<String>,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    optional(value)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                section,
                key,
                reason: format!("'{raw}': {e}"),
            })
        })
        .transpose()
}

/// Parse a server URL, assuming `https://` when the scheme is left out.
fn parse_url(
    section: &'static str,
    key: &'static str,
    raw: &str,
) -> Result<Url, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let with_scheme = if trimmed.starts_with("http://")
        || trimmed.starts_with("https://")
    {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    Url::parse(&with_scheme).map_err(|source| ConfigError::InvalidUrl {
        section,
        key,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "\
[Server]
server = https://patch.example.com:3121
vcenter_username =
vcenter_password =
path_to_cert = /etc/ssl/patch-ca.pem

[Configuration]
run_as_credentials = svc-patch
scan_template = Security Patch Scan
deployment_template = Reboot When Done
machine_group_server = ServerRing
machine_group_database = DatabaseRing

[Logging]
logpath = /var/log/patchring
loglevel = INFO
";

    #[test]
    fn loads_reference_layout() {
        let config = ConfigLoader::from_ini_str(MINIMAL).expect("valid config");

        assert_eq!(
            config.server.url.as_str(),
            "https://patch.example.com:3121/"
        );
        assert_eq!(
            config.server.ca_cert_path.as_deref(),
            Some(Path::new("/etc/ssl/patch-ca.pem"))
        );
        assert!(config.server.basic_auth.is_none());
        assert_eq!(config.workflow.scan_template, "Security Patch Scan");
        assert_eq!(config.workflow.machine_group_database, "DatabaseRing");
        assert_eq!(config.workflow.remote_control, RemoteControlKind::Windows);
        assert_eq!(config.workflow.sql_probe_port, DEFAULT_SQL_PROBE_PORT);
        assert!(!config.workflow.power_on_servers);
        assert_eq!(config.logging.log_level, LogLevel::Info);
        assert_eq!(config.polling, PollingConfig::default());
        assert!(config.vcenter.is_none());
    }

    #[test]
    fn missing_required_key_is_reported_by_name() {
        let broken = MINIMAL.replace("scan_template = Security Patch Scan\n", "");
        let err = ConfigLoader::from_ini_str(&broken).unwrap_err();
        assert!(
            matches!(
                err,
                ConfigError::MissingKey {
                    section: "Configuration",
                    key: "scan_template"
                }
            ),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        let broken = MINIMAL.replace("loglevel = INFO", "loglevel = CHATTY");
        let err = ConfigLoader::from_ini_str(&broken).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "loglevel", .. }));
    }

    #[test]
    fn server_without_scheme_defaults_to_https() {
        let cfg = MINIMAL.replace(
            "server = https://patch.example.com:3121",
            "server = patch.example.com:3121",
        );
        let config = ConfigLoader::from_ini_str(&cfg).unwrap();
        assert_eq!(config.server.url.scheme(), "https");
        assert_eq!(config.server.url.port(), Some(3121));
    }

    #[test]
    fn power_on_requires_vcenter_endpoint() {
        let cfg = MINIMAL.replace(
            "machine_group_database = DatabaseRing",
            "machine_group_database = DatabaseRing\npower_on_servers = true",
        );
        let err = ConfigLoader::from_ini_str(&cfg).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingKey {
                key: "vcenter_server",
                ..
            }
        ));

        let with_vcenter = cfg
            .replace(
                "vcenter_username =",
                "vcenter_server = https://vcenter.example.com\nvcenter_username = administrator@vsphere.local",
            )
            .replace("vcenter_password =", "vcenter_password = hunter2");
        let config = ConfigLoader::from_ini_str(&with_vcenter).unwrap();
        let vcenter = config.vcenter.expect("vcenter configured");
        assert_eq!(vcenter.url.host_str(), Some("vcenter.example.com"));
        assert_eq!(vcenter.credentials.username, "administrator@vsphere.local");
        assert!(config.workflow.power_on_servers);
    }

    #[test]
    fn polling_section_hardens_defaults() {
        let cfg = format!(
            "{MINIMAL}\n[Polling]\nmax_attempts = 120\nbackoff_factor = 2\nmax_interval_secs = 300\nstop_on_failure = yes\n"
        );
        let config = ConfigLoader::from_ini_str(&cfg).unwrap();
        assert_eq!(config.polling.max_attempts, Some(120));
        assert_eq!(config.polling.backoff_factor, 2.0);
        assert_eq!(config.polling.max_interval, Some(Duration::from_secs(300)));
        assert!(config.polling.stop_on_failure);
    }

    #[test]
    fn growing_backoff_without_cap_gets_default_cap() {
        let cfg = format!("{MINIMAL}\n[Polling]\nbackoff_factor = 1.5\n");
        let config = ConfigLoader::from_ini_str(&cfg).unwrap();
        assert_eq!(
            config.polling.max_interval,
            Some(DEFAULT_MAX_BACKOFF_INTERVAL)
        );

        let fixed = format!("{MINIMAL}\n[Polling]\nmax_attempts = 10\n");
        let config = ConfigLoader::from_ini_str(&fixed).unwrap();
        assert_eq!(config.polling.max_interval, None);
    }

    #[test]
    fn backslashes_are_kept_verbatim() {
        let cfg = MINIMAL
            .replace(
                "path_to_cert = /etc/ssl/patch-ca.pem",
                "path_to_cert = C:\\certs\\console-ca.pem\nusername = CORP\\svc-patch\npassword = pa\\ss",
            )
            .replace(
                "run_as_credentials = svc-patch",
                "run_as_credentials = CORP\\svc-patch",
            )
            .replace(
                "logpath = /var/log/patchring",
                "logpath = C:\\patchring\\logs",
            );
        let config = ConfigLoader::from_ini_str(&cfg).unwrap();

        assert_eq!(
            config.server.ca_cert_path.as_deref(),
            Some(Path::new(r"C:\certs\console-ca.pem"))
        );
        assert_eq!(config.workflow.run_as_credentials, r"CORP\svc-patch");
        let auth = config.server.basic_auth.expect("basic auth");
        assert_eq!(auth.username, r"CORP\svc-patch");
        assert_eq!(auth.password, r"pa\ss");
        assert_eq!(config.logging.log_path, PathBuf::from(r"C:\patchring\logs"));
    }

    #[test]
    fn unparseable_server_url_is_rejected() {
        let cfg = MINIMAL.replace(
            "server = https://patch.example.com:3121",
            "server = patch example.com",
        );
        let err = ConfigLoader::from_ini_str(&cfg).unwrap_err();
        assert!(
            matches!(
                err,
                ConfigError::InvalidUrl {
                    section: "Server",
                    key: "server",
                    ..
                }
            ),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn polling_rejects_shrinking_backoff() {
        let cfg = format!("{MINIMAL}\n[Polling]\nbackoff_factor = 0.5\n");
        let err = ConfigLoader::from_ini_str(&cfg).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "backoff_factor",
                ..
            }
        ));
    }

    #[test]
    fn ssh_transport_and_basic_auth() {
        let cfg = MINIMAL
            .replace(
                "path_to_cert = /etc/ssl/patch-ca.pem",
                "path_to_cert =\nusername = patcher\npassword = s3cret",
            )
            .replace(
                "machine_group_database = DatabaseRing",
                "machine_group_database = DatabaseRing\nremote_control = SSH",
            );
        let config = ConfigLoader::from_ini_str(&cfg).unwrap();
        assert!(config.server.ca_cert_path.is_none());
        let auth = config.server.basic_auth.expect("basic auth");
        assert_eq!(auth.username, "patcher");
        assert_eq!(config.workflow.remote_control, RemoteControlKind::Ssh);
        assert!(!format!("{auth:?}").contains("s3cret"));
    }
}
