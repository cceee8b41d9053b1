//! Shutdown and reboot of patched machines.
//!
//! The workflow only sees [`RemoteControl`]; which transport is used is a
//! configuration choice ([`RemoteControlKind`]).

use crate::error::RemoteControlError;

use async_trait::async_trait;
use patchring_config::RemoteControlKind;
use std::fmt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Outcome of a shutdown command. The exit code is reported as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteExit {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
}

impl RemoteExit {
    /// Exit code 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for RemoteExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => f.write_str("terminated by signal"),
        }
    }
}

/// Transport that shuts down or reboots one machine.
///
/// Implementations: [`WindowsShutdown`], [`SshShutdown`] and [`DryRun`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteControl: Send + Sync {
    /// Shut down (`reboot == false`) or restart the host at `address`.
    ///
    /// Only a failure to launch the command is an error.
    async fn shutdown(
        &self,
        address: &str,
        reboot: bool,
    ) -> Result<RemoteExit, RemoteControlError>;
}

/// Arguments for `shutdown.exe` against a remote Windows host.
pub fn windows_shutdown_args(address: &str, reboot: bool) -> Vec<String> {
    vec![
        if reboot { "/r" } else { "/s" }.to_string(),
        "/t".to_string(),
        "0".to_string(),
        "/m".to_string(),
        format!(r"\\{address}"),
    ]
}

/// Arguments for `ssh` that halt or reboot `address` through sudo.
pub fn ssh_shutdown_args(address: &str, reboot: bool) -> Vec<String> {
    vec![
        address.to_string(),
        "sudo".to_string(),
        "shutdown".to_string(),
        if reboot { "-r" } else { "-h" }.to_string(),
        "now".to_string(),
    ]
}

async fn run_command(
    program: &str,
    args: &[String],
    address: &str,
) -> Result<RemoteExit, RemoteControlError> {
    info!(program, args = ?args, address, "issuing remote shutdown");
    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| RemoteControlError::Launch {
            program: program.to_string(),
            address: address.to_string(),
            source,
        })?;

    for line in String::from_utf8_lossy(&output.stdout).lines() {
        debug!(address, stream = "stdout", "{line}");
    }
    for line in String::from_utf8_lossy(&output.stderr).lines() {
        debug!(address, stream = "stderr", "{line}");
    }

    let exit = RemoteExit {
        code: output.status.code(),
    };
    if !exit.success() {
        warn!(program, address, %exit, "shutdown command reported failure");
    }
    Ok(exit)
}

/// `shutdown /s|/r /t 0 /m \\host`
#[derive(Debug, Clone)]
pub struct WindowsShutdown {
    program: String,
}

impl Default for WindowsShutdown {
    fn default() -> Self {
        Self {
            program: "shutdown".to_string(),
        }
    }
}

#[async_trait]
impl RemoteControl for WindowsShutdown {
    async fn shutdown(
        &self,
        address: &str,
        reboot: bool,
    ) -> Result<RemoteExit, RemoteControlError> {
        run_command(&self.program, &windows_shutdown_args(address, reboot), address).await
    }
}

/// `ssh host sudo shutdown -h|-r now`
#[derive(Debug, Clone)]
pub struct SshShutdown {
    program: String,
}

impl SshShutdown {
    /// Use a different ssh binary, e.g. an absolute path.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for SshShutdown {
    fn default() -> Self {
        Self::with_program("ssh")
    }
}

#[async_trait]
impl RemoteControl for SshShutdown {
    async fn shutdown(
        &self,
        address: &str,
        reboot: bool,
    ) -> Result<RemoteExit, RemoteControlError> {
        run_command(&self.program, &ssh_shutdown_args(address, reboot), address).await
    }
}

/// Logs what would be done and reports success.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRun;

#[async_trait]
impl RemoteControl for DryRun {
    async fn shutdown(
        &self,
        address: &str,
        reboot: bool,
    ) -> Result<RemoteExit, RemoteControlError> {
        let action = if reboot { "reboot" } else { "shutdown" };
        info!(address, action, "dry run: remote command skipped");
        Ok(RemoteExit { code: Some(0) })
    }
}

/// Pick the transport for `kind`; `dry_run` overrides it.
pub fn remote_control_for(
    kind: RemoteControlKind,
    dry_run: bool,
) -> Box<dyn RemoteControl> {
    if dry_run {
        return Box::new(DryRun);
    }
    match kind {
        RemoteControlKind::Windows => Box::new(WindowsShutdown::default()),
        RemoteControlKind::Ssh => Box::new(SshShutdown::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_arguments() {
        assert_eq!(
            windows_shutdown_args("10.0.0.5", false),
            vec!["/s", "/t", "0", "/m", r"\\10.0.0.5"]
        );
        assert_eq!(windows_shutdown_args("db1", true)[0], "/r");
    }

    #[test]
    fn ssh_arguments() {
        assert_eq!(
            ssh_shutdown_args("db1.example.com", true),
            vec!["db1.example.com", "sudo", "shutdown", "-r", "now"]
        );
        assert_eq!(ssh_shutdown_args("app1", false)[3], "-h");
    }

    #[tokio::test]
    async fn dry_run_reports_success() {
        let exit = DryRun.shutdown("10.0.0.5", true).await.unwrap();
        assert_eq!(exit, RemoteExit { code: Some(0) });
        assert!(exit.success());
    }

    #[tokio::test]
    async fn missing_program_is_a_launch_error() {
        let remote = SshShutdown::with_program("/nonexistent/patchring-ssh");
        let err = remote.shutdown("10.0.0.5", false).await.unwrap_err();
        let RemoteControlError::Launch { program, address, .. } = err;
        assert_eq!(program, "/nonexistent/patchring-ssh");
        assert_eq!(address, "10.0.0.5");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_reported_not_raised() {
        let remote = SshShutdown::with_program("false");
        let exit = remote.shutdown("10.0.0.5", false).await.unwrap();
        assert_eq!(exit.code, Some(1));
        assert!(!exit.success());
    }

    #[tokio::test]
    async fn dry_run_overrides_configured_transport() {
        let remote = remote_control_for(RemoteControlKind::Ssh, true);
        let exit = remote.shutdown("unreachable.invalid", true).await.unwrap();
        assert!(exit.success());
    }
}
