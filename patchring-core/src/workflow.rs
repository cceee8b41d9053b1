//! End-to-end rollout: resolve names once, then scan, deploy and restart the
//! server ring followed by the database ring, strictly in sequence.

use crate::{
    api::PatchApiClient,
    deployment::DeploymentOrchestrator,
    error::WorkflowError,
    model::{MachineRecord, ResolvedIds, ResourceId},
    poll::Clock,
    remote::{RemoteControl, RemoteExit},
    resolver::Resolver,
    scan::ScanOrchestrator,
    vcenter::{PowerOnStage, VCenterClient},
};

use patchring_config::Config;
use std::fmt;
use tracing::{info, warn};

/// One of the two machine groups, patched in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ring {
    /// `machine_group_server`, shut down after patching.
    Server,
    /// `machine_group_database`, rebooted after patching.
    Database,
}

impl Ring {
    /// Database machines are force-rebooted; servers are only shut down.
    pub fn reboot(self) -> bool {
        matches!(self, Ring::Database)
    }

    /// Resolved machine group id of this ring.
    pub fn group(self, ids: &ResolvedIds) -> &ResourceId {
        match self {
            Ring::Server => &ids.server_group,
            Ring::Database => &ids.database_group,
        }
    }
}

impl fmt::Display for Ring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Ring::Server => "server",
            Ring::Database => "database",
        })
    }
}

/// What happened to one ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingReport {
    /// Ring the report covers.
    pub ring: Ring,
    /// Scan started for the ring's group.
    pub scan_id: ResourceId,
    /// Deployment started from that scan.
    pub deployment_id: ResourceId,
    /// Machines the deployment targeted.
    pub machines: Vec<MachineRecord>,
    /// One entry per machine, same order as `machines`.
    pub exits: Vec<RemoteExit>,
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowReport {
    /// Identifiers resolved at the start.
    pub ids: ResolvedIds,
    /// Server ring first, then database ring.
    pub rings: Vec<RingReport>,
    /// VM ids started by the power-on stage, empty when it is disabled.
    pub powered_on: Vec<String>,
}

/// Drives one rollout over borrowed collaborators.
pub struct Workflow<'a> {
    config: &'a Config,
    api: &'a PatchApiClient,
    remote: &'a dyn RemoteControl,
    clock: &'a dyn Clock,
}

impl fmt::Debug for Workflow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("api", self.api)
            .finish_non_exhaustive()
    }
}

impl<'a> Workflow<'a> {
    /// Nothing is sent until [`Self::run`].
    pub fn new(
        config: &'a Config,
        api: &'a PatchApiClient,
        remote: &'a dyn RemoteControl,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            config,
            api,
            remote,
            clock,
        }
    }

    /// Run the whole rollout. The first error aborts it.
    ///
    /// Session credentials, when configured, are removed again even if
    /// the run fails.
    pub async fn run(&self) -> Result<WorkflowReport, WorkflowError> {
        let session = self.config.workflow.session_credential_password.as_deref();
        if let Some(password) = session {
            self.api.create_session(password).await?;
        }

        let outcome = self.run_rings().await;

        if session.is_some()
            && let Err(e) = self.api.delete_session().await
        {
            warn!(error = %e, "failed to remove session credentials");
        }

        match &outcome {
            Ok(report) => info!(rings = report.rings.len(), "rollout finished"),
            Err(e) => warn!(error = %e, "rollout aborted"),
        }
        outcome
    }

    async fn run_rings(&self) -> Result<WorkflowReport, WorkflowError> {
        let ids = Resolver::new(self.api)
            .resolve_all(&self.config.workflow)
            .await?;

        let server = self.run_ring(Ring::Server, &ids).await?;
        let database = self.run_ring(Ring::Database, &ids).await?;

        let power_on = self.config.workflow.power_on_servers;
        let powered_on = match (&self.config.vcenter, power_on) {
            (Some(vcenter), true) => {
                let stage = PowerOnStage::new(
                    VCenterClient::new(&self.config.server, vcenter)?,
                    self.clock,
                    &self.config.polling,
                    self.config.workflow.sql_probe_port,
                );
                stage.run(&server.machines, &database.machines).await?
            }
            _ => Vec::new(),
        };

        Ok(WorkflowReport {
            ids,
            rings: vec![server, database],
            powered_on,
        })
    }

    /// Scan, deploy and restart one ring.
    pub async fn run_ring(
        &self,
        ring: Ring,
        ids: &ResolvedIds,
    ) -> Result<RingReport, WorkflowError> {
        info!(%ring, group_id = %ring.group(ids), "starting ring");
        let scans = ScanOrchestrator::new(self.api, self.clock, &self.config.polling);
        let deployments =
            DeploymentOrchestrator::new(self.api, self.clock, &self.config.polling);

        let scan_id = scans
            .start_scan(ring.group(ids), &ids.scan_template, &ids.credential)
            .await?;
        scans.wait_for_scan_completion(&scan_id).await?;

        let deployment_id = deployments
            .start_deployment(&scan_id, &ids.deployment_template)
            .await?;
        deployments.wait_for_deployment_ready(&deployment_id).await?;
        let machines = deployments.fetch_affected_machines(&deployment_id).await?;
        deployments
            .wait_for_deployment_completion(&deployment_id)
            .await?;

        let mut exits = Vec::with_capacity(machines.len());
        for machine in &machines {
            let exit = self.remote.shutdown(&machine.address, ring.reboot()).await?;
            if !exit.success() {
                warn!(
                    %ring,
                    machine = %machine.name,
                    address = %machine.address,
                    %exit,
                    "remote shutdown did not succeed"
                );
            }
            exits.push(exit);
        }

        info!(%ring, machines = machines.len(), "ring finished");
        Ok(RingReport {
            ring,
            scan_id,
            deployment_id,
            machines,
            exits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::ResolutionError,
        model::ResourceKind,
        poll::{COMPLETION_POLL_INTERVAL, READY_POLL_INTERVAL, RecordingClock},
        remote::MockRemoteControl,
        testing::{MockConsole, MockResponse},
    };
    use patchring_config::{
        BasicAuth, LogLevel, LoggingConfig, PollingConfig, RemoteControlKind,
        ServerConfig, VCenterConfig, WorkflowConfig,
    };
    use reqwest::Method;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    fn config_for(console: &MockConsole) -> Config {
        Config {
            server: ServerConfig {
                url: console.base_url(),
                ca_cert_path: None,
                basic_auth: None,
                accept_invalid_certs: false,
            },
            workflow: WorkflowConfig {
                run_as_credentials: "svc-patch".into(),
                scan_template: "Security Patch Scan".into(),
                deployment_template: "Agentless Deploy".into(),
                machine_group_server: "ServerRing".into(),
                machine_group_database: "DatabaseRing".into(),
                remote_control: RemoteControlKind::Windows,
                power_on_servers: false,
                sql_probe_port: 1434,
                session_credential_password: None,
            },
            logging: LoggingConfig {
                log_path: "logs".into(),
                log_level: LogLevel::Info,
            },
            polling: PollingConfig::default(),
            vcenter: None,
        }
    }

    fn script_listings(console: &MockConsole, groups: serde_json::Value) {
        console.on(
            Method::GET,
            "credentials",
            [MockResponse::json(json!({"value": [{"name": "svc-patch", "id": 3}]}))],
        );
        console.on(
            Method::GET,
            "patch/scanTemplates",
            [MockResponse::json(json!({"value": [{"name": "Security Patch Scan", "id": "st-1"}]}))],
        );
        console.on(
            Method::GET,
            "patch/deploytemplates",
            [MockResponse::json(json!({"value": [{"name": "Agentless Deploy", "id": "dt-1"}]}))],
        );
        console.on(
            Method::GET,
            "machinegroups",
            [MockResponse::json(json!({ "value": groups }))],
        );
    }

    fn script_ring(console: &MockConsole, scan: &str, deployment: &str, machines: serde_json::Value) {
        console.on(
            Method::GET,
            &format!("operations/{scan}"),
            [
                MockResponse::json(json!({"status": "Running"})),
                MockResponse::json(json!({"status": "Succeeded"})),
            ],
        );
        console.on(
            Method::GET,
            &format!("operations/{deployment}"),
            [
                MockResponse::json(json!({"operation": "PatchDeployment", "status": "Running"})),
                MockResponse::json(json!({"operation": "PatchDeployment", "status": "Succeeded"})),
            ],
        );
        console.on(
            Method::GET,
            &format!("patch/deployments/{deployment}/machines"),
            [MockResponse::json(json!({ "value": machines }))],
        );
    }

    fn script_rollout(console: &MockConsole) {
        script_listings(
            console,
            json!([
                {"name": "ServerRing", "id": "42"},
                {"name": "DatabaseRing", "id": "43"}
            ]),
        );
        console.on(
            Method::POST,
            "patch/scans",
            [
                MockResponse::json(json!({"id": "scan-1"})),
                MockResponse::json(json!({"id": "scan-2"})),
            ],
        );
        console.on(
            Method::POST,
            "patch/deployments",
            [
                MockResponse::status(201)
                    .with_header("Location", "/st/console/api/v1.0/patch/deployments/dep-1"),
                MockResponse::status(201)
                    .with_header("Location", "/st/console/api/v1.0/patch/deployments/dep-99"),
            ],
        );
        script_ring(
            console,
            "scan-1",
            "dep-1",
            json!([
                {"name": "app1", "address": "10.0.0.1"},
                {"name": "app2", "address": "10.0.0.2"}
            ]),
        );
        script_ring(
            console,
            "scan-2",
            "dep-99",
            json!([{"name": "db1", "address": "127.0.0.1"}]),
        );
    }

    type Calls = Arc<Mutex<Vec<(String, bool)>>>;

    fn recording_remote(exit_code: i32) -> (MockRemoteControl, Calls) {
        let calls = Calls::default();
        let seen = calls.clone();
        let mut remote = MockRemoteControl::new();
        remote.expect_shutdown().returning(move |address, reboot| {
            seen.lock().unwrap().push((address.to_string(), reboot));
            Ok(RemoteExit {
                code: Some(exit_code),
            })
        });
        (remote, calls)
    }

    #[tokio::test]
    async fn rollout_runs_server_then_database_ring() {
        let console = MockConsole::start().await;
        script_rollout(&console);
        let config = config_for(&console);
        let api = console.client();
        let clock = RecordingClock::new();
        let (remote, calls) = recording_remote(0);

        let report = Workflow::new(&config, &api, &remote, &clock)
            .run()
            .await
            .unwrap();

        assert_eq!(report.ids.server_group, ResourceId::from("42"));
        assert_eq!(report.rings.len(), 2);
        assert_eq!(report.rings[0].ring, Ring::Server);
        assert_eq!(report.rings[0].scan_id, ResourceId::from("scan-1"));
        assert_eq!(report.rings[1].deployment_id, ResourceId::from("dep-99"));
        assert_eq!(
            report.rings[1].machines,
            vec![MachineRecord {
                name: "db1".into(),
                address: "127.0.0.1".into(),
            }]
        );
        assert!(report.powered_on.is_empty());

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                ("10.0.0.1".to_string(), false),
                ("10.0.0.2".to_string(), false),
                ("127.0.0.1".to_string(), true),
            ]
        );

        let scans = console.requests_to(Method::POST, "patch/scans");
        let second: serde_json::Value = serde_json::from_str(&scans[1].body).unwrap();
        assert_eq!(second["machineGroupIds"], json!(["43"]));
        assert_eq!(second["runAsCredentialId"], json!(3));

        // One sleep per scan wait, none for readiness, none for completion.
        assert_eq!(clock.sleeps(), vec![COMPLETION_POLL_INTERVAL; 2]);
        assert!(!clock.sleeps().contains(&READY_POLL_INTERVAL));
        assert!(console.requests_to(Method::POST, "sessioncredentials").is_empty());
    }

    #[tokio::test]
    async fn failed_shutdown_exit_code_does_not_abort() {
        let console = MockConsole::start().await;
        script_rollout(&console);
        let config = config_for(&console);
        let api = console.client();
        let clock = RecordingClock::new();
        let (remote, calls) = recording_remote(53);

        let report = Workflow::new(&config, &api, &remote, &clock)
            .run()
            .await
            .unwrap();

        assert_eq!(calls.lock().unwrap().len(), 3);
        assert!(report.rings.iter().flat_map(|r| &r.exits).all(|e| !e.success()));
    }

    #[tokio::test]
    async fn unresolved_name_aborts_before_any_scan() {
        let console = MockConsole::start().await;
        script_listings(&console, json!([{"name": "ServerRing", "id": "42"}]));
        console.on(Method::POST, "sessioncredentials", [MockResponse::status(201)]);
        console.on(Method::DELETE, "sessioncredentials", [MockResponse::status(204)]);
        let mut config = config_for(&console);
        config.workflow.session_credential_password = Some("Pa$$w0rd".into());
        let api = console.client();
        let clock = RecordingClock::new();
        let mut remote = MockRemoteControl::new();
        remote.expect_shutdown().never();

        let err = Workflow::new(&config, &api, &remote, &clock)
            .run()
            .await
            .unwrap_err();

        match err {
            WorkflowError::Resolution(ResolutionError::NotFound { kind, name }) => {
                assert_eq!(kind, ResourceKind::MachineGroup);
                assert_eq!(name, "DatabaseRing");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(console.requests_to(Method::POST, "patch/scans").is_empty());
        assert_eq!(console.requests_to(Method::POST, "sessioncredentials").len(), 1);
        assert_eq!(console.requests_to(Method::DELETE, "sessioncredentials").len(), 1);
    }

    #[tokio::test]
    async fn failing_session_removal_is_only_logged() {
        let console = MockConsole::start().await;
        script_rollout(&console);
        console.on(Method::POST, "sessioncredentials", [MockResponse::status(201)]);
        console.on(Method::DELETE, "sessioncredentials", [MockResponse::status(500)]);
        let mut config = config_for(&console);
        config.workflow.session_credential_password = Some("Pa$$w0rd".into());
        let api = console.client();
        let clock = RecordingClock::new();
        let (remote, _) = recording_remote(0);

        let report = Workflow::new(&config, &api, &remote, &clock).run().await;
        assert!(report.is_ok());
    }

    #[tokio::test]
    async fn power_on_stage_runs_after_database_ring() {
        let console = MockConsole::start().await;
        script_rollout(&console);
        console.on_raw(
            Method::POST,
            "/rest/com/vmware/cis/session",
            [MockResponse::json(json!({"value": "sess-1"}))],
        );
        console.on_raw(
            Method::GET,
            "/rest/vcenter/vm",
            [
                MockResponse::json(json!({"value": [{"vm": "vm-1"}]})),
                MockResponse::json(json!({"value": [{"vm": "vm-2"}]})),
            ],
        );
        console.on_raw(Method::POST, "/rest/vcenter/vm/vm-1/power/start", [MockResponse::status(200)]);
        console.on_raw(Method::POST, "/rest/vcenter/vm/vm-2/power/start", [MockResponse::status(200)]);
        let sql = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let mut config = config_for(&console);
        config.workflow.power_on_servers = true;
        config.workflow.sql_probe_port = sql.local_addr().unwrap().port();
        config.vcenter = Some(VCenterConfig {
            url: console.base_url(),
            credentials: BasicAuth {
                username: "administrator@vsphere.local".into(),
                password: "secret".into(),
            },
        });
        let api = console.client();
        let clock = RecordingClock::new();
        let (remote, _) = recording_remote(0);

        let report = Workflow::new(&config, &api, &remote, &clock)
            .run()
            .await
            .unwrap();

        assert_eq!(report.powered_on, vec!["vm-1", "vm-2"]);
        let lookups = console.requests_to_raw(Method::GET, "/rest/vcenter/vm");
        assert_eq!(lookups[0].query.as_deref(), Some("filter.names=app1"));
        assert_eq!(lookups[1].query.as_deref(), Some("filter.names=app2"));
    }

    #[test]
    fn only_the_database_ring_reboots() {
        assert!(!Ring::Server.reboot());
        assert!(Ring::Database.reboot());
        assert_eq!(Ring::Database.to_string(), "database");
    }
}
