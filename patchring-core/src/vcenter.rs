//! Optional stage that powers the server ring back on through vCenter once
//! every database machine answers on its SQL endpoint again.

use crate::{
    api::{ApiResponse, build_http_client, client::execute},
    error::{ApiError, PollError, WorkflowError},
    model::MachineRecord,
    poll::{Clock, PollPolicy, Poller, Probe, SQL_PROBE_INTERVAL},
};

use patchring_config::{BasicAuth, PollingConfig, ServerConfig, VCenterConfig};
use reqwest::{Client, Method};
use serde::Deserialize;
use std::{fmt, time::Duration};
use tokio::net::TcpStream;
use tracing::{debug, info};
use url::Url;

const SESSION_HEADER: &str = "vmware-api-session-id";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct ValueEnvelope<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
struct VmSummary {
    vm: String,
}

/// Session token returned by `POST /rest/com/vmware/cis/session`.
#[derive(Clone)]
pub struct VCenterSession(String);

impl fmt::Debug for VCenterSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VCenterSession(<redacted>)")
    }
}

/// Minimal client for the vSphere REST API.
#[derive(Clone)]
pub struct VCenterClient {
    http: Client,
    base: Url,
    credentials: BasicAuth,
}

impl fmt::Debug for VCenterClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VCenterClient")
            .field("base", &self.base.as_str())
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl VCenterClient {
    /// Client for `vcenter`, sharing TLS settings with the console.
    pub fn new(server: &ServerConfig, vcenter: &VCenterConfig) -> Result<Self, ApiError> {
        Ok(Self::with_http_client(build_http_client(server)?, vcenter))
    }

    /// Use an existing reqwest client.
    pub fn with_http_client(http: Client, vcenter: &VCenterConfig) -> Self {
        let mut base = vcenter.url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self {
            http,
            base,
            credentials: vcenter.credentials.clone(),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base.join(path).map_err(|source| ApiError::InvalidUrl {
            path: path.to_string(),
            source,
        })
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        session: Option<&VCenterSession>,
        body: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        let mut request = self.http.request(method.clone(), url.clone());
        if let Some(VCenterSession(id)) = session {
            request = request.header(SESSION_HEADER, id.as_str());
        }
        if let Some(payload) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(payload.to_string());
        }
        execute(request, method, &url, body)
            .await?
            .error_for_status()
    }

    /// Open a session with HTTP basic credentials.
    pub async fn login(&self) -> Result<VCenterSession, ApiError> {
        let url = self.endpoint("rest/com/vmware/cis/session")?;
        let request = self
            .http
            .post(url.clone())
            .basic_auth(&self.credentials.username, Some(&self.credentials.password));
        let response = execute(request, Method::POST, &url, None)
            .await?
            .error_for_status()?;
        let session: ValueEnvelope<String> = response.json()?;
        info!(vcenter = %self.base, "vCenter session created");
        Ok(VCenterSession(session.value))
    }

    /// Id of the first VM whose name is exactly `name`.
    pub async fn find_vm(
        &self,
        session: &VCenterSession,
        name: &str,
    ) -> Result<String, ApiError> {
        let mut url = self.endpoint("rest/vcenter/vm")?;
        url.query_pairs_mut().append_pair("filter.names", name);
        let response = self.send(Method::GET, url, Some(session), None).await?;
        let found: ValueEnvelope<Vec<VmSummary>> = response.json()?;

        found
            .value
            .into_iter()
            .next()
            .map(|summary| summary.vm)
            .ok_or_else(|| ApiError::Malformed {
                url: response.url.clone(),
                reason: format!("no virtual machine named '{name}'"),
            })
    }

    /// Request power-on of `vm_id`.
    pub async fn power_on(
        &self,
        session: &VCenterSession,
        vm_id: &str,
    ) -> Result<(), ApiError> {
        let url = self.endpoint(&format!("rest/vcenter/vm/{vm_id}/power/start"))?;
        self.send(Method::POST, url, Some(session), Some(r#"{"spec":{}}"#))
            .await?;
        info!(vm_id, "power on requested");
        Ok(())
    }
}

/// A TCP connect to `address:port` succeeds within 5 s.
pub async fn sql_endpoint_reachable(address: &str, port: u16) -> bool {
    match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((address, port))).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!(address, port, error = %e, "SQL endpoint refused connection");
            false
        }
        Err(_) => {
            debug!(address, port, "SQL endpoint connect timed out");
            false
        }
    }
}

/// Wait until every machine accepts TCP connections on `port`.
pub async fn wait_for_sql_endpoints(
    poller: &Poller<'_>,
    machines: &[MachineRecord],
    port: u16,
) -> Result<u32, PollError> {
    poller
        .run("SQL endpoints", move || async move {
            let mut up = 0usize;
            for machine in machines {
                if sql_endpoint_reachable(&machine.address, port).await {
                    up += 1;
                }
            }
            info!(up, total = machines.len(), port, "checked SQL endpoints");
            Ok::<_, ApiError>(if up == machines.len() {
                Probe::Done
            } else {
                Probe::Pending
            })
        })
        .await
}

/// Powers the server ring on after the database ring is back.
#[derive(Debug)]
pub struct PowerOnStage<'a> {
    vcenter: VCenterClient,
    poller: Poller<'a>,
    sql_probe_port: u16,
}

impl<'a> PowerOnStage<'a> {
    /// SQL endpoints are probed every 15 s on `sql_probe_port`.
    pub fn new(
        vcenter: VCenterClient,
        clock: &'a dyn Clock,
        polling: &PollingConfig,
        sql_probe_port: u16,
    ) -> Self {
        Self {
            vcenter,
            poller: Poller::new(
                clock,
                PollPolicy::fixed(SQL_PROBE_INTERVAL).with_settings(polling),
            ),
            sql_probe_port,
        }
    }

    /// Returns the ids of the VMs that were started, in server order.
    pub async fn run(
        &self,
        servers: &[MachineRecord],
        databases: &[MachineRecord],
    ) -> Result<Vec<String>, WorkflowError> {
        wait_for_sql_endpoints(&self.poller, databases, self.sql_probe_port).await?;

        let session = self.vcenter.login().await?;
        let mut started = Vec::with_capacity(servers.len());
        for server in servers {
            let vm_id = self.vcenter.find_vm(&session, &server.name).await?;
            self.vcenter.power_on(&session, &vm_id).await?;
            info!(machine = %server.name, vm_id = %vm_id, "server powered on");
            started.push(vm_id);
        }
        Ok(started)
    }
}
