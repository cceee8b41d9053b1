//! Transient values exchanged with the console API.
//!
//! Nothing here is persisted; identifiers are only meaningful for the
//! lifetime of the server-side resource they name.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a server-side resource.
///
/// The console returns numeric ids for some resources (machine groups,
/// credentials) and string ids for others (scans, deployments). The
/// original JSON form is kept so it can be echoed back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceId {
    /// JSON number.
    Number(i64),
    /// JSON string.
    Text(String),
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Number(n) => write!(f, "{n}"),
            ResourceId::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        ResourceId::Text(value.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(value: String) -> Self {
        ResourceId::Text(value)
    }
}

impl From<i64> for ResourceId {
    fn from(value: i64) -> Self {
        ResourceId::Number(value)
    }
}

/// Listing endpoints the resolver can search by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// `credentials`
    Credential,
    /// `patch/scanTemplates`
    ScanTemplate,
    /// `patch/deploytemplates`
    DeploymentTemplate,
    /// `machinegroups`
    MachineGroup,
}

impl ResourceKind {
    /// Path of the listing endpoint, relative to the API root.
    pub fn listing_path(self) -> &'static str {
        match self {
            ResourceKind::Credential => "credentials",
            ResourceKind::ScanTemplate => "patch/scanTemplates",
            ResourceKind::DeploymentTemplate => "patch/deploytemplates",
            ResourceKind::MachineGroup => "machinegroups",
        }
    }

    /// Query parameters sent with the listing request for `name`.
    ///
    /// Machine groups are fetched as a single page of up to 1000 entries;
    /// there is no further pagination.
    pub fn listing_query(self, name: &str) -> Vec<(&'static str, String)> {
        match self {
            ResourceKind::Credential => vec![("name", name.to_string())],
            ResourceKind::MachineGroup => vec![("count", "1000".to_string())],
            ResourceKind::ScanTemplate | ResourceKind::DeploymentTemplate => {
                Vec::new()
            }
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceKind::Credential => "credential",
            ResourceKind::ScanTemplate => "scan template",
            ResourceKind::DeploymentTemplate => "deployment template",
            ResourceKind::MachineGroup => "machine group",
        })
    }
}

/// Status reported by `GET operations/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum OperationState {
    /// Queued.
    Pending,
    /// In progress.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Finished with an error.
    Failed,
    /// Any other status string, kept verbatim.
    Other(String),
}

impl From<String> for OperationState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Pending" => OperationState::Pending,
            "Running" => OperationState::Running,
            "Succeeded" => OperationState::Succeeded,
            "Failed" => OperationState::Failed,
            _ => OperationState::Other(value),
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationState::Pending => "Pending",
            OperationState::Running => "Running",
            OperationState::Succeeded => "Succeeded",
            OperationState::Failed => "Failed",
            OperationState::Other(other) => other,
        })
    }
}

/// One snapshot of a server-tracked operation. Re-fetched on every poll.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct OperationStatus {
    /// Absent until the console starts tracking the operation.
    #[serde(default)]
    pub status: Option<OperationState>,
    /// Kind of the operation, e.g. `PatchDeployment`.
    #[serde(default)]
    pub operation: Option<String>,
}

impl OperationStatus {
    /// Status is `Succeeded`.
    pub fn is_succeeded(&self) -> bool {
        self.status == Some(OperationState::Succeeded)
    }

    /// Status is `Failed`.
    pub fn is_failed(&self) -> bool {
        self.status == Some(OperationState::Failed)
    }

    /// Operation kind equals `kind`.
    pub fn is_kind(&self, kind: &str) -> bool {
        self.operation.as_deref() == Some(kind)
    }
}

/// A machine affected by a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineRecord {
    /// Display name.
    pub name: String,
    /// Host name or IP the shutdown command targets.
    pub address: String,
}

/// Identifiers resolved once at the start of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIds {
    /// `run_as_credentials`
    pub credential: ResourceId,
    /// `scan_template`
    pub scan_template: ResourceId,
    /// `deployment_template`
    pub deployment_template: ResourceId,
    /// `machine_group_server`
    pub server_group: ResourceId,
    /// `machine_group_database`
    pub database_group: ResourceId,
}

/// Envelope used by every listing endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct Listing<T> {
    pub value: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NamedItem {
    pub name: String,
    pub id: ResourceId,
}
