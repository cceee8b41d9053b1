//! Patch deployments against a finished scan.
//!
//! The console answers `POST patch/deployments` with an empty body; the new
//! deployment is only named by the `Location` header.

use crate::{
    api::PatchApiClient,
    error::{ApiError, PollError},
    model::{Listing, MachineRecord, ResourceId},
    operations::{OperationWatcher, PATCH_DEPLOYMENT_KIND},
    poll::{COMPLETION_POLL_INTERVAL, Clock, PollPolicy, READY_POLL_INTERVAL},
};

use patchring_config::PollingConfig;
use reqwest::header::LOCATION;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartDeploymentRequest<'a> {
    scan_id: &'a ResourceId,
    template_id: &'a ResourceId,
}

/// Trailing path segment of a `Location` header value.
pub fn deployment_id_from_location(location: &str) -> Option<ResourceId> {
    let path = location.split(['?', '#']).next().unwrap_or_default();
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(ResourceId::from)
}

/// Starts deployments and waits on them.
///
/// Readiness is polled every 5 s, completion every 30 s.
#[derive(Debug)]
pub struct DeploymentOrchestrator<'a> {
    api: &'a PatchApiClient,
    ready: OperationWatcher<'a>,
    completion: OperationWatcher<'a>,
}

impl<'a> DeploymentOrchestrator<'a> {
    /// `polling` hardens both waits; see [`PollPolicy::with_settings`].
    pub fn new(
        api: &'a PatchApiClient,
        clock: &'a dyn Clock,
        polling: &PollingConfig,
    ) -> Self {
        Self {
            api,
            ready: OperationWatcher::new(
                api,
                clock,
                PollPolicy::fixed(READY_POLL_INTERVAL).with_settings(polling),
            ),
            completion: OperationWatcher::new(
                api,
                clock,
                PollPolicy::fixed(COMPLETION_POLL_INTERVAL).with_settings(polling),
            ),
        }
    }

    /// `POST patch/deployments` and return the id named by `Location`.
    pub async fn start_deployment(
        &self,
        scan_id: &ResourceId,
        template_id: &ResourceId,
    ) -> Result<ResourceId, ApiError> {
        let request = StartDeploymentRequest {
            scan_id,
            template_id,
        };
        let response = self
            .api
            .post_json("patch/deployments", &request)
            .await?
            .error_for_status()?;

        let location =
            response
                .header(LOCATION.as_str())
                .ok_or_else(|| ApiError::Malformed {
                    url: response.url.clone(),
                    reason: "deployment response has no Location header".to_string(),
                })?;
        let deployment_id =
            deployment_id_from_location(location).ok_or_else(|| {
                ApiError::Malformed {
                    url: response.url.clone(),
                    reason: format!("no deployment id in Location '{location}'"),
                }
            })?;

        info!(deployment_id = %deployment_id, scan_id = %scan_id, "deployment started");
        Ok(deployment_id)
    }

    /// Wait until the operation behind `deployment_id` is a `PatchDeployment`.
    pub async fn wait_for_deployment_ready(
        &self,
        deployment_id: &ResourceId,
    ) -> Result<u32, PollError> {
        self.ready
            .wait_for_kind("deployment readiness", deployment_id, PATCH_DEPLOYMENT_KIND)
            .await
    }

    /// Machines the deployment targets, in the order the console lists them.
    pub async fn fetch_affected_machines(
        &self,
        deployment_id: &ResourceId,
    ) -> Result<Vec<MachineRecord>, ApiError> {
        let path = format!("patch/deployments/{deployment_id}/machines");
        let listing: Listing<MachineRecord> =
            self.api.get(&path, &[]).await?.error_for_status()?.json()?;

        info!(
            deployment_id = %deployment_id,
            machines = listing.value.len(),
            "fetched machines affected by deployment"
        );
        Ok(listing.value)
    }

    /// Poll `operations/{id}` every 30 s until it reports `Succeeded`.
    pub async fn wait_for_deployment_completion(
        &self,
        deployment_id: &ResourceId,
    ) -> Result<u32, PollError> {
        let attempts = self
            .completion
            .wait_for_success("deployment", deployment_id)
            .await?;
        info!(deployment_id = %deployment_id, attempts, "deployment finished");
        Ok(attempts)
    }
}
