//! Machine group scans.

use crate::{
    api::PatchApiClient,
    error::{ApiError, PollError},
    model::ResourceId,
    operations::OperationWatcher,
    poll::{COMPLETION_POLL_INTERVAL, Clock, PollPolicy},
};

use patchring_config::PollingConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Name given to every scan started by this tool.
pub const SCAN_NAME: &str = "Machine Group Scan initiated by Rest API";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartScanRequest<'a> {
    machine_group_ids: [&'a ResourceId; 1],
    name: &'static str,
    template_id: &'a ResourceId,
    run_as_credential_id: &'a ResourceId,
}

#[derive(Debug, Deserialize)]
struct StartScanResponse {
    id: Option<ResourceId>,
}

/// Starts machine group scans and waits for them to finish.
#[derive(Debug)]
pub struct ScanOrchestrator<'a> {
    api: &'a PatchApiClient,
    watcher: OperationWatcher<'a>,
}

impl<'a> ScanOrchestrator<'a> {
    /// Completion is polled every 30 s, hardened by `polling`.
    pub fn new(
        api: &'a PatchApiClient,
        clock: &'a dyn Clock,
        polling: &PollingConfig,
    ) -> Self {
        let policy = PollPolicy::fixed(COMPLETION_POLL_INTERVAL).with_settings(polling);
        Self {
            api,
            watcher: OperationWatcher::new(api, clock, policy),
        }
    }

    /// `POST patch/scans` for one machine group and return the scan id.
    pub async fn start_scan(
        &self,
        group_id: &ResourceId,
        template_id: &ResourceId,
        credential_id: &ResourceId,
    ) -> Result<ResourceId, ApiError> {
        let request = StartScanRequest {
            machine_group_ids: [group_id],
            name: SCAN_NAME,
            template_id,
            run_as_credential_id: credential_id,
        };
        let response = self
            .api
            .post_json("patch/scans", &request)
            .await?
            .error_for_status()?;
        let started: StartScanResponse = response.json()?;
        let scan_id = started.id.ok_or_else(|| ApiError::Malformed {
            url: response.url.clone(),
            reason: "scan response has no id".to_string(),
        })?;

        info!(scan_id = %scan_id, group_id = %group_id, "scan started");
        Ok(scan_id)
    }

    /// Poll the scan operation until it reports `Succeeded`.
    pub async fn wait_for_scan_completion(
        &self,
        scan_id: &ResourceId,
    ) -> Result<u32, PollError> {
        let attempts = self.watcher.wait_for_success("scan", scan_id).await?;
        info!(scan_id = %scan_id, attempts, "scan finished");
        Ok(attempts)
    }
}
