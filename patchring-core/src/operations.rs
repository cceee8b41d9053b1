//! Waits on server-tracked operations (`GET operations/{id}`).
//!
//! A poll that returns anything but 200, or a body that is not an
//! operation snapshot, is a [`TransientPollError`]: it is logged and the
//! loop carries on as if the operation were still running.

use crate::{
    api::PatchApiClient,
    error::{ApiError, PollError, TransientPollError},
    model::{OperationStatus, ResourceId},
    poll::{Clock, PollPolicy, Poller, Probe},
};

use reqwest::StatusCode;
use tracing::{info, warn};

/// Operation kind reported once a deployment can be inspected.
pub const PATCH_DEPLOYMENT_KIND: &str = "PatchDeployment";

/// Fetch one snapshot of an operation.
///
/// The outer error is a transport failure; the inner one a poll that
/// should simply be retried.
pub async fn fetch_operation_status(
    api: &PatchApiClient,
    id: &ResourceId,
) -> Result<Result<OperationStatus, TransientPollError>, ApiError> {
    let response = api.get(&format!("operations/{id}"), &[]).await?;
    info!(operation_id = %id, "fetched operation status");

    if response.status != StatusCode::OK {
        return Ok(Err(TransientPollError::Status(response.status)));
    }
    Ok(serde_json::from_str(&response.body)
        .map_err(|e| TransientPollError::Body(e.to_string())))
}

/// Polls one operation until a condition on its snapshot holds.
#[derive(Debug)]
pub struct OperationWatcher<'a> {
    api: &'a PatchApiClient,
    poller: Poller<'a>,
}

impl<'a> OperationWatcher<'a> {
    /// Watcher that paces its polls with `policy`.
    pub fn new(
        api: &'a PatchApiClient,
        clock: &'a dyn Clock,
        policy: PollPolicy,
    ) -> Self {
        Self {
            api,
            poller: Poller::new(clock, policy),
        }
    }

    /// Wait until the operation reports `status == "Succeeded"`.
    pub async fn wait_for_success(
        &self,
        label: &str,
        id: &ResourceId,
    ) -> Result<u32, PollError> {
        info!(label, operation_id = %id, "waiting for operation to succeed");
        let api = self.api;
        self.poller
            .run(label, move || async move {
                Ok::<_, ApiError>(match fetch_operation_status(api, id).await? {
                    Ok(status) if status.is_succeeded() => {
                        info!(operation_id = %id, "status switched to Succeeded");
                        Probe::Done
                    }
                    Ok(status) if status.is_failed() => {
                        warn!(operation_id = %id, "operation reported Failed");
                        Probe::Failed
                    }
                    Ok(_) => Probe::Pending,
                    Err(transient) => {
                        warn!(operation_id = %id, error = %transient, "status poll retried");
                        Probe::Pending
                    }
                })
            })
            .await
    }

    /// Wait until the operation reports `operation == kind`.
    pub async fn wait_for_kind(
        &self,
        label: &str,
        id: &ResourceId,
        kind: &str,
    ) -> Result<u32, PollError> {
        info!(label, operation_id = %id, kind, "waiting for operation kind");
        let api = self.api;
        self.poller
            .run(label, move || async move {
                Ok::<_, ApiError>(match fetch_operation_status(api, id).await? {
                    Ok(status) if status.is_kind(kind) => Probe::Done,
                    Ok(_) => Probe::Pending,
                    Err(transient) => {
                        warn!(operation_id = %id, error = %transient, "status poll retried");
                        Probe::Pending
                    }
                })
            })
            .await
    }
}
