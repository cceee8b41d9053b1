//! Name to id resolution against the console listings.

use crate::{
    api::PatchApiClient,
    error::ResolutionError,
    model::{Listing, NamedItem, ResolvedIds, ResourceId, ResourceKind},
};

use patchring_config::WorkflowConfig;
use tracing::{debug, info};

/// Maps configured names to server-side identifiers.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    api: &'a PatchApiClient,
}

impl<'a> Resolver<'a> {
    /// Resolver reading listings through `api`.
    pub fn new(api: &'a PatchApiClient) -> Self {
        Self { api }
    }

    /// Look `name` up in the listing for `kind`.
    ///
    /// Matching is exact and case-sensitive; the first hit wins.
    pub async fn resolve_id(
        &self,
        kind: ResourceKind,
        name: &str,
    ) -> Result<ResourceId, ResolutionError> {
        let listing: Listing<NamedItem> = self
            .api
            .get(kind.listing_path(), &kind.listing_query(name))
            .await?
            .error_for_status()?
            .json()?;
        debug!(%kind, entries = listing.value.len(), "fetched listing");

        let id = find_by_name(&listing.value, name).ok_or_else(|| {
            ResolutionError::NotFound {
                kind,
                name: name.to_string(),
            }
        })?;
        info!(%kind, name, id = %id, "resolved identifier");
        Ok(id)
    }

    /// Resolve every name the workflow needs, once, in a fixed order.
    pub async fn resolve_all(
        &self,
        workflow: &WorkflowConfig,
    ) -> Result<ResolvedIds, ResolutionError> {
        Ok(ResolvedIds {
            credential: self
                .resolve_id(ResourceKind::Credential, &workflow.run_as_credentials)
                .await?,
            scan_template: self
                .resolve_id(ResourceKind::ScanTemplate, &workflow.scan_template)
                .await?,
            deployment_template: self
                .resolve_id(
                    ResourceKind::DeploymentTemplate,
                    &workflow.deployment_template,
                )
                .await?,
            server_group: self
                .resolve_id(ResourceKind::MachineGroup, &workflow.machine_group_server)
                .await?,
            database_group: self
                .resolve_id(
                    ResourceKind::MachineGroup,
                    &workflow.machine_group_database,
                )
                .await?,
        })
    }
}

pub(crate) fn find_by_name(items: &[NamedItem], name: &str) -> Option<ResourceId> {
    items
        .iter()
        .find(|item| item.name == name)
        .map(|item| item.id.clone())
}
