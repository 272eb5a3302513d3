// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task provisioner: claims the next runnable job and hydrates a task
//! descriptor for dispatch.
//!
//! Candidates are vetted in a fixed cascade — account, access token,
//! instance URL, OAuth client, command mapping. A candidate that fails
//! is marked `failed` with a specific reason and the walk continues; no
//! descriptor ever leaves here half-hydrated.

use crate::accounts::AccountStore;
use crate::settings::Settings;
use dredge_core::{Account, AreaKind, Clock, CrawlCommand, Job, ResourceType};
use dredge_store::{ClaimOutcome, JobStore, StoreError};
use dredge_wire::{Credentials, CustomParameters, OutputConfig, TaskDescriptor};
use std::sync::Arc;
use tracing::debug;
use url::Url;

const ERR_MISSING_ACCOUNT: &str = "Missing account data";
const ERR_MISSING_TOKEN: &str = "Missing access token";
const ERR_MISSING_URL: &str = "Missing or invalid GitLab URL configuration";
const ERR_MISSING_CLIENT: &str = "Missing OAuth client credentials";

pub struct Provisioner<C: Clock> {
    store: Arc<JobStore<C>>,
    accounts: Arc<AccountStore>,
    settings: Settings,
    archive_base: String,
}

/// Everything validation resolves for a candidate.
struct Hydration {
    account: Account,
    base_url: String,
    client_id: String,
    client_secret: Option<String>,
}

impl<C: Clock> Provisioner<C> {
    pub fn new(
        store: Arc<JobStore<C>>,
        accounts: Arc<AccountStore>,
        settings: Settings,
        archive_base: impl Into<String>,
    ) -> Self {
        Self { store, accounts, settings, archive_base: archive_base.into() }
    }

    /// Claim and hydrate the next runnable job, if any.
    pub fn provision_next(
        &self,
        filter: Option<CrawlCommand>,
    ) -> Result<Option<TaskDescriptor>, StoreError> {
        let outcome =
            self.store.claim_next_runnable(filter, |job| self.validate(job).map(|_| ()))?;
        match outcome {
            ClaimOutcome::Claimed(job) => {
                // Validation just passed for this row; a failure here is
                // a torn accounts file, handled like any other rejection.
                match self.validate(&job) {
                    Ok(hydration) => Ok(Some(self.hydrate(&job, hydration))),
                    Err(reason) => {
                        self.store.update_status(
                            &job.id,
                            dredge_core::JobStatus::Failed,
                            Some(reason),
                        )?;
                        Ok(None)
                    }
                }
            }
            ClaimOutcome::Empty => Ok(None),
        }
    }

    fn validate(&self, job: &Job) -> Result<Hydration, String> {
        let account = self
            .accounts
            .get(&job.account_id)
            .ok_or_else(|| ERR_MISSING_ACCOUNT.to_string())?;
        if !account.has_access_token() {
            return Err(ERR_MISSING_TOKEN.to_string());
        }

        let base_url = job
            .gitlab_graphql_url
            .as_deref()
            .and_then(origin_of)
            .or_else(|| self.settings.base_url_for(&job.provider_id))
            .ok_or_else(|| ERR_MISSING_URL.to_string())?;

        let provider = self.settings.provider(&job.provider_id);
        let client_id = provider
            .filter(|p| p.has_client())
            .and_then(|p| p.client_id.clone())
            .ok_or_else(|| ERR_MISSING_CLIENT.to_string())?;
        let client_secret = provider.and_then(|p| p.client_secret.clone());

        Ok(Hydration { account, base_url, client_id, client_secret })
    }

    fn hydrate(&self, job: &Job, hydration: Hydration) -> TaskDescriptor {
        let (resource_type, resource_id) = self.resource_for(job);
        debug!(job_id = %job.id, command = %job.command, "task provisioned");
        TaskDescriptor {
            task_id: job.id.clone(),
            command: job.command,
            gitlab_api_url: hydration.base_url,
            provider_id: job.provider_id.clone(),
            account_id: job.account_id.clone(),
            user_id: job.user_id.clone(),
            credentials: Credentials {
                access_token: hydration.account.access_token,
                refresh_token: hydration.account.refresh_token,
                token_type: "oauth2".to_string(),
                client_id: hydration.client_id,
                client_secret: hydration.client_secret,
            },
            resource_type,
            resource_id,
            data_types: job.command.data_types().iter().map(|s| s.to_string()).collect(),
            output_config: OutputConfig::filesystem(self.archive_base.clone()),
            last_processed_id: None,
            custom_parameters: CustomParameters {
                branch: job.branch.clone(),
                from: job.from.clone(),
                to: job.to.clone(),
                resume_state: job.resume_state.clone(),
            },
            full_path: job.full_path.clone(),
        }
    }

    /// Resource classification. Discovery addresses the authorization
    /// itself; area commands resolve the provider id from the area row,
    /// falling back to the path when the row has no id yet.
    fn resource_for(&self, job: &Job) -> (ResourceType, Option<serde_json::Value>) {
        if job.command == CrawlCommand::GroupProjectDiscovery {
            return (ResourceType::Discovery, None);
        }
        let Some(full_path) = &job.full_path else {
            return (job.command.resource_type(), None);
        };
        match self.store.area(full_path) {
            Some(area) => {
                let resource_type = match area.kind {
                    AreaKind::Group => ResourceType::Group,
                    AreaKind::Project => ResourceType::Project,
                };
                let id = area
                    .gitlab_id
                    .map(serde_json::Value::from)
                    .unwrap_or_else(|| serde_json::Value::from(full_path.clone()));
                (resource_type, Some(id))
            }
            None => (
                job.command.resource_type(),
                Some(serde_json::Value::from(full_path.clone())),
            ),
        }
    }
}

/// Origin (scheme + authority) of a URL, for deriving the instance base
/// from a stored GraphQL endpoint.
fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let origin = match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    };
    Some(origin)
}

#[cfg(test)]
#[path = "provision_tests.rs"]
mod tests;
