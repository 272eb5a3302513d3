// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orchestrator: consumes bus events and keeps the job store, the
//! crawler, and the admin surface consistent.
//!
//! Authorization intake creates discovery jobs; discoveries fan out
//! per-area jobs; job updates land in the store; crawler loss funnels
//! through the reconciler. Dispatch is pull-from-store: after every
//! state-changing trigger the next runnable job is provisioned and
//! pushed to a registered crawler.

use crate::accounts::AccountStore;
use crate::joblog::JobLogWriter;
use crate::provision::Provisioner;
use crate::reconcile::Reconciler;
use crate::settings::Settings;
use crate::token::TokenRefresher;
use dredge_bus::{roles, BusEvent, BusServerHandle};
use dredge_core::{
    Account, Area, Clock, ConnectionId, CrawlCommand, JobStatus, NewJob,
};
use dredge_store::JobStore;
use dredge_wire::{
    AreasDiscovered, CrawlerState, Heartbeat, JobList, JobSummary, JobUpdate, JobUpdateStatus,
    Payload, StatusUpdate, TokenRefreshRequest, TokenRefreshResponse,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Cached view of the crawler fleet for the admin surface. Written only
/// by the orchestrator's event handling; one owned value, not globals.
#[derive(Debug, Default, Clone)]
pub struct BackendState {
    pub crawler_status: Option<StatusUpdate>,
    pub last_heartbeat_ms: Option<u64>,
}

pub struct OrchestratorDeps<C: Clock> {
    pub store: Arc<JobStore<C>>,
    pub accounts: Arc<AccountStore>,
    pub settings: Settings,
    pub bus: BusServerHandle<C>,
    pub refresher: Arc<dyn TokenRefresher>,
    pub joblog: JobLogWriter,
    pub clock: C,
    pub discovery_cooldown: Duration,
    pub archive_base: String,
    pub heartbeat_interval: Duration,
}

pub struct Orchestrator<C: Clock> {
    store: Arc<JobStore<C>>,
    accounts: Arc<AccountStore>,
    settings: Settings,
    bus: BusServerHandle<C>,
    refresher: Arc<dyn TokenRefresher>,
    joblog: JobLogWriter,
    clock: C,
    discovery_cooldown: Duration,
    heartbeat_interval: Duration,
    provisioner: Provisioner<C>,
    reconciler: Reconciler<C>,
    state: BackendState,
}

impl<C: Clock> Orchestrator<C> {
    pub fn new(deps: OrchestratorDeps<C>) -> Self {
        let provisioner = Provisioner::new(
            Arc::clone(&deps.store),
            Arc::clone(&deps.accounts),
            deps.settings.clone(),
            deps.archive_base.clone(),
        );
        let reconciler = Reconciler::new(Arc::clone(&deps.store));
        Self {
            store: deps.store,
            accounts: deps.accounts,
            settings: deps.settings,
            bus: deps.bus,
            refresher: deps.refresher,
            joblog: deps.joblog,
            clock: deps.clock,
            discovery_cooldown: deps.discovery_cooldown,
            heartbeat_interval: deps.heartbeat_interval,
            provisioner,
            reconciler,
            state: BackendState::default(),
        }
    }

    /// Startup reconciliation: rows left `running` by a previous run are
    /// stranded (any live crawler re-registers and gets re-dispatched),
    /// and every stored authorization goes through intake.
    pub fn startup(&mut self) {
        self.reconciler.crawler_lost("backend restart");
        for account in self.accounts.all() {
            self.intake_account(&account);
        }
    }

    /// Drive the orchestrator until cancelled.
    pub async fn run(mut self, mut events: mpsc::Receiver<BusEvent>, cancel: CancellationToken) {
        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    self.handle_event(event);
                }
                _ = heartbeat.tick() => self.broadcast_heartbeat(),
                _ = cancel.cancelled() => {
                    // Crawlers park their active job and wait for a new
                    // backend; nothing is destroyed.
                    self.bus.broadcast(Payload::Shutdown);
                    break;
                }
            }
        }
    }

    pub(crate) fn handle_event(&mut self, event: BusEvent) {
        match event {
            BusEvent::Connected { connection_id } => {
                debug!(connection = %connection_id, "connection opened");
            }
            BusEvent::Registered { connection_id, identity } => {
                debug!(connection = %connection_id, peer = %identity.id, "peer registered");
                if identity.role == roles::CRAWLER {
                    self.dispatch_queued();
                }
            }
            BusEvent::Disconnected { identity, .. } => {
                if identity.as_ref().is_some_and(|i| i.role == roles::CRAWLER) {
                    self.state.crawler_status = None;
                    self.reconciler.crawler_lost("crawler disconnected");
                }
            }
            BusEvent::HeartbeatTimeout { identity, .. } => {
                if identity.as_ref().map_or(true, |i| i.role == roles::CRAWLER) {
                    self.state.crawler_status = None;
                    self.reconciler.crawler_lost("crawler heartbeat timeout");
                }
            }
            BusEvent::Message { connection_id, envelope } => {
                self.handle_message(connection_id, envelope.origin, envelope.payload);
            }
        }
    }

    fn handle_message(&mut self, connection_id: ConnectionId, origin: String, payload: Payload) {
        match payload {
            Payload::Heartbeat(heartbeat) => {
                self.state.last_heartbeat_ms = Some(heartbeat.timestamp);
            }
            Payload::StatusUpdate(status) => {
                self.state.crawler_status = Some(status);
            }
            Payload::StateChange(change) => {
                if let Some(status) = &mut self.state.crawler_status {
                    status.state = change.state;
                }
            }
            Payload::JobUpdate(update) => self.apply_job_update(update),
            Payload::JobProgress(checkpoint) => {
                if let Err(e) = self.store.checkpoint_resume_state(
                    &checkpoint.job_id,
                    checkpoint.resume_state,
                    Some(checkpoint.progress),
                ) {
                    warn!(job_id = %checkpoint.job_id, error = %e, "checkpoint for unknown job");
                }
            }
            Payload::JobFailureLogs(logs) => {
                self.joblog.append(&logs.job_id, &logs.lines);
            }
            Payload::AreasDiscovered(msg) => self.on_areas_discovered(msg),
            Payload::TokenRefreshRequest(request) => {
                self.handle_token_refresh(connection_id, request);
            }
            Payload::GetStatus | Payload::Subscribe(_) => {
                let status = self.status_snapshot();
                self.bus.send_to_connection(&connection_id, Payload::StatusUpdate(status));
            }
            Payload::GetJobs => {
                let jobs: Vec<JobSummary> =
                    self.store.jobs_snapshot().iter().map(JobSummary::from).collect();
                self.bus.send_to_connection(&connection_id, Payload::JobList(JobList { jobs }));
            }
            Payload::StartDiscovery(request) => {
                match request.account_id {
                    Some(id) => match self.accounts.get(&id) {
                        Some(account) => self.intake_account(&account),
                        None => warn!(account = %id, "START_DISCOVERY for unknown account"),
                    },
                    None => {
                        for account in self.accounts.all() {
                            self.intake_account(&account);
                        }
                    }
                }
                self.dispatch_queued();
            }
            other => {
                debug!(key = other.key(), origin, "unhandled message at backend");
            }
        }
    }

    /// Authorization intake: upsert the discovery job unless one
    /// finished inside the cooldown window.
    pub(crate) fn intake_account(&self, account: &Account) {
        let cooldown_ms = self.discovery_cooldown.as_millis() as u64;
        if let Some(recent) = self.store.find_recent_finished(
            &account.id,
            CrawlCommand::GroupProjectDiscovery,
            cooldown_ms,
        ) {
            debug!(account = %account.id, job_id = %recent.id, "discovery inside cooldown, skipped");
            return;
        }

        let graphql_url = self
            .settings
            .base_url_for(&account.provider_id)
            .map(|base| format!("{base}/api/graphql"));
        let new_job = NewJob {
            command: CrawlCommand::GroupProjectDiscovery,
            account_id: account.id.clone(),
            provider_id: account.provider_id.clone(),
            user_id: account.user_id.clone(),
            full_path: None,
            gitlab_graphql_url: graphql_url,
            spawned_from: None,
        };
        match self.store.upsert_discovery_job(new_job) {
            Ok(Some(job)) => info!(account = %account.id, job_id = %job.id, "discovery job queued"),
            Ok(None) => debug!(account = %account.id, "discovery already active"),
            Err(e) => warn!(account = %account.id, error = %e, "failed to queue discovery"),
        }
    }

    /// Area fan-out: insert the area, then one job per command for its
    /// kind. Duplicate suppression makes re-discovery a no-op.
    fn on_areas_discovered(&mut self, msg: AreasDiscovered) {
        let Some(parent) = self.store.job(&msg.job_id) else {
            warn!(job_id = %msg.job_id, "discoveries from unknown job dropped");
            return;
        };

        for area in msg.areas {
            if let Err(e) = self.store.insert_area_if_absent(area.clone()) {
                warn!(area = area.full_path, error = %e, "failed to insert area");
                continue;
            }
            self.spawn_area_jobs(&parent, &area);
        }
        self.dispatch_queued();
    }

    fn spawn_area_jobs(&self, parent: &dredge_core::Job, area: &Area) {
        let commands = match area.kind {
            dredge_core::AreaKind::Group => CrawlCommand::group_commands(),
            dredge_core::AreaKind::Project => CrawlCommand::project_commands(),
        };
        for command in commands {
            let new_job = NewJob {
                command: *command,
                account_id: parent.account_id.clone(),
                provider_id: parent.provider_id.clone(),
                user_id: parent.user_id.clone(),
                full_path: Some(area.full_path.clone()),
                gitlab_graphql_url: parent.gitlab_graphql_url.clone(),
                spawned_from: Some(parent.id.clone()),
            };
            match self.store.insert_job_if_absent(new_job) {
                Ok(Some(job)) => {
                    debug!(job_id = %job.id, command = %command, area = area.full_path, "child job queued");
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(command = %command, area = area.full_path, error = %e, "failed to queue child job");
                }
            }
        }
    }

    /// Map a crawler job update onto the store.
    fn apply_job_update(&mut self, update: JobUpdate) {
        let Some(job) = self.store.job(&update.job_id) else {
            warn!(job_id = %update.job_id, "update for unknown job dropped");
            return;
        };

        // Persist the final progress (and, for paginated commands, its
        // resume shape) before the status flips. Discovery resume state
        // was already checkpointed in its own shape between pages.
        if matches!(update.status, JobUpdateStatus::Paused | JobUpdateStatus::Failed) {
            if let Some(progress) = &update.progress {
                if job.command != CrawlCommand::GroupProjectDiscovery {
                    let resume = serde_json::to_value(progress)
                        .unwrap_or(serde_json::Value::Null);
                    if let Err(e) = self.store.checkpoint_resume_state(
                        &update.job_id,
                        resume,
                        Some(progress.clone()),
                    ) {
                        warn!(job_id = %update.job_id, error = %e, "failed to persist progress");
                    }
                }
            }
        }

        let status = update.status.job_status();
        info!(job_id = %update.job_id, status = %status, "job update");
        if let Err(e) = self.store.update_status(&update.job_id, status, update.error.clone()) {
            warn!(job_id = %update.job_id, error = %e, "failed to apply job update");
            return;
        }
        if status == JobStatus::Failed {
            let line = update
                .error
                .unwrap_or_else(|| "job failed without an error message".to_string());
            self.joblog.append(&update.job_id, &[line]);
        }

        self.dispatch_queued();
    }

    /// Provision and push the next runnable job when a crawler is
    /// registered, not paused, and nothing is currently running.
    ///
    /// The reference deployment pins one job per crawler process; the
    /// crawler's own queue handles any over-dispatch idempotently.
    pub(crate) fn dispatch_queued(&mut self) {
        if !self.bus.has_peer(roles::CRAWLER) {
            return;
        }
        if self
            .state
            .crawler_status
            .as_ref()
            .is_some_and(|s| s.state == CrawlerState::Paused)
        {
            return;
        }
        if self.store.count_with_status(JobStatus::Running) > 0 {
            return;
        }

        let task = match self.provisioner.provision_next(None) {
            Ok(Some(task)) => task,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "provisioning failed");
                return;
            }
        };
        let job_id = task.task_id.clone();
        if self.bus.send_to(roles::CRAWLER, Payload::StartJob(Box::new(task))) {
            info!(job_id = %job_id, "task dispatched");
        } else {
            // The peer vanished between the check and the send; put the
            // claim back so the next registration re-dispatches.
            warn!(job_id = %job_id, "dispatch failed, requeueing");
            self.reconciler.crawler_lost("dispatch send failed");
        }
    }

    fn handle_token_refresh(&self, connection_id: ConnectionId, request: TokenRefreshRequest) {
        let accounts = Arc::clone(&self.accounts);
        let refresher = Arc::clone(&self.refresher);
        let settings = self.settings.clone();
        let bus = self.bus.clone();
        let now_ms = self.clock.epoch_ms();

        tokio::spawn(async move {
            let response = refresh_account(
                &request,
                accounts.as_ref(),
                refresher.as_ref(),
                &settings,
                now_ms,
            )
            .await;
            if !bus.send_to_connection(&connection_id, Payload::TokenRefreshResponse(response)) {
                warn!(request = %request.request_id, "refresh requester already gone");
            }
        });
    }

    fn broadcast_heartbeat(&self) {
        self.bus.broadcast(Payload::Heartbeat(Heartbeat {
            timestamp: self.clock.epoch_ms(),
            active_jobs: Some(self.store.count_with_status(JobStatus::Running) as u32),
            system_status: Some("ok".to_string()),
        }));
    }

    fn status_snapshot(&self) -> StatusUpdate {
        self.state.crawler_status.clone().unwrap_or(StatusUpdate {
            state: CrawlerState::Idle,
            current_job_id: None,
            queue_size: 0,
            last_heartbeat: self.state.last_heartbeat_ms.unwrap_or(0),
        })
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &BackendState {
        &self.state
    }
}

/// The refresh round-trip body: verify (cheap out when the token is
/// still good), refresh grant, persist, answer.
async fn refresh_account(
    request: &TokenRefreshRequest,
    accounts: &AccountStore,
    refresher: &dyn TokenRefresher,
    settings: &Settings,
    now_ms: u64,
) -> TokenRefreshResponse {
    let failure = |error: String| TokenRefreshResponse {
        request_id: request.request_id.clone(),
        success: false,
        access_token: None,
        refresh_token: None,
        expires_at: None,
        provider_id: Some(request.provider_id.clone()),
        error: Some(error),
    };

    let Some(account) = accounts.get(&request.account_id) else {
        return failure(format!("unknown account {}", request.account_id));
    };

    // A still-valid token means the crawler raced an expiry that didn't
    // happen; hand the current one back.
    if let Some(verify_url) = settings.verify_url_for(&request.provider_id) {
        if refresher.verify(&account.access_token, &verify_url).await {
            return TokenRefreshResponse {
                request_id: request.request_id.clone(),
                success: true,
                access_token: Some(account.access_token.clone()),
                refresh_token: account.refresh_token.clone(),
                expires_at: account.access_token_expires_at_ms,
                provider_id: Some(request.provider_id.clone()),
                error: None,
            };
        }
    }

    let provider = settings.provider(&request.provider_id).cloned().unwrap_or_default();
    let token_url = settings.token_url_for(&request.provider_id);
    let refreshed = match refresher.refresh(&account, &provider, token_url, now_ms).await {
        Ok(refreshed) => refreshed,
        Err(e) => return failure(e.to_string()),
    };

    let updated = match accounts.apply_refresh(
        &request.account_id,
        refreshed.access_token.clone(),
        refreshed.refresh_token.clone(),
        refreshed.expires_at_ms,
    ) {
        Ok(updated) => updated,
        Err(e) => return failure(format!("failed to persist tokens: {e}")),
    };

    TokenRefreshResponse {
        request_id: request.request_id.clone(),
        success: true,
        access_token: Some(updated.access_token),
        refresh_token: updated.refresh_token,
        expires_at: updated.access_token_expires_at_ms,
        provider_id: Some(request.provider_id.clone()),
        error: None,
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
