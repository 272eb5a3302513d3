// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job manager: the per-crawler state machine and execution loop.
//!
//! At most one job runs in-process at a time. Commands and bus traffic
//! feed the run loop; the active job executes in a spawned task that
//! shares only its progress, token cell, and the pause flag with the
//! loop. The pause flag is sampled between suspension points only — an
//! in-flight page always completes and its cursor is saved.

use crate::outbound::Outbound;
use crate::pagination::{FetchError, Page, PageFetcher, Pager};
use crate::sink::RecordSink;
use crate::token::{TokenBroker, TokenCell, TokenError};
use dredge_core::{Area, AreaKind, Clock, CrawlCommand, DiscoveryResume, JobId, JobProgress};
use dredge_bus::ClientEvent;
use dredge_wire::{
    CrawlerState, Heartbeat, JobFailureLogs, JobProgressUpdate, JobUpdate, JobUpdateStatus,
    Payload, StatusUpdate, TaskDescriptor,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Sink target for jobs without a namespace (discovery, instance scope).
const INSTANCE_TARGET: &str = "_instance";

/// Builds a page fetcher for one task descriptor.
pub trait FetcherProvider: Send + Sync + 'static {
    fn fetcher_for(&self, task: &TaskDescriptor, token: TokenCell) -> Box<dyn PageFetcher>;
}

/// Manager lifecycle. `Paused` covers both "paused mid-job" and "paused
/// while idle" — the distinction lives in the active-job slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerPhase {
    Idle,
    Running,
    Paused,
}

impl ManagerPhase {
    fn crawler_state(self) -> CrawlerState {
        match self {
            ManagerPhase::Idle => CrawlerState::Idle,
            ManagerPhase::Running => CrawlerState::Running,
            ManagerPhase::Paused => CrawlerState::Paused,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub heartbeat_interval: Duration,
    pub page_throttle: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            page_throttle: Duration::from_millis(200),
        }
    }
}

/// Dependencies shared by the run loop and job executors.
pub struct ManagerDeps<C: Clock> {
    pub fetchers: Arc<dyn FetcherProvider>,
    pub sink: Arc<dyn RecordSink>,
    pub out: Arc<dyn Outbound>,
    pub broker: Arc<TokenBroker>,
    pub clock: C,
}

impl<C: Clock> Clone for ManagerDeps<C> {
    fn clone(&self) -> Self {
        Self {
            fetchers: Arc::clone(&self.fetchers),
            sink: Arc::clone(&self.sink),
            out: Arc::clone(&self.out),
            broker: Arc::clone(&self.broker),
            clock: self.clock.clone(),
        }
    }
}

struct ActiveJob {
    task: TaskDescriptor,
    progress: Arc<Mutex<JobProgress>>,
    discovery: Arc<Mutex<DiscoveryResume>>,
    token: TokenCell,
    /// The executor returned `Paused`; the job can resume in-place.
    parked: bool,
}

enum JobOutcome {
    Finished { job_id: JobId },
    Failed { job_id: JobId, error: String },
    Paused { job_id: JobId },
}

pub struct JobManager<C: Clock> {
    deps: ManagerDeps<C>,
    config: ManagerConfig,
    phase: ManagerPhase,
    queue: VecDeque<TaskDescriptor>,
    active: Option<ActiveJob>,
    pause_flag: Arc<AtomicBool>,
    heartbeats_enabled: bool,
    last_heartbeat_ms: u64,
}

impl<C: Clock> JobManager<C> {
    pub fn new(deps: ManagerDeps<C>, config: ManagerConfig) -> Self {
        Self {
            deps,
            config,
            phase: ManagerPhase::Idle,
            queue: VecDeque::new(),
            active: None,
            pause_flag: Arc::new(AtomicBool::new(false)),
            heartbeats_enabled: true,
            last_heartbeat_ms: 0,
        }
    }

    /// Drive the manager until cancelled.
    pub async fn run(mut self, mut events: mpsc::Receiver<ClientEvent>, cancel: CancellationToken) {
        let (outcome_tx, mut outcome_rx) = mpsc::channel::<JobOutcome>(8);
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    self.handle_client_event(event, &outcome_tx);
                }
                outcome = outcome_rx.recv() => {
                    let Some(outcome) = outcome else { break };
                    self.handle_outcome(outcome, &outcome_tx);
                }
                _ = heartbeat.tick() => {
                    if self.heartbeats_enabled {
                        self.emit_heartbeat();
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    }

    fn handle_client_event(&mut self, event: ClientEvent, outcome_tx: &mpsc::Sender<JobOutcome>) {
        match event {
            ClientEvent::Connected => {
                // Fresh connection: re-establish the backend's view.
                self.emit_status();
            }
            ClientEvent::Disconnected | ClientEvent::HeartbeatTimeout => {
                // The bus client reconnects on its own; jobs keep running
                // and updates queue until the link is back.
            }
            ClientEvent::Message(envelope) => match envelope.payload {
                Payload::StartJob(task) => self.handle_start_job(*task, outcome_tx),
                Payload::PauseCrawler => self.handle_pause(),
                Payload::ResumeCrawler => self.handle_resume(outcome_tx),
                Payload::GetStatus => self.emit_status(),
                Payload::Shutdown => self.handle_shutdown(),
                Payload::TokenRefreshResponse(response) => {
                    self.deps.broker.complete(response);
                }
                Payload::Heartbeat(_) => {}
                other => {
                    debug!(key = other.key(), "ignoring unexpected message");
                }
            },
        }
    }

    fn handle_start_job(&mut self, task: TaskDescriptor, outcome_tx: &mpsc::Sender<JobOutcome>) {
        // Idempotence: a re-dispatched job id is already here.
        let known_active = self.active.as_ref().is_some_and(|a| a.task.task_id == task.task_id);
        let known_queued = self.queue.iter().any(|t| t.task_id == task.task_id);
        if known_active || known_queued {
            debug!(job_id = %task.task_id, "duplicate START_JOB ignored");
            return;
        }
        info!(job_id = %task.task_id, command = %task.command, "job accepted");
        self.queue.push_back(task);
        self.try_start_next_job(outcome_tx);
    }

    fn handle_pause(&mut self) {
        if self.phase == ManagerPhase::Paused {
            return;
        }
        info!("pause requested");
        self.pause_flag.store(true, Ordering::SeqCst);
        // With a job in flight the paused jobUpdate is emitted when the
        // pause takes effect; the state change is visible immediately.
        self.phase = ManagerPhase::Paused;
        self.emit_status();
    }

    fn handle_resume(&mut self, outcome_tx: &mpsc::Sender<JobOutcome>) {
        if self.phase != ManagerPhase::Paused {
            return;
        }
        info!("resume requested");
        self.pause_flag.store(false, Ordering::SeqCst);
        self.phase = ManagerPhase::Idle;
        self.try_start_next_job(outcome_tx);
        self.emit_status();
    }

    fn handle_shutdown(&mut self) {
        info!(queued = self.queue.len(), "shutdown requested");
        self.heartbeats_enabled = false;
        self.queue.clear();
        match &self.active {
            Some(active) if !active.parked => {
                // The executor parks the job; the paused update is emitted
                // on its outcome and the reference cleared there.
                self.pause_flag.store(true, Ordering::SeqCst);
                self.phase = ManagerPhase::Paused;
            }
            Some(_) => {
                // Already parked and reported; just let go of it.
                self.active = None;
                self.phase = ManagerPhase::Idle;
            }
            None => self.phase = ManagerPhase::Idle,
        }
        self.emit_status();
    }

    /// Reentrant, guarded start. A no-op unless the manager is idle and
    /// there is either a parked job to resume or a queued job to pop.
    fn try_start_next_job(&mut self, outcome_tx: &mpsc::Sender<JobOutcome>) {
        if self.phase != ManagerPhase::Idle {
            return;
        }

        if let Some(active) = &mut self.active {
            if !active.parked {
                return;
            }
            active.parked = false;
            info!(job_id = %active.task.task_id, "resuming parked job");
            self.spawn_executor(outcome_tx);
            return;
        }

        let Some(task) = self.queue.pop_front() else { return };
        let progress = seed_progress(&task);
        let discovery = seed_discovery(&task);
        let token = TokenCell::new(task.credentials.access_token.clone());
        self.active = Some(ActiveJob {
            task,
            progress: Arc::new(Mutex::new(progress)),
            discovery: Arc::new(Mutex::new(discovery)),
            token,
            parked: false,
        });
        self.spawn_executor(outcome_tx);
    }

    fn spawn_executor(&mut self, outcome_tx: &mpsc::Sender<JobOutcome>) {
        let Some(active) = &self.active else { return };
        self.phase = ManagerPhase::Running;
        self.pause_flag.store(false, Ordering::SeqCst);

        let ctx = ExecutorCtx {
            deps: self.deps.clone(),
            task: active.task.clone(),
            progress: Arc::clone(&active.progress),
            discovery: Arc::clone(&active.discovery),
            token: active.token.clone(),
            pause: Arc::clone(&self.pause_flag),
            throttle: self.config.page_throttle,
        };
        let outcome_tx = outcome_tx.clone();
        tokio::spawn(async move {
            let outcome = execute_job(ctx).await;
            let _ = outcome_tx.send(outcome).await;
        });
        self.emit_status();
    }

    fn handle_outcome(&mut self, outcome: JobOutcome, outcome_tx: &mpsc::Sender<JobOutcome>) {
        let now = self.deps.clock.epoch_ms();
        match outcome {
            JobOutcome::Finished { job_id } => {
                let progress = self.take_active_progress();
                info!(job_id = %job_id, "job completed");
                self.deps.out.send(Payload::JobUpdate(JobUpdate {
                    job_id,
                    status: JobUpdateStatus::Completed,
                    error: None,
                    progress,
                    timestamp: now,
                }));
                self.active = None;
                self.phase = ManagerPhase::Idle;
                self.try_start_next_job(outcome_tx);
            }
            JobOutcome::Failed { job_id, error } => {
                let progress = self.take_active_progress();
                warn!(job_id = %job_id, error, "job failed");
                self.deps.out.send(Payload::JobUpdate(JobUpdate {
                    job_id: job_id.clone(),
                    status: JobUpdateStatus::Failed,
                    error: Some(error.clone()),
                    progress,
                    timestamp: now,
                }));
                self.deps.out.send(Payload::JobFailureLogs(JobFailureLogs {
                    job_id,
                    lines: vec![error],
                }));
                self.active = None;
                self.phase = ManagerPhase::Idle;
                self.try_start_next_job(outcome_tx);
            }
            JobOutcome::Paused { job_id } => {
                let progress = self
                    .active
                    .as_ref()
                    .map(|a| a.progress.lock().clone());
                info!(job_id = %job_id, "job paused");
                self.deps.out.send(Payload::JobUpdate(JobUpdate {
                    job_id,
                    status: JobUpdateStatus::Paused,
                    error: None,
                    progress,
                    timestamp: now,
                }));
                if self.heartbeats_enabled {
                    if let Some(active) = &mut self.active {
                        active.parked = true;
                    }
                    self.phase = ManagerPhase::Paused;
                } else {
                    // Shutdown path: nothing is destroyed, the backend
                    // re-dispatches from the persisted checkpoint.
                    self.active = None;
                    self.phase = ManagerPhase::Idle;
                }
            }
        }
        self.emit_status();
    }

    fn take_active_progress(&self) -> Option<JobProgress> {
        self.active.as_ref().map(|a| a.progress.lock().clone())
    }

    fn emit_heartbeat(&mut self) {
        let now = self.deps.clock.epoch_ms();
        self.last_heartbeat_ms = now;
        let active_jobs = u32::from(self.active.is_some());
        self.deps.out.send(Payload::Heartbeat(Heartbeat {
            timestamp: now,
            active_jobs: Some(active_jobs),
            system_status: Some(self.phase.crawler_state().to_string()),
        }));
        self.emit_status();
    }

    fn emit_status(&self) {
        self.deps.out.send(Payload::StatusUpdate(StatusUpdate {
            state: self.phase.crawler_state(),
            current_job_id: self.active.as_ref().map(|a| a.task.task_id.clone()),
            queue_size: self.queue.len() as u32,
            last_heartbeat: self.last_heartbeat_ms,
        }));
    }
}

/// Seed per-dataType progress from the descriptor's resume state.
fn seed_progress(task: &TaskDescriptor) -> JobProgress {
    task.custom_parameters
        .resume_state
        .as_ref()
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

/// Seed the discovery resume shape (independent cursors per connection).
fn seed_discovery(task: &TaskDescriptor) -> DiscoveryResume {
    if task.command != CrawlCommand::GroupProjectDiscovery {
        return DiscoveryResume::default();
    }
    task.custom_parameters
        .resume_state
        .as_ref()
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

struct ExecutorCtx<C: Clock> {
    deps: ManagerDeps<C>,
    task: TaskDescriptor,
    progress: Arc<Mutex<JobProgress>>,
    discovery: Arc<Mutex<DiscoveryResume>>,
    token: TokenCell,
    pause: Arc<AtomicBool>,
    throttle: Duration,
}

impl<C: Clock> ExecutorCtx<C> {
    fn target_path(&self) -> &str {
        self.task.full_path.as_deref().unwrap_or(INSTANCE_TARGET)
    }

    fn checkpoint(&self) {
        let (progress, resume_state) = if self.task.command == CrawlCommand::GroupProjectDiscovery
        {
            let resume = self.discovery.lock().clone();
            let value = serde_json::to_value(&resume).unwrap_or(serde_json::Value::Null);
            (self.progress.lock().clone(), value)
        } else {
            let progress = self.progress.lock().clone();
            let value = serde_json::to_value(&progress).unwrap_or(serde_json::Value::Null);
            (progress, value)
        };
        self.deps.out.send(Payload::JobProgress(JobProgressUpdate {
            job_id: self.task.task_id.clone(),
            progress,
            resume_state,
            timestamp: self.deps.clock.epoch_ms(),
        }));
    }

    /// Fetch the next page, refreshing the token once on a 401.
    async fn next_page_with_refresh(
        &self,
        pager: &mut Pager<'_>,
    ) -> Result<Option<Page>, String> {
        match pager.next_page().await {
            Ok(page) => Ok(page),
            Err(FetchError::Unauthorized) => {
                debug!(job_id = %self.task.task_id, "401 from provider, refreshing token");
                match self
                    .deps
                    .broker
                    .refresh(
                        self.deps.out.as_ref(),
                        &self.task.provider_id,
                        &self.task.account_id,
                        &self.task.user_id,
                        &self.token,
                    )
                    .await
                {
                    Ok(_) => pager.next_page().await.map_err(|e| e.to_string()),
                    Err(e @ (TokenError::Timeout | TokenError::Refused(_))) => {
                        Err(format!("token refresh failed: {e}"))
                    }
                }
            }
            Err(e) => Err(e.to_string()),
        }
    }
}

async fn execute_job<C: Clock>(ctx: ExecutorCtx<C>) -> JobOutcome {
    let job_id = ctx.task.task_id.clone();
    let outcome = if ctx.task.command == CrawlCommand::GroupProjectDiscovery {
        execute_discovery(&ctx).await
    } else {
        execute_paginated(&ctx).await
    };
    match outcome {
        Ok(Exit::Completed) => JobOutcome::Finished { job_id },
        Ok(Exit::Paused) => JobOutcome::Paused { job_id },
        Err(error) => JobOutcome::Failed { job_id, error },
    }
}

enum Exit {
    Completed,
    Paused,
}

/// The §-by-§ pagination loop for area-scoped commands.
async fn execute_paginated<C: Clock>(ctx: &ExecutorCtx<C>) -> Result<Exit, String> {
    let fetcher = ctx.deps.fetchers.fetcher_for(&ctx.task, ctx.token.clone());
    let data_types = ctx.task.data_types.clone();

    for data_type in &data_types {
        let start = ctx.progress.lock().after_cursor(data_type).map(str::to_string);
        let mut pager = Pager::new(fetcher.as_ref(), data_type, start);

        loop {
            // Sampled only between suspension points; an in-flight page
            // always completes and saves its cursor.
            if ctx.pause.load(Ordering::SeqCst) {
                ctx.checkpoint();
                return Ok(Exit::Paused);
            }

            ctx.progress.lock().data_type_mut(data_type).last_attempt =
                Some(ctx.deps.clock.epoch_ms());

            let page = match ctx.next_page_with_refresh(&mut pager).await {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(error) => {
                    let mut progress = ctx.progress.lock();
                    progress.data_type_mut(data_type).error_count += 1;
                    progress.error = Some(error.clone());
                    drop(progress);
                    ctx.checkpoint();
                    return Err(error);
                }
            };

            if !page.nodes.is_empty() {
                ctx.deps
                    .sink
                    .write(data_type, ctx.target_path(), &page.nodes)
                    .map_err(|e| e.to_string())?;
            }

            // Discovery data types fan out child areas. Failures here are
            // logged, never propagated into the job.
            if data_type == "groupProjects" || data_type == "groupSubgroups" {
                let kind = if data_type == "groupSubgroups" {
                    AreaKind::Group
                } else {
                    AreaKind::Project
                };
                emit_discoveries(ctx, &page.nodes, kind);
            }

            {
                let mut progress = ctx.progress.lock();
                let entry = progress.data_type_mut(data_type);
                entry.item_count += page.nodes.len() as u32;
                if let Some(cursor) = &page.page_info.end_cursor {
                    entry.after_cursor = Some(cursor.clone());
                }
            }
            ctx.checkpoint();

            if !page.page_info.has_next_page {
                break;
            }
            if !ctx.throttle.is_zero() {
                tokio::time::sleep(ctx.throttle).await;
            }
        }

        // Natural exhaustion clears the cursor for this data type.
        ctx.progress.lock().data_type_mut(data_type).after_cursor = None;
        ctx.checkpoint();
    }

    Ok(Exit::Completed)
}

/// Discovery walks two top-level connections with independent cursors.
async fn execute_discovery<C: Clock>(ctx: &ExecutorCtx<C>) -> Result<Exit, String> {
    let fetcher = ctx.deps.fetchers.fetcher_for(&ctx.task, ctx.token.clone());
    let data_type = ctx
        .task
        .data_types
        .first()
        .cloned()
        .unwrap_or_else(|| "discover_all_groups_projects".to_string());

    for kind in [AreaKind::Group, AreaKind::Project] {
        let (pseudo, start) = {
            let resume = ctx.discovery.lock();
            match kind {
                AreaKind::Group => (crate::gitlab::DISCOVER_GROUPS, resume.group_cursor.clone()),
                AreaKind::Project => {
                    (crate::gitlab::DISCOVER_PROJECTS, resume.project_cursor.clone())
                }
            }
        };
        let mut pager = Pager::new(fetcher.as_ref(), pseudo, start);

        loop {
            if ctx.pause.load(Ordering::SeqCst) {
                ctx.checkpoint();
                return Ok(Exit::Paused);
            }

            ctx.progress.lock().data_type_mut(&data_type).last_attempt =
                Some(ctx.deps.clock.epoch_ms());

            let page = match ctx.next_page_with_refresh(&mut pager).await {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(error) => {
                    let mut progress = ctx.progress.lock();
                    progress.data_type_mut(&data_type).error_count += 1;
                    progress.error = Some(error.clone());
                    drop(progress);
                    ctx.checkpoint();
                    return Err(error);
                }
            };

            if !page.nodes.is_empty() {
                ctx.deps
                    .sink
                    .write(&data_type, ctx.target_path(), &page.nodes)
                    .map_err(|e| e.to_string())?;
            }
            emit_discoveries(ctx, &page.nodes, kind);

            {
                let mut resume = ctx.discovery.lock();
                let count = page.nodes.len() as u32;
                match kind {
                    AreaKind::Group => {
                        resume.group_count += count;
                        if let Some(cursor) = &page.page_info.end_cursor {
                            resume.group_cursor = Some(cursor.clone());
                        }
                    }
                    AreaKind::Project => {
                        resume.project_count += count;
                        if let Some(cursor) = &page.page_info.end_cursor {
                            resume.project_cursor = Some(cursor.clone());
                        }
                    }
                }
                ctx.progress.lock().data_type_mut(&data_type).item_count += count;
            }
            ctx.checkpoint();

            if !page.page_info.has_next_page {
                break;
            }
            if !ctx.throttle.is_zero() {
                tokio::time::sleep(ctx.throttle).await;
            }
        }

        // This connection is exhausted; only its cursor resets.
        {
            let mut resume = ctx.discovery.lock();
            match kind {
                AreaKind::Group => resume.group_cursor = None,
                AreaKind::Project => resume.project_cursor = None,
            }
        }
        ctx.checkpoint();
    }

    Ok(Exit::Completed)
}

/// Turn page nodes into typed areas and report them to the backend.
fn emit_discoveries<C: Clock>(ctx: &ExecutorCtx<C>, nodes: &[serde_json::Value], kind: AreaKind) {
    let areas: Vec<Area> = nodes.iter().filter_map(|node| parse_area(node, kind)).collect();
    if areas.len() < nodes.len() {
        warn!(
            job_id = %ctx.task.task_id,
            skipped = nodes.len() - areas.len(),
            "some discovered nodes were missing fullPath, skipped"
        );
    }
    if areas.is_empty() {
        return;
    }
    ctx.deps.out.send(Payload::AreasDiscovered(dredge_wire::AreasDiscovered {
        job_id: ctx.task.task_id.clone(),
        areas,
    }));
}

fn parse_area(node: &serde_json::Value, kind: AreaKind) -> Option<Area> {
    let full_path = node.get("fullPath").and_then(|v| v.as_str())?.to_string();
    let name = node
        .get("name")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| full_path.rsplit('/').next().unwrap_or(&full_path).to_string());
    let gitlab_id = node.get("id").and_then(|v| {
        v.as_str().map(str::to_string).or_else(|| v.as_u64().map(|n| n.to_string()))
    });
    Some(Area { full_path, gitlab_id, name, kind })
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
