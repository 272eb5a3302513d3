// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed store operations consumed by the orchestrator and provisioner.

use crate::state::MaterializedState;
use crate::wal::{Wal, WalError};
use dredge_core::{
    Area, Clock, CrawlCommand, Job, JobId, JobProgress, JobStatus, NewJob, StoreEvent,
};
use parking_lot::Mutex;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Candidate rows examined per claim batch.
const CLAIM_BATCH: usize = 10;
/// Batches walked before a claim pass gives up.
const CLAIM_MAX_ATTEMPTS: usize = 5;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Wal(#[from] WalError),

    #[error("job not found: {0}")]
    JobNotFound(String),
}

/// Result of one claim pass.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// A candidate validated and was moved to `running`.
    Claimed(Job),
    /// Nothing runnable (or everything runnable failed validation).
    Empty,
}

struct Inner {
    state: MaterializedState,
    wal: Wal,
}

/// The job store: single serialization point for all job/area writes.
pub struct JobStore<C: Clock> {
    inner: Mutex<Inner>,
    clock: C,
}

impl<C: Clock> JobStore<C> {
    /// Open the WAL at `path` and rebuild state from it.
    pub fn open(path: &Path, clock: C) -> Result<Self, StoreError> {
        let (wal, events) = Wal::open(path)?;
        let state = MaterializedState::replay(events);
        info!(
            jobs = state.jobs.len(),
            areas = state.areas.len(),
            path = %path.display(),
            "job store opened"
        );
        Ok(Self { inner: Mutex::new(Inner { state, wal }), clock })
    }

    fn commit(inner: &mut Inner, event: StoreEvent) -> Result<(), StoreError> {
        inner.wal.append(&event)?;
        inner.state.apply(&event);
        Ok(())
    }

    /// Insert a job unless an active row already exists for its
    /// duplicate-suppression key. A terminal row for the same key is
    /// re-queued instead of duplicated; its checkpoint is preserved so a
    /// resumed dispatch picks up where the row left off.
    ///
    /// Returns the queued job, or `None` when suppressed.
    pub fn insert_job_if_absent(&self, new: NewJob) -> Result<Option<Job>, StoreError> {
        self.upsert(new, false)
    }

    /// Upsert a discovery job, resetting counters and resume state on an
    /// existing row so discovery starts from the top.
    pub fn upsert_discovery_job(&self, new: NewJob) -> Result<Option<Job>, StoreError> {
        self.upsert(new, true)
    }

    fn upsert(&self, new: NewJob, reset_resume: bool) -> Result<Option<Job>, StoreError> {
        let now = self.clock.epoch_ms();
        let mut inner = self.inner.lock();
        let key = (new.account_id.clone(), new.command, new.full_path.clone());

        if let Some(active) = inner.state.active_for_key(&key) {
            debug!(job_id = %active.id, command = %new.command, "duplicate job suppressed");
            return Ok(None);
        }

        if let Some(existing) = inner.state.row_for_key(&key) {
            let id = existing.id.clone();
            if reset_resume {
                Self::commit(
                    &mut inner,
                    StoreEvent::JobCheckpointed {
                        id: id.clone(),
                        resume_state: serde_json::Value::Null,
                        progress: Some(JobProgress::default()),
                        at_ms: now,
                    },
                )?;
            }
            Self::commit(
                &mut inner,
                StoreEvent::JobStatusChanged {
                    id: id.clone(),
                    status: JobStatus::Queued,
                    error: None,
                    at_ms: now,
                },
            )?;
            let job = inner
                .state
                .jobs
                .get(id.as_str())
                .cloned()
                .ok_or_else(|| StoreError::JobNotFound(id.to_string()))?;
            return Ok(Some(job));
        }

        let job = new.into_job(JobId::generate(), now);
        Self::commit(&mut inner, StoreEvent::JobInserted { job: job.clone() })?;
        Ok(Some(job))
    }

    /// Claim the next runnable job.
    ///
    /// Walks candidates in priority order (`queued` before `failed`;
    /// checkpointed rows first within a status; then oldest finish, oldest
    /// creation) in batches of [`CLAIM_BATCH`], at most
    /// [`CLAIM_MAX_ATTEMPTS`] batches. `validate` vets each candidate;
    /// a rejection marks the row `failed` with the given reason and the
    /// walk continues. The first accepted row transitions to `running`.
    pub fn claim_next_runnable<F>(
        &self,
        filter: Option<CrawlCommand>,
        mut validate: F,
    ) -> Result<ClaimOutcome, StoreError>
    where
        F: FnMut(&Job) -> Result<(), String>,
    {
        let now = self.clock.epoch_ms();
        let mut inner = self.inner.lock();

        let mut candidates: Vec<Job> = inner
            .state
            .jobs
            .values()
            .filter(|j| matches!(j.status, JobStatus::Queued | JobStatus::Failed))
            .filter(|j| filter.map_or(true, |f| j.command == f))
            .cloned()
            .collect();
        candidates.sort_by_key(runnable_sort_key);
        candidates.truncate(CLAIM_BATCH * CLAIM_MAX_ATTEMPTS);

        for candidate in candidates {
            match validate(&candidate) {
                Ok(()) => {
                    Self::commit(
                        &mut inner,
                        StoreEvent::JobStatusChanged {
                            id: candidate.id.clone(),
                            status: JobStatus::Running,
                            error: None,
                            at_ms: now,
                        },
                    )?;
                    let job = inner
                        .state
                        .jobs
                        .get(candidate.id.as_str())
                        .cloned()
                        .ok_or_else(|| StoreError::JobNotFound(candidate.id.to_string()))?;
                    return Ok(ClaimOutcome::Claimed(job));
                }
                Err(reason) => {
                    info!(job_id = %candidate.id, reason, "provisioning validation failed");
                    Self::commit(
                        &mut inner,
                        StoreEvent::JobStatusChanged {
                            id: candidate.id.clone(),
                            status: JobStatus::Failed,
                            error: Some(reason),
                            at_ms: now,
                        },
                    )?;
                }
            }
        }

        Ok(ClaimOutcome::Empty)
    }

    /// Single-row status update; always touches `updated_at`.
    pub fn update_status(
        &self,
        id: &JobId,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let now = self.clock.epoch_ms();
        let mut inner = self.inner.lock();
        if !inner.state.jobs.contains_key(id.as_str()) {
            return Err(StoreError::JobNotFound(id.to_string()));
        }
        Self::commit(
            &mut inner,
            StoreEvent::JobStatusChanged { id: id.clone(), status, error, at_ms: now },
        )
    }

    /// Partial checkpoint update; never clears `resume_state` implicitly.
    pub fn checkpoint_resume_state(
        &self,
        id: &JobId,
        resume_state: serde_json::Value,
        progress: Option<JobProgress>,
    ) -> Result<(), StoreError> {
        let now = self.clock.epoch_ms();
        let mut inner = self.inner.lock();
        if !inner.state.jobs.contains_key(id.as_str()) {
            return Err(StoreError::JobNotFound(id.to_string()));
        }
        Self::commit(
            &mut inner,
            StoreEvent::JobCheckpointed { id: id.clone(), resume_state, progress, at_ms: now },
        )
    }

    /// Atomic bulk reset used by the liveness reconciler: every `running`
    /// row back to `queued` with `started_at` cleared.
    pub fn reset_running_to_queued(&self) -> Result<Vec<JobId>, StoreError> {
        let now = self.clock.epoch_ms();
        let mut inner = self.inner.lock();
        let ids: Vec<JobId> = inner
            .state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Running)
            .map(|j| j.id.clone())
            .collect();
        if ids.is_empty() {
            return Ok(ids);
        }
        info!(count = ids.len(), "resetting running jobs to queued");
        Self::commit(&mut inner, StoreEvent::RunningReset { ids: ids.clone(), at_ms: now })?;
        Ok(ids)
    }

    /// Most recent `finished` row for `(account, command)` newer than
    /// `within_ms`. Drives the discovery cooldown.
    pub fn find_recent_finished(
        &self,
        account_id: &dredge_core::AccountId,
        command: CrawlCommand,
        within_ms: u64,
    ) -> Option<Job> {
        let now = self.clock.epoch_ms();
        let inner = self.inner.lock();
        inner
            .state
            .jobs
            .values()
            .filter(|j| {
                j.status == JobStatus::Finished
                    && j.account_id == *account_id
                    && j.command == command
            })
            .filter(|j| {
                j.finished_at_ms
                    .is_some_and(|finished| now.saturating_sub(finished) < within_ms)
            })
            .max_by_key(|j| j.finished_at_ms)
            .cloned()
    }

    /// Insert an area on first discovery. Returns `true` when inserted.
    ///
    /// Re-discovery of a known path is a no-op, except that a discovery
    /// carrying a `gitlab_id` backfills a row that lacked one.
    pub fn insert_area_if_absent(&self, area: Area) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let inserted = match inner.state.areas.get(&area.full_path) {
            None => true,
            Some(existing) if existing.gitlab_id.is_none() && area.gitlab_id.is_some() => false,
            Some(_) => return Ok(false),
        };
        Self::commit(&mut inner, StoreEvent::AreaDiscovered { area })?;
        Ok(inserted)
    }

    pub fn area(&self, full_path: &str) -> Option<Area> {
        self.inner.lock().state.areas.get(full_path).cloned()
    }

    pub fn job(&self, id: &JobId) -> Option<Job> {
        self.inner.lock().state.jobs.get(id.as_str()).cloned()
    }

    /// All jobs, newest first. Admin surface and tests.
    pub fn jobs_snapshot(&self) -> Vec<Job> {
        let inner = self.inner.lock();
        let mut jobs: Vec<Job> = inner.state.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms).then(a.id.cmp(&b.id)));
        jobs
    }

    /// Count of rows currently in `status`.
    pub fn count_with_status(&self, status: JobStatus) -> usize {
        self.inner.lock().state.jobs.values().filter(|j| j.status == status).count()
    }
}

/// Runnable ordering: `queued` first, then `failed`; within a status,
/// checkpointed rows first; then `finished_at` ASC, `created_at` ASC.
fn runnable_sort_key(job: &Job) -> (u8, u8, u64, u64) {
    let status_rank = match job.status {
        JobStatus::Queued => 0,
        _ => 1,
    };
    let resume_rank = if job.has_resume_state() { 0 } else { 1 };
    (status_rank, resume_rank, job.finished_at_ms.unwrap_or(0), job.created_at_ms)
}

#[cfg(test)]
#[path = "jobs_tests.rs"]
mod tests;
