// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized state from WAL replay.

use dredge_core::{Area, Job, JobId, JobStatus, StoreEvent};
use std::collections::{BTreeMap, HashMap};

/// State derived by replaying store events.
///
/// Every handler must be idempotent: an event is applied once when
/// written and again on every restart during replay.
#[derive(Debug, Default, Clone)]
pub struct MaterializedState {
    pub jobs: HashMap<JobId, Job>,
    /// Keyed by `full_path` (the area primary key).
    pub areas: BTreeMap<String, Area>,
}

impl MaterializedState {
    pub fn replay(events: Vec<StoreEvent>) -> Self {
        let mut state = Self::default();
        for event in &events {
            state.apply(event);
        }
        state
    }

    pub fn apply(&mut self, event: &StoreEvent) {
        match event {
            StoreEvent::JobInserted { job } => {
                self.jobs.insert(job.id.clone(), job.clone());
            }

            StoreEvent::JobStatusChanged { id, status, error, at_ms } => {
                let Some(job) = self.jobs.get_mut(id.as_str()) else { return };
                job.status = *status;
                job.updated_at_ms = *at_ms;
                match status {
                    JobStatus::Running => {
                        job.started_at_ms = Some(*at_ms);
                        job.finished_at_ms = None;
                        job.progress.error = None;
                    }
                    JobStatus::Finished => {
                        job.finished_at_ms = Some(*at_ms);
                        // Completion invalidates the checkpoint.
                        job.resume_state = None;
                        job.progress.error = None;
                    }
                    JobStatus::Failed => {
                        job.finished_at_ms = Some(*at_ms);
                        if error.is_some() {
                            job.progress.error = error.clone();
                        }
                    }
                    JobStatus::Queued | JobStatus::Paused => {}
                }
            }

            StoreEvent::JobCheckpointed { id, resume_state, progress, at_ms } => {
                let Some(job) = self.jobs.get_mut(id.as_str()) else { return };
                job.resume_state = Some(resume_state.clone());
                if let Some(progress) = progress {
                    job.progress = progress.clone();
                }
                job.updated_at_ms = *at_ms;
            }

            StoreEvent::RunningReset { ids, at_ms } => {
                for id in ids {
                    let Some(job) = self.jobs.get_mut(id.as_str()) else { continue };
                    if job.status == JobStatus::Running {
                        job.status = JobStatus::Queued;
                    }
                    // Replays after further transitions must still clear
                    // started_at exactly once; guarded by status above for
                    // the transition, unconditional for the timestamp.
                    if job.status == JobStatus::Queued {
                        job.started_at_ms = None;
                        job.updated_at_ms = *at_ms;
                    }
                }
            }

            StoreEvent::AreaDiscovered { area } => {
                // Insert-if-absent; first discovery wins, except that a
                // late-arriving gitlab_id fills a hole.
                match self.areas.get_mut(&area.full_path) {
                    Some(existing) => {
                        if existing.gitlab_id.is_none() && area.gitlab_id.is_some() {
                            existing.gitlab_id = area.gitlab_id.clone();
                        }
                    }
                    None => {
                        self.areas.insert(area.full_path.clone(), area.clone());
                    }
                }
            }

            StoreEvent::Custom => {}
        }
    }

    /// Find the active row for a duplicate-suppression key.
    pub fn active_for_key(
        &self,
        key: &(dredge_core::AccountId, dredge_core::CrawlCommand, Option<String>),
    ) -> Option<&Job> {
        self.jobs.values().find(|j| j.status.is_active() && j.dedup_key() == *key)
    }

    /// Any row (regardless of status) for a duplicate-suppression key.
    pub fn row_for_key(
        &self,
        key: &(dredge_core::AccountId, dredge_core::CrawlCommand, Option<String>),
    ) -> Option<&Job> {
        self.jobs.values().find(|j| j.dedup_key() == *key)
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
