// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job model and per-dataType progress/resume state.

use crate::account::AccountId;
use crate::command::CrawlCommand;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

crate::define_id! {
    /// Unique identifier for a job row.
    ///
    /// Jobs are addressed by id everywhere: task descriptors, job updates,
    /// failure logs, and the admin surface.
    pub struct JobId("job-");
}

/// Persistent job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Paused,
    Finished,
    Failed,
}

crate::simple_display! {
    JobStatus {
        Queued => "queued",
        Running => "running",
        Paused => "paused",
        Finished => "finished",
        Failed => "failed",
    }
}

impl JobStatus {
    /// Counts toward the one-active-row duplicate-suppression rule.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

/// Per-dataType pagination progress. Doubles as the resume-state shape
/// for paginated commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataTypeProgress {
    /// Cursor of the last successfully persisted page; `None` once the
    /// data type is exhausted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_cursor: Option<String>,
    /// Epoch ms of the most recent fetch attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<u64>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub error_count: u32,
    /// Records persisted so far for this data type.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub item_count: u32,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// Resume-state shape for `GROUP_PROJECT_DISCOVERY` jobs, which walk two
/// top-level connections (groups and projects) with independent cursors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResume {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_cursor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_cursor: Option<String>,
    #[serde(default)]
    pub group_count: u32,
    #[serde(default)]
    pub project_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_total: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_total: Option<u32>,
}

/// Job progress: per-dataType counters plus an error message slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    #[serde(flatten)]
    pub data_types: BTreeMap<String, DataTypeProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobProgress {
    pub fn data_type_mut(&mut self, data_type: &str) -> &mut DataTypeProgress {
        self.data_types.entry(data_type.to_string()).or_default()
    }

    pub fn after_cursor(&self, data_type: &str) -> Option<&str> {
        self.data_types.get(data_type).and_then(|p| p.after_cursor.as_deref())
    }
}

/// A persisted unit of crawl work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub command: CrawlCommand,
    pub status: JobStatus,
    pub account_id: AccountId,
    pub provider_id: String,
    pub user_id: String,
    /// Target namespace. `None` for discovery and instance-scoped jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gitlab_graphql_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Opaque checkpoint written between successful pages and on pause;
    /// cleared when the job finishes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_state: Option<serde_json::Value>,
    #[serde(default)]
    pub progress: JobProgress,
    /// Parent job that spawned this one via discovery fan-out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawned_from: Option<JobId>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
}

impl Job {
    /// Duplicate-suppression key: at most one active job may exist per key.
    pub fn dedup_key(&self) -> (AccountId, CrawlCommand, Option<String>) {
        (self.account_id.clone(), self.command, self.full_path.clone())
    }

    /// Whether this row has a checkpoint to resume from.
    pub fn has_resume_state(&self) -> bool {
        self.resume_state.as_ref().is_some_and(|v| !v.is_null())
    }
}

/// Fields needed to insert a job; the store assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub command: CrawlCommand,
    pub account_id: AccountId,
    pub provider_id: String,
    pub user_id: String,
    pub full_path: Option<String>,
    pub gitlab_graphql_url: Option<String>,
    pub spawned_from: Option<JobId>,
}

impl NewJob {
    pub fn into_job(self, id: JobId, now_ms: u64) -> Job {
        Job {
            id,
            command: self.command,
            status: JobStatus::Queued,
            account_id: self.account_id,
            provider_id: self.provider_id,
            user_id: self.user_id,
            full_path: self.full_path,
            gitlab_graphql_url: self.gitlab_graphql_url,
            branch: None,
            from: None,
            to: None,
            resume_state: None,
            progress: JobProgress::default(),
            spawned_from: self.spawned_from,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            started_at_ms: None,
            finished_at_ms: None,
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
