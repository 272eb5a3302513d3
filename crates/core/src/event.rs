// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store events: the WAL vocabulary for job and area state.
//!
//! Serializes with `{"type": "job:inserted", ...fields}` format. Unknown
//! type tags deserialize to `Custom` so old logs replay on newer builds.

use crate::area::Area;
use crate::job::{Job, JobId, JobProgress, JobStatus};
use serde::{Deserialize, Serialize};

/// Facts appended to the WAL; materialized state is derived by replay.
///
/// Handlers must be idempotent — an event may be applied once when
/// written and again during replay after restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StoreEvent {
    /// A job row was created. Carries the full row.
    #[serde(rename = "job:inserted")]
    JobInserted { job: Job },

    /// A job changed status. `error` lands in `progress.error`.
    #[serde(rename = "job:status")]
    JobStatusChanged {
        id: JobId,
        status: JobStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        at_ms: u64,
    },

    /// Resume-state checkpoint. Never clears `resume_state` implicitly;
    /// a `null` checkpoint is an explicit clear.
    #[serde(rename = "job:checkpoint")]
    JobCheckpointed {
        id: JobId,
        resume_state: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<JobProgress>,
        at_ms: u64,
    },

    /// Bulk reset after crawler loss: every `running` row back to
    /// `queued` with `started_at` cleared.
    #[serde(rename = "jobs:requeued")]
    RunningReset { ids: Vec<JobId>, at_ms: u64 },

    /// An area was seen for the first time.
    #[serde(rename = "area:discovered")]
    AreaDiscovered { area: Area },

    /// Catch-all for unknown event types (forward compatibility).
    #[serde(other, skip_serializing)]
    Custom,
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
