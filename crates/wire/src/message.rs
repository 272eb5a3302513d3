// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed payloads for every `type:key` pair on the bus.

use dredge_core::{
    AccountId, Area, CrawlCommand, Job, JobId, JobProgress, JobStatus, RequestId, ResourceType,
};
use serde::{Deserialize, Serialize};

use crate::envelope::EnvelopeError;

/// Crawler-side manager state, as reported over the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlerState {
    Idle,
    Running,
    Paused,
}

dredge_core::simple_display! {
    CrawlerState {
        Idle => "idle",
        Running => "running",
        Paused => "paused",
    }
}

/// `heartbeat:heartbeat` (both directions).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_jobs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_status: Option<String>,
}

/// `message:statusUpdate` (crawler → backend).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub state: CrawlerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_job_id: Option<JobId>,
    pub queue_size: u32,
    pub last_heartbeat: u64,
}

/// Terminal-or-pause outcome reported in a `jobUpdate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobUpdateStatus {
    Completed,
    Failed,
    Paused,
}

dredge_core::simple_display! {
    JobUpdateStatus {
        Completed => "completed",
        Failed => "failed",
        Paused => "paused",
    }
}

impl JobUpdateStatus {
    /// Store status this update maps to.
    pub fn job_status(&self) -> JobStatus {
        match self {
            JobUpdateStatus::Completed => JobStatus::Finished,
            JobUpdateStatus::Failed => JobStatus::Failed,
            JobUpdateStatus::Paused => JobStatus::Paused,
        }
    }
}

/// `message:jobUpdate` (crawler → backend).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdate {
    pub job_id: JobId,
    pub status: JobUpdateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<JobProgress>,
    pub timestamp: u64,
}

/// `message:jobProgress` (crawler → backend): between-pages checkpoint.
///
/// Loss-tolerant by design — a pruned checkpoint only means a resumed job
/// re-fetches from an older cursor, and the sink is idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressUpdate {
    pub job_id: JobId,
    pub progress: JobProgress,
    pub resume_state: serde_json::Value,
    pub timestamp: u64,
}

/// `message:JOB_FAILURE_LOGS` (crawler → backend).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailureLogs {
    pub job_id: JobId,
    pub lines: Vec<String>,
}

/// `message:TOKEN_REFRESH_REQUEST` (crawler → backend).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRefreshRequest {
    pub request_id: RequestId,
    pub provider_id: String,
    pub account_id: AccountId,
    pub user_id: String,
}

/// `message:TOKEN_REFRESH_RESPONSE` (backend → crawler).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRefreshResponse {
    pub request_id: RequestId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `message:areaDiscovered` (crawler → backend): child namespaces found
/// while paginating a discovery data type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreasDiscovered {
    /// Job whose pagination surfaced these areas.
    pub job_id: JobId,
    pub areas: Vec<Area>,
}

/// `command:register` — first envelope on every client connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Register {
    pub id: String,
    pub pid: u32,
    /// Role: `crawler`, `admin`, or `supervisor`.
    #[serde(rename = "type")]
    pub role: String,
}

/// OAuth material handed to the crawler inside a task descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

/// Where crawled records land.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputConfig {
    pub storage_type: String,
    pub base_path: String,
    pub format: String,
}

impl OutputConfig {
    pub fn filesystem(base_path: impl Into<String>) -> Self {
        Self {
            storage_type: "filesystem".to_string(),
            base_path: base_path.into(),
            format: "json".to_string(),
        }
    }
}

/// Job-specific knobs carried alongside the descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_state: Option<serde_json::Value>,
}

/// `command:START_JOB` — everything a crawler needs to execute a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDescriptor {
    pub task_id: JobId,
    pub command: CrawlCommand,
    pub gitlab_api_url: String,
    /// Authorization behind this task; echoed back in refresh requests.
    pub provider_id: String,
    pub account_id: AccountId,
    pub user_id: String,
    pub credentials: Credentials,
    pub resource_type: ResourceType,
    /// Provider id of the target area; `null` for discovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<serde_json::Value>,
    pub data_types: Vec<String>,
    pub output_config: OutputConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_id: Option<String>,
    #[serde(default)]
    pub custom_parameters: CustomParameters,
    /// Target namespace; the sink keys records by it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_path: Option<String>,
}

/// `command:START_DISCOVERY` (admin → backend): run authorization intake.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartDiscovery {
    /// Restrict to one account; `None` means every stored account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<AccountId>,
}

/// `stateChange:crawlerState` (crawler → backend).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub state: CrawlerState,
    pub timestamp: u64,
}

/// `subscription:subscribe` — mark a connection as interested in
/// broadcast keys (admin clients watching status updates).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subscribe {
    #[serde(default)]
    pub keys: Vec<String>,
}

/// Compact job row for the admin surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: JobId,
    pub command: CrawlCommand,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            command: job.command,
            status: job.status,
            full_path: job.full_path.clone(),
            error: job.progress.error.clone(),
            created_at_ms: job.created_at_ms,
            updated_at_ms: job.updated_at_ms,
            finished_at_ms: job.finished_at_ms,
        }
    }
}

/// `message:jobList` (backend → admin).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobList {
    pub jobs: Vec<JobSummary>,
}

/// Every message the bus understands, keyed by `type:key`.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Heartbeat(Heartbeat),
    StatusUpdate(StatusUpdate),
    JobUpdate(JobUpdate),
    JobProgress(JobProgressUpdate),
    JobFailureLogs(JobFailureLogs),
    TokenRefreshRequest(TokenRefreshRequest),
    TokenRefreshResponse(TokenRefreshResponse),
    AreasDiscovered(AreasDiscovered),
    JobList(JobList),
    Register(Register),
    StartJob(Box<TaskDescriptor>),
    PauseCrawler,
    ResumeCrawler,
    GetStatus,
    GetJobs,
    Shutdown,
    StartDiscovery(StartDiscovery),
    StateChange(StateChange),
    Subscribe(Subscribe),
}

fn to_value<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

impl Payload {
    /// Wire `(type, key, payload)` triple.
    pub fn encode(&self) -> (&'static str, &'static str, serde_json::Value) {
        match self {
            Payload::Heartbeat(p) => ("heartbeat", "heartbeat", to_value(p)),
            Payload::StatusUpdate(p) => ("message", "statusUpdate", to_value(p)),
            Payload::JobUpdate(p) => ("message", "jobUpdate", to_value(p)),
            Payload::JobProgress(p) => ("message", "jobProgress", to_value(p)),
            Payload::JobFailureLogs(p) => ("message", "JOB_FAILURE_LOGS", to_value(p)),
            Payload::TokenRefreshRequest(p) => ("message", "TOKEN_REFRESH_REQUEST", to_value(p)),
            Payload::TokenRefreshResponse(p) => ("message", "TOKEN_REFRESH_RESPONSE", to_value(p)),
            Payload::AreasDiscovered(p) => ("message", "areaDiscovered", to_value(p)),
            Payload::JobList(p) => ("message", "jobList", to_value(p)),
            Payload::Register(p) => ("command", "register", to_value(p)),
            Payload::StartJob(p) => ("command", "START_JOB", to_value(p)),
            Payload::PauseCrawler => ("command", "PAUSE_CRAWLER", empty()),
            Payload::ResumeCrawler => ("command", "RESUME_CRAWLER", empty()),
            Payload::GetStatus => ("command", "GET_STATUS", empty()),
            Payload::GetJobs => ("command", "GET_JOBS", empty()),
            Payload::Shutdown => ("command", "SHUTDOWN", empty()),
            Payload::StartDiscovery(p) => ("command", "START_DISCOVERY", to_value(p)),
            Payload::StateChange(p) => ("stateChange", "crawlerState", to_value(p)),
            Payload::Subscribe(p) => ("subscription", "subscribe", to_value(p)),
        }
    }

    /// Parse a payload for a `type:key` pair. Unknown pairs are an error.
    pub fn decode(
        msg_type: &str,
        key: &str,
        payload: serde_json::Value,
    ) -> Result<Self, EnvelopeError> {
        let parsed = match (msg_type, key) {
            ("heartbeat", "heartbeat") => Payload::Heartbeat(from_value(payload)?),
            ("message", "statusUpdate") => Payload::StatusUpdate(from_value(payload)?),
            ("message", "jobUpdate") => Payload::JobUpdate(from_value(payload)?),
            ("message", "jobProgress") => Payload::JobProgress(from_value(payload)?),
            ("message", "JOB_FAILURE_LOGS") => Payload::JobFailureLogs(from_value(payload)?),
            ("message", "TOKEN_REFRESH_REQUEST") => {
                Payload::TokenRefreshRequest(from_value(payload)?)
            }
            ("message", "TOKEN_REFRESH_RESPONSE") => {
                Payload::TokenRefreshResponse(from_value(payload)?)
            }
            ("message", "areaDiscovered") => Payload::AreasDiscovered(from_value(payload)?),
            ("message", "jobList") => Payload::JobList(from_value(payload)?),
            ("command", "register") => Payload::Register(from_value(payload)?),
            ("command", "START_JOB") => Payload::StartJob(Box::new(from_value(payload)?)),
            ("command", "PAUSE_CRAWLER") => Payload::PauseCrawler,
            ("command", "RESUME_CRAWLER") => Payload::ResumeCrawler,
            ("command", "GET_STATUS") => Payload::GetStatus,
            ("command", "GET_JOBS") => Payload::GetJobs,
            ("command", "SHUTDOWN") => Payload::Shutdown,
            ("command", "START_DISCOVERY") => Payload::StartDiscovery(from_value(payload)?),
            ("stateChange", "crawlerState") => Payload::StateChange(from_value(payload)?),
            ("subscription", "subscribe") => Payload::Subscribe(from_value(payload)?),
            _ => {
                return Err(EnvelopeError::UnknownKey {
                    msg_type: msg_type.to_string(),
                    key: key.to_string(),
                })
            }
        };
        Ok(parsed)
    }

    /// Messages that must survive outgoing-queue pruning: job-state
    /// transitions, discoveries, and token traffic. Heartbeats and
    /// status snapshots are re-established by the next tick.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Payload::JobUpdate(_)
                | Payload::JobFailureLogs(_)
                | Payload::AreasDiscovered(_)
                | Payload::TokenRefreshRequest(_)
                | Payload::TokenRefreshResponse(_)
                | Payload::StartJob(_)
        )
    }

    /// Short name for log lines.
    pub fn key(&self) -> &'static str {
        match self {
            Payload::Heartbeat(_) => "heartbeat",
            Payload::StatusUpdate(_) => "statusUpdate",
            Payload::JobUpdate(_) => "jobUpdate",
            Payload::JobProgress(_) => "jobProgress",
            Payload::JobFailureLogs(_) => "JOB_FAILURE_LOGS",
            Payload::TokenRefreshRequest(_) => "TOKEN_REFRESH_REQUEST",
            Payload::TokenRefreshResponse(_) => "TOKEN_REFRESH_RESPONSE",
            Payload::AreasDiscovered(_) => "areaDiscovered",
            Payload::JobList(_) => "jobList",
            Payload::Register(_) => "register",
            Payload::StartJob(_) => "START_JOB",
            Payload::PauseCrawler => "PAUSE_CRAWLER",
            Payload::ResumeCrawler => "RESUME_CRAWLER",
            Payload::GetStatus => "GET_STATUS",
            Payload::GetJobs => "GET_JOBS",
            Payload::Shutdown => "SHUTDOWN",
            Payload::StartDiscovery(_) => "START_DISCOVERY",
            Payload::StateChange(_) => "crawlerState",
            Payload::Subscribe(_) => "subscribe",
        }
    }
}

fn empty() -> serde_json::Value {
    serde_json::json!({})
}

fn from_value<T: serde::de::DeserializeOwned>(
    value: serde_json::Value,
) -> Result<T, EnvelopeError> {
    serde_json::from_value(value).map_err(EnvelopeError::Malformed)
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
