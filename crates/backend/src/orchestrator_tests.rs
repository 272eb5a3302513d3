// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orchestrator scenarios: intake cooldown, dispatch, discovery fan-out
//! with duplicate suppression, job-update mapping, crawler loss, and the
//! token-refresh round-trip.

use super::*;
use crate::token::{RefreshError, RefreshedTokens};
use async_trait::async_trait;
use dredge_bus::{BusServer, BusServerConfig};
use dredge_core::{test_support, AccountId, AreaKind, FakeClock, JobId, RequestId};
use dredge_wire::{write_frame, Destination, Envelope, FrameDecoder, Register, DEFAULT_MAX_FRAME_LEN};
use parking_lot::Mutex as PlMutex;
use tokio::io::AsyncReadExt;
use tokio::net::UnixStream;

struct FakeRefresher {
    verify_ok: bool,
    refresh_result: PlMutex<Option<Result<RefreshedTokens, RefreshError>>>,
}

impl FakeRefresher {
    fn new(verify_ok: bool, refresh_result: Result<RefreshedTokens, RefreshError>) -> Arc<Self> {
        Arc::new(Self { verify_ok, refresh_result: PlMutex::new(Some(refresh_result)) })
    }
}

#[async_trait]
impl TokenRefresher for FakeRefresher {
    async fn refresh(
        &self,
        _account: &Account,
        _provider: &crate::settings::ProviderSettings,
        _token_url: Option<String>,
        _now_ms: u64,
    ) -> Result<RefreshedTokens, RefreshError> {
        self.refresh_result.lock().take().unwrap_or(Err(RefreshError::NoRefreshToken))
    }

    async fn verify(&self, _token: &str, _verify_url: &str) -> bool {
        self.verify_ok
    }
}

struct Fixture {
    orchestrator: Orchestrator<FakeClock>,
    store: Arc<JobStore<FakeClock>>,
    accounts: Arc<AccountStore>,
    clock: FakeClock,
    bus_events: mpsc::Receiver<BusEvent>,
    socket: std::path::PathBuf,
    joblog_dir: std::path::PathBuf,
    cancel: CancellationToken,
    _dir: tempfile::TempDir,
}

const TEST_SETTINGS: &str = r#"
[auth.providers.gitlabCloud]
client_id = "cid"
client_secret = "cs"
"#;

async fn fixture_with(refresher: Arc<FakeRefresher>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::new();
    let store =
        Arc::new(JobStore::open(&dir.path().join("store.wal"), clock.clone()).unwrap());
    let accounts = Arc::new(AccountStore::load(&dir.path().join("accounts.toml")).unwrap());
    accounts.upsert(test_support::account("acct-test")).unwrap();

    let socket = dir.path().join("api.sock");
    let (bus, bus_handle, bus_events) =
        BusServer::bind(BusServerConfig::new(socket.clone()), clock.clone()).unwrap();
    let cancel = CancellationToken::new();
    tokio::spawn(bus.run(cancel.clone()));

    let joblog_dir = dir.path().join("logs/jobs");
    let settings: Settings = toml::from_str(TEST_SETTINGS).unwrap();
    let orchestrator = Orchestrator::new(OrchestratorDeps {
        store: Arc::clone(&store),
        accounts: Arc::clone(&accounts),
        settings,
        bus: bus_handle,
        refresher,
        joblog: JobLogWriter::new(&joblog_dir),
        clock: clock.clone(),
        discovery_cooldown: Duration::from_secs(48 * 3600),
        archive_base: "/srv/archive".to_string(),
        heartbeat_interval: Duration::from_secs(3600),
    });

    Fixture {
        orchestrator,
        store,
        accounts,
        clock,
        bus_events,
        socket,
        joblog_dir,
        cancel,
        _dir: dir,
    }
}

async fn fixture() -> Fixture {
    fixture_with(FakeRefresher::new(
        false,
        Ok(RefreshedTokens {
            access_token: "tok-new".to_string(),
            refresh_token: Some("rt-new".to_string()),
            expires_at_ms: Some(777),
        }),
    ))
    .await
}

impl Fixture {
    /// Connect a raw crawler client, register it, and replay the bus
    /// events into the orchestrator so the registry and handlers agree.
    async fn connect_crawler(&mut self) -> (UnixStream, ConnectionId) {
        let mut stream = UnixStream::connect(&self.socket).await.unwrap();
        let register = Envelope::new(
            "crawler-1",
            Destination::backend(),
            Payload::Register(Register {
                id: "crawler-1".to_string(),
                pid: 7,
                role: roles::CRAWLER.to_string(),
            }),
            1,
        );
        write_frame(&mut stream, &register).await.unwrap();

        let mut connection_id = None;
        for _ in 0..2 {
            let event = tokio::time::timeout(Duration::from_secs(2), self.bus_events.recv())
                .await
                .unwrap()
                .unwrap();
            if let BusEvent::Registered { connection_id: id, .. } = &event {
                connection_id = Some(id.clone());
            }
            self.orchestrator.handle_event(event);
        }
        (stream, connection_id.unwrap())
    }

    fn message(&mut self, connection_id: &ConnectionId, payload: Payload) {
        self.orchestrator.handle_event(BusEvent::Message {
            connection_id: connection_id.clone(),
            envelope: Envelope::new("crawler-1", Destination::backend(), payload, 1),
        });
    }

    fn queued_discovery(&self) -> Option<dredge_core::Job> {
        self.store
            .jobs_snapshot()
            .into_iter()
            .find(|j| j.command == CrawlCommand::GroupProjectDiscovery)
    }
}

async fn read_one(stream: &mut UnixStream) -> Envelope {
    let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME_LEN);
    let mut buf = [0u8; 8192];
    loop {
        if let Some(frame) = decoder.next_frame() {
            return Envelope::from_value(frame.unwrap()).unwrap();
        }
        let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
            .await
            .expect("timed out reading envelope")
            .unwrap();
        assert!(n > 0, "server closed the connection");
        decoder.push(&buf[..n]);
    }
}

#[tokio::test]
async fn startup_queues_discovery_and_respects_cooldown() {
    let mut f = fixture().await;
    f.orchestrator.startup();

    let discovery = f.queued_discovery().expect("discovery job queued");
    assert_eq!(discovery.status, JobStatus::Queued);
    assert_eq!(
        discovery.gitlab_graphql_url.as_deref(),
        Some("https://gitlab.com/api/graphql")
    );

    // Finish it, run intake again inside the window: nothing changes.
    f.store.update_status(&discovery.id, JobStatus::Finished, None).unwrap();
    let account = f.accounts.get(&AccountId::new("acct-test")).unwrap();
    f.orchestrator.intake_account(&account);
    assert_eq!(f.queued_discovery().unwrap().status, JobStatus::Finished);

    // Outside the window the same row is requeued.
    f.clock.advance(Duration::from_secs(49 * 3600));
    f.orchestrator.intake_account(&account);
    let requeued = f.queued_discovery().unwrap();
    assert_eq!(requeued.id, discovery.id);
    assert_eq!(requeued.status, JobStatus::Queued);

    f.cancel.cancel();
}

#[tokio::test]
async fn registered_crawler_receives_a_hydrated_start_job() {
    let mut f = fixture().await;
    f.orchestrator.startup();
    let (mut stream, _conn) = f.connect_crawler().await;

    let envelope = read_one(&mut stream).await;
    let Payload::StartJob(task) = envelope.payload else {
        panic!("expected START_JOB, got {}", envelope.payload.key());
    };
    assert_eq!(task.command, CrawlCommand::GroupProjectDiscovery);
    assert_eq!(task.credentials.access_token, "tok-access");
    assert_eq!(task.gitlab_api_url, "https://gitlab.com");

    // The dispatched job is running in the store.
    assert_eq!(f.store.count_with_status(JobStatus::Running), 1);

    f.cancel.cancel();
}

#[tokio::test]
async fn discoveries_fan_out_once_per_area_and_command() {
    let mut f = fixture().await;
    f.orchestrator.startup();
    let (_stream, conn) = f.connect_crawler().await;
    let parent = f.queued_discovery().unwrap();

    let areas = vec![test_support::group_area("g/a"), test_support::group_area("g/b")];
    f.message(
        &conn,
        Payload::AreasDiscovered(AreasDiscovered {
            job_id: parent.id.clone(),
            areas: areas.clone(),
        }),
    );
    // Scenario 4: a later page repeats g/a — suppressed entirely.
    f.message(
        &conn,
        Payload::AreasDiscovered(AreasDiscovered {
            job_id: parent.id.clone(),
            areas: vec![test_support::group_area("g/a")],
        }),
    );

    assert!(f.store.area("g/a").is_some());
    assert!(f.store.area("g/b").is_some());

    let jobs = f.store.jobs_snapshot();
    let group_commands = CrawlCommand::group_commands().len();
    for area in ["g/a", "g/b"] {
        let per_area =
            jobs.iter().filter(|j| j.full_path.as_deref() == Some(area)).count();
        assert_eq!(per_area, group_commands, "exactly one job per command for {area}");
    }
    // Children remember their parent.
    assert!(jobs
        .iter()
        .filter(|j| j.full_path.is_some())
        .all(|j| j.spawned_from.as_ref() == Some(&parent.id)));

    f.cancel.cancel();
}

#[tokio::test]
async fn project_areas_fan_out_project_commands() {
    let mut f = fixture().await;
    f.orchestrator.startup();
    let (_stream, conn) = f.connect_crawler().await;
    let parent = f.queued_discovery().unwrap();

    f.message(
        &conn,
        Payload::AreasDiscovered(AreasDiscovered {
            job_id: parent.id.clone(),
            areas: vec![test_support::project_area("g/a/p")],
        }),
    );

    let jobs = f.store.jobs_snapshot();
    let commands: Vec<CrawlCommand> = jobs
        .iter()
        .filter(|j| j.full_path.as_deref() == Some("g/a/p"))
        .map(|j| j.command)
        .collect();
    for required in [CrawlCommand::Project, CrawlCommand::Issues, CrawlCommand::MergeRequests] {
        assert!(commands.contains(&required), "missing {required}");
    }
    assert_eq!(f.store.area("g/a/p").unwrap().kind, AreaKind::Project);

    f.cancel.cancel();
}

#[tokio::test]
async fn job_updates_map_onto_store_statuses() {
    let mut f = fixture().await;
    f.orchestrator.startup();
    let (mut stream, conn) = f.connect_crawler().await;

    // The dispatched discovery job is running.
    let envelope = read_one(&mut stream).await;
    let Payload::StartJob(task) = envelope.payload else { panic!("expected START_JOB") };
    let job_id = task.task_id.clone();

    // Progress checkpoints persist resume state.
    let mut progress = dredge_core::JobProgress::default();
    progress.data_type_mut("discover_all_groups_projects").item_count = 37;
    f.message(
        &conn,
        Payload::JobProgress(dredge_wire::JobProgressUpdate {
            job_id: job_id.clone(),
            progress: progress.clone(),
            resume_state: serde_json::json!({"groupCursor": "gc7", "groupCount": 37}),
            timestamp: 2,
        }),
    );
    let row = f.store.job(&job_id).unwrap();
    assert_eq!(row.resume_state, Some(serde_json::json!({"groupCursor": "gc7", "groupCount": 37})));
    assert_eq!(row.progress.data_types["discover_all_groups_projects"].item_count, 37);

    // Completion clears the checkpoint.
    f.message(
        &conn,
        Payload::JobUpdate(JobUpdate {
            job_id: job_id.clone(),
            status: JobUpdateStatus::Completed,
            error: None,
            progress: Some(progress),
            timestamp: 3,
        }),
    );
    let row = f.store.job(&job_id).unwrap();
    assert_eq!(row.status, JobStatus::Finished);
    assert!(row.resume_state.is_none());

    f.cancel.cancel();
}

#[tokio::test]
async fn failed_update_records_error_and_operator_log() {
    let mut f = fixture().await;
    f.orchestrator.startup();
    let (mut stream, conn) = f.connect_crawler().await;
    let envelope = read_one(&mut stream).await;
    let Payload::StartJob(task) = envelope.payload else { panic!("expected START_JOB") };

    f.message(
        &conn,
        Payload::JobUpdate(JobUpdate {
            job_id: task.task_id.clone(),
            status: JobUpdateStatus::Failed,
            error: Some("HTTP 502 from provider".to_string()),
            progress: None,
            timestamp: 5,
        }),
    );
    f.message(
        &conn,
        Payload::JobFailureLogs(dredge_wire::JobFailureLogs {
            job_id: task.task_id.clone(),
            lines: vec!["stderr: upstream bad gateway".to_string()],
        }),
    );

    let row = f.store.job(&task.task_id).unwrap();
    assert_eq!(row.status, JobStatus::Failed);
    assert_eq!(row.progress.error.as_deref(), Some("HTTP 502 from provider"));

    let log = JobLogWriter::new(&f.joblog_dir).read(&task.task_id);
    assert!(log.contains("HTTP 502 from provider"));
    assert!(log.contains("upstream bad gateway"));

    f.cancel.cancel();
}

#[tokio::test]
async fn paused_update_persists_resume_state_from_progress() {
    let mut f = fixture().await;
    f.orchestrator.startup();
    // Queue a paginated child job and dispatch it instead of discovery.
    let discovery = f.queued_discovery().unwrap();
    f.store.update_status(&discovery.id, JobStatus::Finished, None).unwrap();
    f.store
        .insert_job_if_absent(test_support::new_job(CrawlCommand::Issues, Some("g/a/p")))
        .unwrap();
    let (mut stream, conn) = f.connect_crawler().await;
    let envelope = read_one(&mut stream).await;
    let Payload::StartJob(task) = envelope.payload else { panic!("expected START_JOB") };
    assert_eq!(task.command, CrawlCommand::Issues);

    let mut progress = dredge_core::JobProgress::default();
    progress.data_type_mut("issues").after_cursor = Some("c4".to_string());
    f.message(
        &conn,
        Payload::JobUpdate(JobUpdate {
            job_id: task.task_id.clone(),
            status: JobUpdateStatus::Paused,
            error: None,
            progress: Some(progress),
            timestamp: 9,
        }),
    );

    let row = f.store.job(&task.task_id).unwrap();
    assert_eq!(row.status, JobStatus::Paused);
    assert_eq!(row.resume_state.unwrap()["issues"]["afterCursor"], "c4");

    f.cancel.cancel();
}

#[tokio::test]
async fn crawler_loss_resets_running_jobs() {
    let mut f = fixture().await;
    f.orchestrator.startup();
    let (stream, conn) = f.connect_crawler().await;
    assert_eq!(f.store.count_with_status(JobStatus::Running), 1);

    drop(stream);
    let event = tokio::time::timeout(Duration::from_secs(2), f.bus_events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, BusEvent::Disconnected { .. }));
    f.orchestrator.handle_event(event);

    assert_eq!(f.store.count_with_status(JobStatus::Running), 0);
    assert_eq!(f.store.count_with_status(JobStatus::Queued), 1);
    assert!(f.orchestrator.state().crawler_status.is_none());
    let _ = conn;

    f.cancel.cancel();
}

#[tokio::test]
async fn token_refresh_round_trip_updates_accounts_and_replies() {
    let mut f = fixture().await;
    let (mut stream, conn) = f.connect_crawler().await;

    let request = TokenRefreshRequest {
        request_id: RequestId::new("req-R1"),
        provider_id: "gitlabCloud".to_string(),
        account_id: AccountId::new("acct-test"),
        user_id: "user-1".to_string(),
    };
    f.message(&conn, Payload::TokenRefreshRequest(request));

    let envelope = read_one(&mut stream).await;
    let Payload::TokenRefreshResponse(response) = envelope.payload else {
        panic!("expected TOKEN_REFRESH_RESPONSE, got {}", envelope.payload.key());
    };
    assert_eq!(response.request_id, RequestId::new("req-R1"));
    assert!(response.success);
    assert_eq!(response.access_token.as_deref(), Some("tok-new"));
    assert_eq!(response.expires_at, Some(777));

    let account = f.accounts.get(&AccountId::new("acct-test")).unwrap();
    assert_eq!(account.access_token, "tok-new");
    assert_eq!(account.refresh_token.as_deref(), Some("rt-new"));

    f.cancel.cancel();
}

#[tokio::test]
async fn failed_refresh_reports_the_error() {
    let mut f =
        fixture_with(FakeRefresher::new(false, Err(RefreshError::Endpoint { status: 400 })))
            .await;
    let (mut stream, conn) = f.connect_crawler().await;

    f.message(
        &conn,
        Payload::TokenRefreshRequest(TokenRefreshRequest {
            request_id: RequestId::new("req-R2"),
            provider_id: "gitlabCloud".to_string(),
            account_id: AccountId::new("acct-test"),
            user_id: "user-1".to_string(),
        }),
    );

    let envelope = read_one(&mut stream).await;
    let Payload::TokenRefreshResponse(response) = envelope.payload else {
        panic!("expected TOKEN_REFRESH_RESPONSE");
    };
    assert!(!response.success);
    assert!(response.error.as_deref().unwrap().contains("400"));

    f.cancel.cancel();
}

#[tokio::test]
async fn still_valid_token_short_circuits_the_grant() {
    let mut f = fixture_with(FakeRefresher::new(
        true,
        Err(RefreshError::NoRefreshToken), // would fail if the grant ran
    ))
    .await;
    let (mut stream, conn) = f.connect_crawler().await;

    f.message(
        &conn,
        Payload::TokenRefreshRequest(TokenRefreshRequest {
            request_id: RequestId::new("req-R3"),
            provider_id: "gitlabCloud".to_string(),
            account_id: AccountId::new("acct-test"),
            user_id: "user-1".to_string(),
        }),
    );

    let envelope = read_one(&mut stream).await;
    let Payload::TokenRefreshResponse(response) = envelope.payload else {
        panic!("expected TOKEN_REFRESH_RESPONSE");
    };
    assert!(response.success);
    // The still-valid current token is handed back unchanged.
    assert_eq!(response.access_token.as_deref(), Some("tok-access"));

    f.cancel.cancel();
}

#[tokio::test]
async fn get_status_replies_with_the_cached_crawler_view() {
    let mut f = fixture().await;
    let (mut stream, conn) = f.connect_crawler().await;

    f.message(
        &conn,
        Payload::StatusUpdate(StatusUpdate {
            state: CrawlerState::Running,
            current_job_id: Some(JobId::new("job-X")),
            queue_size: 3,
            last_heartbeat: 42,
        }),
    );
    f.message(&conn, Payload::GetStatus);

    let envelope = read_one(&mut stream).await;
    let Payload::StatusUpdate(status) = envelope.payload else {
        panic!("expected statusUpdate");
    };
    assert_eq!(status.state, CrawlerState::Running);
    assert_eq!(status.queue_size, 3);

    f.cancel.cancel();
}

#[tokio::test]
async fn get_jobs_returns_the_job_history() {
    let mut f = fixture().await;
    f.orchestrator.startup();
    let (mut stream, conn) = f.connect_crawler().await;
    // Drain the dispatched START_JOB first.
    let _ = read_one(&mut stream).await;

    f.message(&conn, Payload::GetJobs);
    let envelope = read_one(&mut stream).await;
    let Payload::JobList(list) = envelope.payload else { panic!("expected jobList") };
    assert_eq!(list.jobs.len(), 1);
    assert_eq!(list.jobs[0].command, CrawlCommand::GroupProjectDiscovery);

    f.cancel.cancel();
}
