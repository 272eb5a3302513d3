// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixture: a full backend plus one crawler over a temp socket.

use async_trait::async_trait;
use dredge_backend::{
    AccountStore, JobLogWriter, Orchestrator, OrchestratorDeps, RefreshError, RefreshedTokens,
    Settings, TokenRefresher,
};
use dredge_bus::{roles, BusClient, BusClientConfig, BusServer, BusServerConfig};
use dredge_core::{Account, AccountId, SystemClock};
use dredge_crawler::{
    BusOutbound, FetchError, FetcherProvider, FsSink, JobManager, ManagerConfig, ManagerDeps,
    Page, PageFetcher, TokenBroker, TokenCell,
};
use dredge_store::JobStore;
use dredge_wire::{Register, TaskDescriptor};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

pub struct ScriptedFetcher {
    pages: Mutex<VecDeque<Result<Page, FetchError>>>,
    pub cursors: Mutex<Vec<(String, Option<String>)>>,
    pub gate: Option<Arc<Semaphore>>,
}

impl ScriptedFetcher {
    pub fn new(pages: Vec<Result<Page, FetchError>>) -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(pages.into()),
            cursors: Mutex::new(Vec::new()),
            gate: None,
        })
    }

    pub fn gated(pages: Vec<Result<Page, FetchError>>, gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(pages.into()),
            cursors: Mutex::new(Vec::new()),
            gate: Some(gate),
        })
    }
}

struct ScriptedFetcherHandle(Arc<ScriptedFetcher>);

#[async_trait]
impl PageFetcher for ScriptedFetcherHandle {
    async fn fetch_page(&self, data_type: &str, after: Option<&str>) -> Result<Page, FetchError> {
        if let Some(gate) = &self.0.gate {
            let permit = gate.acquire().await.map_err(|_| FetchError::Status { status: 0 })?;
            permit.forget();
        }
        self.0
            .cursors
            .lock()
            .unwrap()
            .push((data_type.to_string(), after.map(str::to_string)));
        let next = self.0.pages.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => Ok(Page::default()),
        }
    }
}

pub struct ScriptedProvider {
    pub fetcher: Arc<ScriptedFetcher>,
}

impl FetcherProvider for ScriptedProvider {
    fn fetcher_for(&self, _task: &TaskDescriptor, _token: TokenCell) -> Box<dyn PageFetcher> {
        Box::new(ScriptedFetcherHandle(Arc::clone(&self.fetcher)))
    }
}

struct NoRefresh;

#[async_trait]
impl TokenRefresher for NoRefresh {
    async fn refresh(
        &self,
        _account: &Account,
        _provider: &dredge_backend::ProviderSettings,
        _token_url: Option<String>,
        _now_ms: u64,
    ) -> Result<RefreshedTokens, RefreshError> {
        Err(RefreshError::NoRefreshToken)
    }

    async fn verify(&self, _token: &str, _verify_url: &str) -> bool {
        false
    }
}

pub struct Backend {
    pub store: Arc<JobStore<SystemClock>>,
    pub cancel: CancellationToken,
}

/// Start the backend: bus server + orchestrator with one account.
pub fn start_backend(dir: &Path, socket: &Path) -> Backend {
    let store = Arc::new(JobStore::open(&dir.join("store.wal"), SystemClock).unwrap());
    let accounts = Arc::new(AccountStore::load(&dir.join("accounts.toml")).unwrap());
    accounts
        .upsert(Account {
            id: AccountId::new("acct-spec"),
            provider_id: "gitlabCloud".to_string(),
            user_id: "user-spec".to_string(),
            access_token: "tok-spec".to_string(),
            refresh_token: Some("rt-spec".to_string()),
            access_token_expires_at_ms: None,
        })
        .unwrap();

    let settings: Settings = toml::from_str(
        r#"
        [auth.providers.gitlabCloud]
        client_id = "cid"
        client_secret = "cs"
        "#,
    )
    .unwrap();

    let (bus, bus_handle, bus_events) =
        BusServer::bind(BusServerConfig::new(socket.to_path_buf()), SystemClock).unwrap();
    let cancel = CancellationToken::new();
    tokio::spawn(bus.run(cancel.clone()));

    let mut orchestrator = Orchestrator::new(OrchestratorDeps {
        store: Arc::clone(&store),
        accounts,
        settings,
        bus: bus_handle,
        refresher: Arc::new(NoRefresh),
        joblog: JobLogWriter::new(dir.join("logs/jobs")),
        clock: SystemClock,
        discovery_cooldown: Duration::from_secs(48 * 3600),
        archive_base: dir.join("archive").display().to_string(),
        heartbeat_interval: Duration::from_secs(3600),
    });
    orchestrator.startup();
    tokio::spawn(orchestrator.run(bus_events, cancel.clone()));

    Backend { store, cancel }
}

/// Start a crawler process-equivalent against the same socket.
pub fn start_crawler(
    dir: &Path,
    socket: &Path,
    id: &str,
    fetcher: Arc<ScriptedFetcher>,
) -> CancellationToken {
    let cancel = CancellationToken::new();
    let identity = Register { id: id.to_string(), pid: 1, role: roles::CRAWLER.to_string() };
    let mut client_config = BusClientConfig::new(socket.to_path_buf(), identity);
    client_config.reconnect_base = Duration::from_millis(20);
    client_config.reconnect_max = Duration::from_millis(100);
    client_config.heartbeat_timeout = Duration::from_secs(3600);
    let (client, client_events) = BusClient::spawn(client_config, SystemClock, cancel.clone());

    let deps = ManagerDeps {
        fetchers: Arc::new(ScriptedProvider { fetcher }),
        sink: Arc::new(FsSink::new(dir.join("archive"))),
        out: Arc::new(BusOutbound::new(client)),
        broker: Arc::new(TokenBroker::new(Duration::from_secs(5))),
        clock: SystemClock,
    };
    let config = ManagerConfig {
        heartbeat_interval: Duration::from_secs(3600),
        page_throttle: Duration::ZERO,
    };
    tokio::spawn(JobManager::new(deps, config).run(client_events, cancel.clone()));
    cancel
}

/// Poll until `pred` holds or the timeout elapses.
pub async fn eventually(what: &str, mut pred: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !pred() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
