// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `dredgec` — the crawler worker process.

use dredge_bus::{roles, BusClient, BusClientConfig};
use dredge_core::SystemClock;
use dredge_crawler::{
    archive_path, env, BusOutbound, FsSink, GitLabClient, GitLabFetcherFactory, JobManager,
    ManagerConfig, ManagerDeps, TokenBroker,
};
use dredge_wire::Register;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let identity = Register {
        id: env::process_id(),
        pid: std::process::id(),
        role: roles::CRAWLER.to_string(),
    };
    let socket_path = env::socket_path();
    info!(id = %identity.id, socket = %socket_path.display(), "crawler starting");

    let cancel = CancellationToken::new();

    let mut client_config = BusClientConfig::new(socket_path, identity);
    client_config.heartbeat_timeout = env::heartbeat_timeout();
    let (client, client_events) =
        BusClient::spawn(client_config, SystemClock, cancel.clone());

    let http = GitLabClient::build_http(env::http_timeout());
    let deps = ManagerDeps {
        fetchers: Arc::new(GitLabFetcherFactory::new(http)),
        sink: Arc::new(FsSink::new(archive_path(&env::data_root()))),
        out: Arc::new(BusOutbound::new(client)),
        broker: Arc::new(TokenBroker::new(env::token_refresh_timeout())),
        clock: SystemClock,
    };
    let config = ManagerConfig {
        heartbeat_interval: env::heartbeat_interval(),
        page_throttle: env::page_throttle(),
    };

    let manager = JobManager::new(deps, config);
    let manager_cancel = cancel.clone();
    let manager_task = tokio::spawn(manager.run(client_events, manager_cancel));

    shutdown_signal().await;
    info!("shutdown signal received");
    cancel.cancel();
    // Settle window so queued updates drain before exit.
    let _ = tokio::time::timeout(std::time::Duration::from_secs(1), manager_task).await;
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(_) => return std::future::pending().await,
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}
