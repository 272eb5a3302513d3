// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `dredged` — the backend control-plane daemon.

use dredge_backend::{
    env, AccountStore, HttpTokenRefresher, JobLogWriter, Orchestrator, OrchestratorDeps, Settings,
};
use dredge_bus::{BusServer, BusServerConfig};
use dredge_core::SystemClock;
use dredge_store::JobStore;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn init_tracing() -> tracing_appender::non_blocking::WorkerGuard {
    let log_dir = env::data_root().join("logs");
    let appender = tracing_appender::rolling::daily(log_dir, "dredged.log");
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();
    guard
}

#[tokio::main]
async fn main() -> ExitCode {
    let _log_guard = init_tracing();

    let settings = match Settings::load(&env::settings_file()) {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "failed to load settings");
            return ExitCode::FAILURE;
        }
    };
    let accounts = match AccountStore::load(&env::accounts_file()) {
        Ok(accounts) => Arc::new(accounts),
        Err(e) => {
            error!(error = %e, "failed to load accounts");
            return ExitCode::FAILURE;
        }
    };
    let store = match JobStore::open(&env::store_path(), SystemClock) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "failed to open job store");
            return ExitCode::FAILURE;
        }
    };

    let mut bus_config = BusServerConfig::new(env::socket_path());
    bus_config.heartbeat_timeout = env::heartbeat_timeout();
    let (bus, bus_handle, bus_events) = match BusServer::bind(bus_config, SystemClock) {
        Ok(parts) => parts,
        Err(e) => {
            error!(error = %e, "failed to bind bus socket");
            return ExitCode::FAILURE;
        }
    };

    let archive_base = settings
        .output
        .base_path
        .clone()
        .unwrap_or_else(|| env::data_root().join("archive").display().to_string());

    let deps = OrchestratorDeps {
        store,
        accounts,
        settings,
        bus: bus_handle,
        refresher: Arc::new(HttpTokenRefresher::with_timeout(env::http_timeout())),
        joblog: JobLogWriter::new(env::job_log_dir()),
        clock: SystemClock,
        discovery_cooldown: env::discovery_cooldown(),
        archive_base,
        heartbeat_interval: env::heartbeat_interval(),
    };

    let cancel = CancellationToken::new();
    let mut orchestrator = Orchestrator::new(deps);
    orchestrator.startup();

    let bus_task = tokio::spawn(bus.run(cancel.clone()));
    let orchestrator_task = tokio::spawn(orchestrator.run(bus_events, cancel.clone()));
    info!("backend running");

    shutdown_signal().await;
    info!("shutdown signal received");
    cancel.cancel();
    // Settle window: let the shutdown broadcast and final writes drain.
    let settle = std::time::Duration::from_secs(1);
    let _ = tokio::time::timeout(settle, orchestrator_task).await;
    let _ = tokio::time::timeout(settle, bus_task).await;
    ExitCode::SUCCESS
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
