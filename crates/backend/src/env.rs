// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the backend daemon.

use std::path::PathBuf;
use std::time::Duration;

/// Data root: `DATA_ROOT`, then `~/.local/share/dredge`, then `./data`.
pub fn data_root() -> PathBuf {
    if let Ok(dir) = std::env::var("DATA_ROOT") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::data_dir().map(|d| d.join("dredge")).unwrap_or_else(|| PathBuf::from("data"))
}

/// Bus socket: `SOCKET_PATH` or the default under the data root.
pub fn socket_path() -> PathBuf {
    std::env::var("SOCKET_PATH")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| data_root().join("config/api.sock"))
}

/// Settings file: `SETTINGS_FILE` or `<data_root>/config/settings.toml`.
pub fn settings_file() -> PathBuf {
    std::env::var("SETTINGS_FILE")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| data_root().join("config/settings.toml"))
}

/// Accounts file lives next to the settings.
pub fn accounts_file() -> PathBuf {
    data_root().join("config/accounts.toml")
}

/// WAL path for the job store.
pub fn store_path() -> PathBuf {
    data_root().join("state/jobs.wal")
}

/// Directory for per-job operator logs.
pub fn job_log_dir() -> PathBuf {
    data_root().join("logs/jobs")
}

fn duration_ms(var: &str, default: Duration) -> Duration {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

/// Per-connection heartbeat timeout on the bus server.
pub fn heartbeat_timeout() -> Duration {
    duration_ms("HEARTBEAT_TIMEOUT_MS", Duration::from_secs(30))
}

/// Interval for the backend's own heartbeat broadcast.
pub fn heartbeat_interval() -> Duration {
    duration_ms("HEARTBEAT_INTERVAL_MS", Duration::from_secs(30))
}

/// Discovery cooldown (default 48 h).
pub fn discovery_cooldown() -> Duration {
    duration_ms("DISCOVERY_COOLDOWN_MS", Duration::from_secs(48 * 3600))
}

/// Outbound HTTP timeout for token endpoints.
pub fn http_timeout() -> Duration {
    duration_ms("HTTP_TIMEOUT_MS", Duration::from_secs(60))
}
