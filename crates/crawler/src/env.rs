// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the crawler process.

use std::path::PathBuf;
use std::time::Duration;

/// Data root: `DATA_ROOT` or `./data`.
pub fn data_root() -> PathBuf {
    std::env::var("DATA_ROOT").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("data"))
}

/// Bus socket: `SOCKET_PATH`, falling back to `SUPERVISOR_SOCKET_PATH`,
/// then the default under the data root.
pub fn socket_path() -> PathBuf {
    for var in ["SOCKET_PATH", "SUPERVISOR_SOCKET_PATH"] {
        if let Ok(path) = std::env::var(var) {
            if !path.is_empty() {
                return PathBuf::from(path);
            }
        }
    }
    data_root().join("config/api.sock")
}

/// Stable process identity on the bus: `SUPERVISOR_PROCESS_ID` or
/// `crawler-<pid>`.
pub fn process_id() -> String {
    std::env::var("SUPERVISOR_PROCESS_ID")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("crawler-{}", std::process::id()))
}

fn duration_ms(var: &str, default: Duration) -> Duration {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

/// Heartbeat emission interval (default 30 s, testable down to 1 s).
pub fn heartbeat_interval() -> Duration {
    duration_ms("HEARTBEAT_INTERVAL_MS", Duration::from_secs(30))
}

/// How long the backend may go silent before we force a reconnect.
pub fn heartbeat_timeout() -> Duration {
    duration_ms("HEARTBEAT_TIMEOUT_MS", Duration::from_secs(30))
}

/// Delay between pages.
pub fn page_throttle() -> Duration {
    duration_ms("PAGE_THROTTLE_MS", Duration::from_millis(200))
}

/// Outbound HTTP timeout.
pub fn http_timeout() -> Duration {
    duration_ms("HTTP_TIMEOUT_MS", Duration::from_secs(60))
}

/// Token-refresh correlation timeout.
pub fn token_refresh_timeout() -> Duration {
    duration_ms("TOKEN_REFRESH_TIMEOUT_MS", Duration::from_secs(30))
}
