// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection bookkeeping on the server side.

use dredge_core::ConnectionId;
use dredge_wire::{Envelope, Register};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Lifecycle of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Authenticated,
    Active,
    Idle,
    Disconnecting,
    Error,
}

dredge_core::simple_display! {
    ConnectionState {
        Connecting => "connecting",
        Connected => "connected",
        Authenticated => "authenticated",
        Active => "active",
        Idle => "idle",
        Disconnecting => "disconnecting",
        Error => "error",
    }
}

/// Registry entry for a live connection. Owned by the bus; its lifetime
/// never outlives the underlying socket.
pub(crate) struct ConnectionEntry {
    pub id: ConnectionId,
    pub identity: Option<Register>,
    pub state: ConnectionState,
    pub connected_at_ms: u64,
    pub last_activity_ms: u64,
    pub last_heartbeat_ms: u64,
    /// Handle to this connection's writer task.
    pub outbound: mpsc::Sender<Envelope>,
    /// Cancelling force-closes both halves of the socket.
    pub cancel: CancellationToken,
}

impl ConnectionEntry {
    pub fn matches(&self, target: &str) -> bool {
        self.identity
            .as_ref()
            .is_some_and(|ident| ident.id == target || ident.role == target)
    }

    pub fn role(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.role.as_str())
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id.clone(),
            remote_identity: self.identity.as_ref().map(|i| i.id.clone()),
            role: self.identity.as_ref().map(|i| i.role.clone()),
            state: self.state,
            connected_at_ms: self.connected_at_ms,
            last_activity_ms: self.last_activity_ms,
            last_heartbeat_ms: self.last_heartbeat_ms,
        }
    }
}

/// Read-only connection snapshot for status reporting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub remote_identity: Option<String>,
    pub role: Option<String>,
    pub state: ConnectionState,
    pub connected_at_ms: u64,
    pub last_activity_ms: u64,
    pub last_heartbeat_ms: u64,
}
