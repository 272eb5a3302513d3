// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bus server: binds the Unix socket, registers peers, routes envelopes.
//!
//! Each accepted connection gets a reader task and a writer task. The
//! reader validates envelopes at ingress and either handles them here
//! (heartbeats, registration), forwards them to another registered
//! connection (targeted routing), or surfaces them to the owner through
//! the [`BusEvent`] channel.

use crate::connection::{ConnectionEntry, ConnectionInfo, ConnectionState};
use dredge_core::{Clock, ConnectionId};
use dredge_wire::{
    write_frame, Destination, Envelope, EnvelopeError, FrameDecoder, Payload, Register,
    DEFAULT_MAX_FRAME_LEN,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Identity the server speaks as on the bus.
pub const SERVER_ID: &str = "backend";

/// Default peer-heartbeat timeout.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-connection writer queue depth; beyond it the writer applies
/// backpressure to the router.
const WRITER_QUEUE_DEPTH: usize = 256;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("failed to prepare socket directory {path}: {source}")]
    SocketDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind socket {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Bus occurrences surfaced to the orchestrator.
#[derive(Debug)]
pub enum BusEvent {
    Connected { connection_id: ConnectionId },
    Registered { connection_id: ConnectionId, identity: Register },
    Message { connection_id: ConnectionId, envelope: Envelope },
    Disconnected { connection_id: ConnectionId, identity: Option<Register> },
    HeartbeatTimeout { connection_id: ConnectionId, identity: Option<Register> },
}

#[derive(Debug, Clone)]
pub struct BusServerConfig {
    pub socket_path: PathBuf,
    pub heartbeat_timeout: Duration,
    pub max_frame_len: usize,
}

impl BusServerConfig {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

struct Shared<C: Clock> {
    connections: Mutex<HashMap<ConnectionId, ConnectionEntry>>,
    events: mpsc::Sender<BusEvent>,
    clock: C,
    config: BusServerConfig,
}

/// Cloneable handle for sending through the bus.
pub struct BusServerHandle<C: Clock> {
    shared: Arc<Shared<C>>,
}

impl<C: Clock> Clone for BusServerHandle<C> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<C: Clock> BusServerHandle<C> {
    fn envelope(&self, destination: Destination, payload: Payload) -> Envelope {
        Envelope::new(SERVER_ID, destination, payload, self.shared.clock.epoch_ms())
    }

    /// Send to the first connection registered as `target` (id or role).
    /// Returns `false` when no such peer is connected.
    pub fn send_to(&self, target: &str, payload: Payload) -> bool {
        let envelope = self.envelope(Destination::new(target), payload);
        let sender = {
            let connections = self.shared.connections.lock();
            connections.values().find(|c| c.matches(target)).map(|c| c.outbound.clone())
        };
        match sender {
            Some(sender) => {
                if sender.try_send(envelope).is_err() {
                    warn!(target, "peer writer queue full, dropping envelope");
                    return false;
                }
                true
            }
            None => {
                debug!(target, "no registered peer for targeted send");
                false
            }
        }
    }

    /// Send to one specific connection (request/reply for admin clients).
    pub fn send_to_connection(&self, connection_id: &ConnectionId, payload: Payload) -> bool {
        let destination = {
            let connections = self.shared.connections.lock();
            let Some(entry) = connections.get(connection_id) else { return false };
            entry
                .identity
                .as_ref()
                .map(|i| Destination::new(i.id.clone()))
                .unwrap_or_else(|| Destination::new(connection_id.as_str()))
        };
        let envelope = self.envelope(destination, payload);
        let sender = {
            let connections = self.shared.connections.lock();
            connections.get(connection_id).map(|c| c.outbound.clone())
        };
        sender.is_some_and(|s| s.try_send(envelope).is_ok())
    }

    /// Broadcast to every registered connection.
    pub fn broadcast(&self, payload: Payload) {
        let envelope = self.envelope(Destination::broadcast(), payload);
        let senders: Vec<_> = {
            let connections = self.shared.connections.lock();
            connections.values().map(|c| c.outbound.clone()).collect()
        };
        for sender in senders {
            let _ = sender.try_send(envelope.clone());
        }
    }

    /// Snapshot of live connections for the admin surface.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.shared.connections.lock().values().map(|c| c.info()).collect()
    }

    /// Whether any peer is registered under `target`.
    pub fn has_peer(&self, target: &str) -> bool {
        self.shared.connections.lock().values().any(|c| c.matches(target))
    }
}

/// The bus server. Construct with [`BusServer::bind`], then [`run`].
///
/// [`run`]: BusServer::run
pub struct BusServer<C: Clock> {
    listener: UnixListener,
    shared: Arc<Shared<C>>,
}

impl<C: Clock> BusServer<C> {
    /// Bind the socket (0660, directory 0750) and build the event channel.
    pub fn bind(
        config: BusServerConfig,
        clock: C,
    ) -> Result<(Self, BusServerHandle<C>, mpsc::Receiver<BusEvent>), BusError> {
        let path = &config.socket_path;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|source| BusError::SocketDir { path: dir.to_path_buf(), source })?;
            let _ = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o750));
        }
        // A stale socket file from a previous run blocks bind.
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
        let listener = UnixListener::bind(path)
            .map_err(|source| BusError::Bind { path: path.clone(), source })?;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o660));
        info!(path = %path.display(), "bus listening");

        let (events, events_rx) = mpsc::channel(1024);
        let shared = Arc::new(Shared {
            connections: Mutex::new(HashMap::new()),
            events,
            clock,
            config,
        });
        let handle = BusServerHandle { shared: Arc::clone(&shared) };
        Ok((Self { listener, shared }, handle, events_rx))
    }

    /// Accept connections and sweep heartbeats until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let sweep_shared = Arc::clone(&self.shared);
        let sweep_cancel = cancel.clone();
        let sweep = tokio::spawn(heartbeat_sweep(sweep_shared, sweep_cancel));

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let shared = Arc::clone(&self.shared);
                            let conn_cancel = cancel.child_token();
                            tokio::spawn(async move {
                                handle_connection(stream, shared, conn_cancel).await;
                            });
                        }
                        Err(e) => error!(error = %e, "accept failed"),
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }

        sweep.abort();
        let _ = std::fs::remove_file(&self.shared.config.socket_path);
    }
}

/// Mark connections stale when the peer stops heartbeating.
///
/// Only long-lived peers (crawlers, supervisors) are swept; admin
/// connections are one-shot and don't heartbeat.
async fn heartbeat_sweep<C: Clock>(shared: Arc<Shared<C>>, cancel: CancellationToken) {
    let timeout_ms = shared.config.heartbeat_timeout.as_millis() as u64;
    let mut tick = tokio::time::interval((shared.config.heartbeat_timeout / 3).max(
        Duration::from_millis(50),
    ));
    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = cancel.cancelled() => return,
        }

        let now = shared.clock.epoch_ms();
        let stale: Vec<(ConnectionId, Option<Register>, CancellationToken)> = {
            let mut connections = shared.connections.lock();
            let stale: Vec<_> = connections
                .values_mut()
                .filter(|c| matches!(c.role(), Some(crate::roles::CRAWLER | crate::roles::SUPERVISOR)))
                .filter(|c| now.saturating_sub(c.last_heartbeat_ms) > timeout_ms)
                .map(|c| {
                    c.state = ConnectionState::Error;
                    (c.id.clone(), c.identity.clone(), c.cancel.clone())
                })
                .collect();
            for (id, _, _) in &stale {
                connections.remove(id.as_str());
            }
            stale
        };

        for (connection_id, identity, conn_cancel) in stale {
            warn!(connection = %connection_id, "heartbeat timeout, dropping connection");
            conn_cancel.cancel();
            let _ = shared
                .events
                .send(BusEvent::HeartbeatTimeout { connection_id, identity })
                .await;
        }
    }
}

async fn handle_connection<C: Clock>(
    stream: UnixStream,
    shared: Arc<Shared<C>>,
    cancel: CancellationToken,
) {
    let connection_id = ConnectionId::generate();
    let now = shared.clock.epoch_ms();
    let (mut reader, mut writer) = stream.into_split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Envelope>(WRITER_QUEUE_DEPTH);

    {
        let mut connections = shared.connections.lock();
        connections.insert(
            connection_id.clone(),
            ConnectionEntry {
                id: connection_id.clone(),
                identity: None,
                state: ConnectionState::Connected,
                connected_at_ms: now,
                last_activity_ms: now,
                last_heartbeat_ms: now,
                outbound: outbound_tx,
                cancel: cancel.clone(),
            },
        );
    }
    let _ = shared.events.send(BusEvent::Connected { connection_id: connection_id.clone() }).await;
    debug!(connection = %connection_id, "connection accepted");

    // Writer task: serializes envelopes onto the socket. Dropping the
    // sender (registry removal) ends it.
    let writer_cancel = cancel.clone();
    let writer_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                envelope = outbound_rx.recv() => {
                    let Some(envelope) = envelope else { break };
                    if let Err(e) = write_frame(&mut writer, &envelope).await {
                        debug!(error = %e, "write failed, closing writer");
                        break;
                    }
                }
                _ = writer_cancel.cancelled() => break,
            }
        }
    });

    // Reader loop.
    let mut decoder = FrameDecoder::new(shared.config.max_frame_len);
    let mut buf = vec![0u8; 16 * 1024];
    'read: loop {
        let n = tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => break 'read,
                Ok(n) => n,
                Err(e) => {
                    debug!(connection = %connection_id, error = %e, "read failed");
                    break 'read;
                }
            },
            _ = cancel.cancelled() => break 'read,
        };

        decoder.push(&buf[..n]);
        while let Some(frame) = decoder.next_frame() {
            let value = match frame {
                Ok(value) => value,
                Err(e) => {
                    // Protocol errors drop the frame, not the connection.
                    warn!(connection = %connection_id, error = %e, "bad frame dropped");
                    continue;
                }
            };
            let envelope = match Envelope::from_value(value) {
                Ok(envelope) => envelope,
                Err(e @ EnvelopeError::UnknownKey { .. }) => {
                    warn!(connection = %connection_id, error = %e, "unknown message dropped");
                    continue;
                }
                Err(e) => {
                    warn!(connection = %connection_id, error = %e, "malformed envelope dropped");
                    continue;
                }
            };
            route(&shared, &connection_id, envelope).await;
        }
    }

    // Socket gone: clear the registry entry and tell the owner. The sweep
    // may already have removed it — it owns the HeartbeatTimeout report.
    let removed = {
        let mut connections = shared.connections.lock();
        connections.remove(connection_id.as_str())
    };
    writer_task.abort();
    debug!(connection = %connection_id, "connection closed");
    if let Some(entry) = removed {
        let _ = shared
            .events
            .send(BusEvent::Disconnected { connection_id, identity: entry.identity })
            .await;
    }
}

/// Dispatch one validated envelope.
async fn route<C: Clock>(
    shared: &Arc<Shared<C>>,
    connection_id: &ConnectionId,
    envelope: Envelope,
) {
    let now = shared.clock.epoch_ms();

    // Registration is handled here regardless of destination.
    if let Payload::Register(identity) = &envelope.payload {
        {
            let mut connections = shared.connections.lock();
            if let Some(entry) = connections.get_mut(connection_id.as_str()) {
                entry.identity = Some(identity.clone());
                entry.state = ConnectionState::Authenticated;
                entry.last_activity_ms = now;
                entry.last_heartbeat_ms = now;
            }
        }
        info!(
            connection = %connection_id,
            peer = %identity.id,
            role = %identity.role,
            "peer registered"
        );
        let _ = shared
            .events
            .send(BusEvent::Registered {
                connection_id: connection_id.clone(),
                identity: identity.clone(),
            })
            .await;
        return;
    }

    {
        let mut connections = shared.connections.lock();
        if let Some(entry) = connections.get_mut(connection_id.as_str()) {
            entry.last_activity_ms = now;
            entry.state = ConnectionState::Active;
            if matches!(envelope.payload, Payload::Heartbeat(_)) {
                entry.last_heartbeat_ms = now;
            }
        }
    }

    let destination = envelope.destination.clone();
    if destination.is_broadcast() {
        // Broadcast reaches every other peer and the server's own handlers.
        let senders: Vec<_> = {
            let connections = shared.connections.lock();
            connections
                .values()
                .filter(|c| c.id != *connection_id)
                .map(|c| c.outbound.clone())
                .collect()
        };
        for sender in senders {
            let _ = sender.try_send(envelope.clone());
        }
        let _ = shared
            .events
            .send(BusEvent::Message { connection_id: connection_id.clone(), envelope })
            .await;
        return;
    }

    if destination.accepts(SERVER_ID, SERVER_ID) {
        let _ = shared
            .events
            .send(BusEvent::Message { connection_id: connection_id.clone(), envelope })
            .await;
        return;
    }

    // Targeted routing between registered peers.
    let forwarded = {
        let connections = shared.connections.lock();
        connections
            .values()
            .filter(|c| c.id != *connection_id)
            .find(|c| c.matches(destination.as_str()))
            .map(|c| c.outbound.clone())
    };
    match forwarded {
        Some(sender) => {
            let _ = sender.try_send(envelope);
        }
        None => {
            // Unknown destination: logged and dropped by design.
            warn!(
                connection = %connection_id,
                destination = %destination,
                key = envelope.payload.key(),
                "no route for destination, dropping"
            );
        }
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
