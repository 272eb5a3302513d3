// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconnecting bus client.
//!
//! Connection loss is recoverable, never fatal: while offline the client
//! queues outgoing envelopes and retries with capped exponential backoff
//! plus jitter. A missing socket file just means the backend hasn't
//! started yet — same retry path.

use crate::queue::{OutgoingQueue, DEFAULT_QUEUE_LIMIT};
use dredge_core::Clock;
use dredge_wire::{
    write_frame, Destination, Envelope, FrameDecoder, Payload, Register, DEFAULT_MAX_FRAME_LEN,
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncReadExt;
use tokio::net::UnixStream;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reconnect backoff defaults.
pub const DEFAULT_RECONNECT_BASE: Duration = Duration::from_secs(5);
pub const DEFAULT_RECONNECT_MAX: Duration = Duration::from_secs(30);

/// What the client surfaces to its owner.
#[derive(Debug)]
pub enum ClientEvent {
    Connected,
    Disconnected,
    /// Peer stopped heartbeating; the socket was force-closed and the
    /// reconnect loop re-entered.
    HeartbeatTimeout,
    Message(Envelope),
}

#[derive(Debug, Clone)]
pub struct BusClientConfig {
    pub socket_path: PathBuf,
    pub identity: Register,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    /// How long the peer may go silent before the connection is stale.
    pub heartbeat_timeout: Duration,
    pub queue_limit: usize,
    pub max_frame_len: usize,
}

impl BusClientConfig {
    pub fn new(socket_path: PathBuf, identity: Register) -> Self {
        Self {
            socket_path,
            identity,
            reconnect_base: DEFAULT_RECONNECT_BASE,
            reconnect_max: DEFAULT_RECONNECT_MAX,
            heartbeat_timeout: crate::server::DEFAULT_HEARTBEAT_TIMEOUT,
            queue_limit: DEFAULT_QUEUE_LIMIT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

struct ClientShared {
    queue: Mutex<OutgoingQueue>,
    wake: Notify,
    connected: AtomicBool,
    identity: Register,
}

/// Handle for enqueueing outgoing envelopes. Cloneable.
#[derive(Clone)]
pub struct BusClient {
    shared: Arc<ClientShared>,
    clock_epoch_ms: Arc<dyn Fn() -> u64 + Send + Sync>,
}

impl BusClient {
    /// Spawn the connection task. Events arrive on the returned receiver
    /// until `cancel` fires.
    pub fn spawn<C: Clock>(
        config: BusClientConfig,
        clock: C,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<ClientEvent>) {
        let shared = Arc::new(ClientShared {
            queue: Mutex::new(OutgoingQueue::new(config.queue_limit)),
            wake: Notify::new(),
            connected: AtomicBool::new(false),
            identity: config.identity.clone(),
        });
        let (events_tx, events_rx) = mpsc::channel(256);

        let task_shared = Arc::clone(&shared);
        let task_clock = clock.clone();
        tokio::spawn(async move {
            connection_loop(config, task_shared, task_clock, events_tx, cancel).await;
        });

        let epoch = move || clock.epoch_ms();
        (Self { shared, clock_epoch_ms: Arc::new(epoch) }, events_rx)
    }

    /// Queue an envelope for delivery (immediately when connected).
    pub fn send(&self, destination: Destination, payload: Payload) {
        let envelope = Envelope::new(
            self.shared.identity.id.clone(),
            destination,
            payload,
            (self.clock_epoch_ms)(),
        );
        self.shared.queue.lock().push(envelope);
        self.shared.wake.notify_one();
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    pub fn queued_len(&self) -> usize {
        self.shared.queue.lock().len()
    }
}

async fn connection_loop<C: Clock>(
    config: BusClientConfig,
    shared: Arc<ClientShared>,
    clock: C,
    events: mpsc::Sender<ClientEvent>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return;
        }

        // The socket may simply not exist yet; treat that like refused.
        let stream = if config.socket_path.exists() {
            UnixStream::connect(&config.socket_path).await.ok()
        } else {
            None
        };

        let Some(stream) = stream else {
            let delay = backoff_delay(config.reconnect_base, config.reconnect_max, attempt);
            attempt = attempt.saturating_add(1);
            debug!(
                path = %config.socket_path.display(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "bus not reachable, retrying"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => continue,
                _ = cancel.cancelled() => return,
            }
        };

        attempt = 0;
        info!(path = %config.socket_path.display(), id = %shared.identity.id, "bus connected");
        shared.connected.store(true, Ordering::Relaxed);

        let outcome = run_connection(stream, &config, &shared, &clock, &events, &cancel).await;

        shared.connected.store(false, Ordering::Relaxed);
        match outcome {
            ConnectionEnd::Cancelled => return,
            ConnectionEnd::Closed => {
                let _ = events.send(ClientEvent::Disconnected).await;
            }
            ConnectionEnd::HeartbeatTimeout => {
                warn!("peer heartbeat missed, forcing reconnect");
                let _ = events.send(ClientEvent::HeartbeatTimeout).await;
            }
        }
    }
}

enum ConnectionEnd {
    Closed,
    HeartbeatTimeout,
    Cancelled,
}

async fn run_connection<C: Clock>(
    stream: UnixStream,
    config: &BusClientConfig,
    shared: &Arc<ClientShared>,
    clock: &C,
    events: &mpsc::Sender<ClientEvent>,
    cancel: &CancellationToken,
) -> ConnectionEnd {
    let (mut reader, mut writer) = stream.into_split();

    // Identify ourselves, then drain whatever queued while offline.
    let register = Envelope::new(
        shared.identity.id.clone(),
        Destination::backend(),
        Payload::Register(shared.identity.clone()),
        clock.epoch_ms(),
    );
    if write_frame(&mut writer, &register).await.is_err() {
        return ConnectionEnd::Closed;
    }
    let _ = events.send(ClientEvent::Connected).await;

    let mut decoder = FrameDecoder::new(config.max_frame_len);
    let mut buf = vec![0u8; 16 * 1024];
    let mut heartbeat_deadline = tokio::time::Instant::now() + config.heartbeat_timeout;

    loop {
        // Flush the outgoing queue before waiting.
        loop {
            let next = shared.queue.lock().pop();
            let Some(envelope) = next else { break };
            if write_frame(&mut writer, &envelope).await.is_err() {
                // Put it back; the reconnect path will retry it.
                shared.queue.lock().requeue_front(envelope);
                return ConnectionEnd::Closed;
            }
        }

        tokio::select! {
            read = reader.read(&mut buf) => {
                let n = match read {
                    Ok(0) => return ConnectionEnd::Closed,
                    Ok(n) => n,
                    Err(e) => {
                        debug!(error = %e, "bus read failed");
                        return ConnectionEnd::Closed;
                    }
                };
                decoder.push(&buf[..n]);
                while let Some(frame) = decoder.next_frame() {
                    let value = match frame {
                        Ok(value) => value,
                        Err(e) => {
                            warn!(error = %e, "bad frame from bus dropped");
                            continue;
                        }
                    };
                    let envelope = match Envelope::from_value(value) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            warn!(error = %e, "malformed envelope from bus dropped");
                            continue;
                        }
                    };
                    if !envelope
                        .destination
                        .accepts(&shared.identity.id, &shared.identity.role)
                    {
                        debug!(destination = %envelope.destination, "envelope not for us, dropped");
                        continue;
                    }
                    if matches!(envelope.payload, Payload::Heartbeat(_)) {
                        heartbeat_deadline =
                            tokio::time::Instant::now() + config.heartbeat_timeout;
                    }
                    let _ = events.send(ClientEvent::Message(envelope)).await;
                }
            }
            _ = shared.wake.notified() => {
                // Loop back around to flush the queue.
            }
            _ = tokio::time::sleep_until(heartbeat_deadline) => {
                return ConnectionEnd::HeartbeatTimeout;
            }
            _ = cancel.cancelled() => return ConnectionEnd::Cancelled,
        }
    }
}

/// `min(base · 1.5ⁿ, max)` with ±20 % jitter.
fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exp = 1.5f64.powi(attempt.min(16) as i32);
    let capped = (base.as_millis() as f64 * exp).min(max.as_millis() as f64) as u64;
    let spread = capped / 5;
    if spread == 0 {
        return Duration::from_millis(capped);
    }
    // Sub-second noise is plenty of entropy for jitter.
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    let offset = nanos % (2 * spread + 1);
    Duration::from_millis(capped - spread + offset)
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
