// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One-shot admin connection to the backend socket.

use anyhow::{bail, Context, Result};
use dredge_wire::{
    write_frame, Destination, Envelope, FrameDecoder, Payload, Register, DEFAULT_MAX_FRAME_LEN,
};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::UnixStream;

pub struct AdminClient {
    stream: UnixStream,
    id: String,
    decoder: FrameDecoder,
}

impl AdminClient {
    /// Connect and register as an admin peer.
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path).await.with_context(|| {
            format!(
                "cannot reach the backend at {} (is dredged running?)",
                socket_path.display()
            )
        })?;
        let id = format!("admin-{}", std::process::id());
        let mut client =
            Self { stream, id: id.clone(), decoder: FrameDecoder::new(DEFAULT_MAX_FRAME_LEN) };
        client
            .send(
                Destination::backend(),
                Payload::Register(Register {
                    id,
                    pid: std::process::id(),
                    role: "admin".to_string(),
                }),
            )
            .await?;
        Ok(client)
    }

    pub async fn send(&mut self, destination: Destination, payload: Payload) -> Result<()> {
        let envelope = Envelope::new(self.id.clone(), destination, payload, epoch_ms());
        write_frame(&mut self.stream, &envelope).await.context("failed to send command")?;
        Ok(())
    }

    /// Wait for the next envelope matching `pred`.
    pub async fn wait_for(
        &mut self,
        timeout: Duration,
        pred: impl Fn(&Payload) -> bool,
    ) -> Result<Payload> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut buf = [0u8; 16 * 1024];
        loop {
            while let Some(frame) = self.decoder.next_frame() {
                let Ok(value) = frame else { continue };
                let Ok(envelope) = Envelope::from_value(value) else { continue };
                if pred(&envelope.payload) {
                    return Ok(envelope.payload);
                }
            }
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .unwrap_or_default();
            if remaining.is_zero() {
                bail!("timed out waiting for a reply from the backend");
            }
            let n = tokio::time::timeout(remaining, self.stream.read(&mut buf))
                .await
                .map_err(|_| anyhow::anyhow!("timed out waiting for a reply from the backend"))?
                .context("connection to the backend closed")?;
            if n == 0 {
                bail!("connection to the backend closed");
            }
            self.decoder.push(&buf[..n]);
        }
    }
}

fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
