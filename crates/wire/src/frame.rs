// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Newline-delimited JSON framing over a byte stream.
//!
//! The decoder accumulates arbitrary read chunks and yields whole frames.
//! A bad frame never poisons the stream: parse errors are reported
//! per-frame and decoding continues with the next delimiter.

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::envelope::Envelope;

/// Default frame cap; production configs raise this to 5 MiB.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Legacy producers prefix each frame with this marker.
const FRAME_PREFIX: &[u8] = b"IPC_MSG::";

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame exceeds {max} bytes")]
    TooLarge { max: usize },

    #[error("invalid JSON in frame: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Accumulating frame decoder.
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_frame_len: usize,
    /// Set while skipping an oversized frame until its delimiter shows up.
    discarding: bool,
}

impl FrameDecoder {
    pub fn new(max_frame_len: usize) -> Self {
        Self { buf: Vec::new(), max_frame_len, discarding: false }
    }

    /// Feed a read chunk into the buffer.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete frame, if any.
    ///
    /// Returns `None` when the buffer holds no complete frame yet. A
    /// `Some(Err(..))` is one bad frame; callers should keep polling.
    pub fn next_frame(&mut self) -> Option<Result<serde_json::Value, FrameError>> {
        loop {
            let newline = self.buf.iter().position(|b| *b == b'\n');

            if self.discarding {
                match newline {
                    Some(pos) => {
                        self.buf.drain(..=pos);
                        self.discarding = false;
                        continue;
                    }
                    None => {
                        self.buf.clear();
                        return None;
                    }
                }
            }

            let Some(pos) = newline else {
                // No delimiter yet. Reject a frame that can no longer fit
                // before wasting memory on the rest of it.
                if self.buf.len() > self.max_frame_len {
                    self.buf.clear();
                    self.discarding = true;
                    return Some(Err(FrameError::TooLarge { max: self.max_frame_len }));
                }
                return None;
            };

            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop(); // delimiter
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if let Some(stripped) = line.strip_prefix(FRAME_PREFIX) {
                line = stripped.to_vec();
            }
            if line.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            if line.len() > self.max_frame_len {
                return Some(Err(FrameError::TooLarge { max: self.max_frame_len }));
            }

            return Some(parse_frame(&line));
        }
    }
}

/// Parse one frame, scanning forward to the first `{` when the line
/// carries leading garbage (torn writes from a crashed peer).
fn parse_frame(line: &[u8]) -> Result<serde_json::Value, FrameError> {
    match serde_json::from_slice(line) {
        Ok(value) => Ok(value),
        Err(first_err) => {
            let Some(start) = line.iter().position(|b| *b == b'{') else {
                return Err(first_err.into());
            };
            if start == 0 {
                return Err(first_err.into());
            }
            serde_json::from_slice(&line[start..]).map_err(Into::into)
        }
    }
}

/// Encode an envelope as one newline-terminated frame.
pub fn encode_frame(envelope: &Envelope) -> Result<Vec<u8>, FrameError> {
    let mut bytes = serde_json::to_vec(&envelope.to_raw())?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Encode and write one frame.
pub async fn write_frame<W>(writer: &mut W, envelope: &Envelope) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_frame(envelope)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
