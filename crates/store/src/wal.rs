// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only write-ahead log: one JSON event per line.

use dredge_core::StoreEvent;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum WalError {
    #[error("WAL I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("WAL encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Append-only event log.
pub struct Wal {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl Wal {
    /// Open (or create) the log and replay its events.
    ///
    /// A torn final line — the daemon died mid-append — is skipped with a
    /// warning instead of refusing to start. Any other unparseable line is
    /// skipped the same way; events are facts, and a fact we can no longer
    /// read cannot be worth a crash loop.
    pub fn open(path: &Path) -> Result<(Self, Vec<StoreEvent>), WalError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| WalError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let events = match File::open(path) {
            Ok(file) => replay(path, file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(WalError::Io { path: path.to_path_buf(), source }),
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| WalError::Io { path: path.to_path_buf(), source })?;

        Ok((Self { path: path.to_path_buf(), writer: BufWriter::new(file) }, events))
    }

    /// Append one event and flush it to the OS.
    pub fn append(&mut self, event: &StoreEvent) -> Result<(), WalError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        self.writer
            .write_all(&line)
            .and_then(|()| self.writer.flush())
            .map_err(|source| WalError::Io { path: self.path.clone(), source })
    }
}

fn replay(path: &Path, file: File) -> Vec<StoreEvent> {
    let mut events = Vec::new();
    let mut skipped = 0usize;
    for line in BufReader::new(file).lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<StoreEvent>(&line) {
            Ok(event) => events.push(event),
            Err(_) => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!(path = %path.display(), skipped, "skipped unreadable WAL lines");
    }
    events
}

#[cfg(test)]
#[path = "wal_tests.rs"]
mod tests;
