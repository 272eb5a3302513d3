// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Record sink: where crawled records land.
//!
//! The archive is an opaque store keyed by `(data_type, target_path)`.
//! The filesystem sink appends JSON lines, which keeps re-crawls
//! idempotent at the consumer side (records carry their own ids).

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sink encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait RecordSink: Send + Sync + 'static {
    /// Persist a batch of records for `(data_type, target_path)`.
    fn write(
        &self,
        data_type: &str,
        target_path: &str,
        records: &[serde_json::Value],
    ) -> Result<(), SinkError>;
}

/// Filesystem sink: `<base>/<target_path>/<data_type>.jsonl`.
pub struct FsSink {
    base: PathBuf,
}

impl FsSink {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn file_path(&self, data_type: &str, target_path: &str) -> PathBuf {
        let mut dir = self.base.clone();
        for part in target_path.split('/').filter(|p| !p.is_empty()) {
            dir.push(sanitize(part));
        }
        dir.join(format!("{}.jsonl", sanitize(data_type)))
    }
}

/// Path components come from remote data; keep them boring.
fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect::<String>()
        .trim_matches('.')
        .to_string()
}

impl RecordSink for FsSink {
    fn write(
        &self,
        data_type: &str,
        target_path: &str,
        records: &[serde_json::Value],
    ) -> Result<(), SinkError> {
        if records.is_empty() {
            return Ok(());
        }
        let path = self.file_path(data_type, target_path);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|source| SinkError::Io { path: dir.to_path_buf(), source })?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| SinkError::Io { path: path.clone(), source })?;
        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }
        file.write_all(&buf).map_err(|source| SinkError::Io { path, source })
    }
}

impl FsSink {
    /// Test helper: read back everything written for a key.
    #[cfg(test)]
    pub(crate) fn read_back(&self, data_type: &str, target_path: &str) -> Vec<serde_json::Value> {
        let path = self.file_path(data_type, target_path);
        let Ok(content) = std::fs::read_to_string(path) else { return Vec::new() };
        content.lines().filter_map(|l| serde_json::from_str(l).ok()).collect()
    }
}

/// Used by `main` to locate the archive under the data root.
pub fn archive_path(data_root: &Path) -> PathBuf {
    data_root.join("archive")
}

#[cfg(test)]
#[path = "sink_tests.rs"]
mod tests;
