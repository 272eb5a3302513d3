// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-job operator log: crawler-side failure lines land here so an
//! operator can diagnose without shell access to the crawler host.

use dredge_core::JobId;
use std::io::Write;
use std::path::PathBuf;
use tracing::warn;

pub struct JobLogWriter {
    dir: PathBuf,
}

impl JobLogWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Append lines to `<dir>/<job_id>.log`. Logging must never take the
    /// orchestrator down; failures are reported and swallowed.
    pub fn append(&self, job_id: &JobId, lines: &[String]) {
        if lines.is_empty() {
            return;
        }
        let path = self.dir.join(format!("{job_id}.log"));
        let result = std::fs::create_dir_all(&self.dir).and_then(|()| {
            let mut file =
                std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
            for line in lines {
                writeln!(file, "{line}")?;
            }
            Ok(())
        });
        if let Err(e) = result {
            warn!(job_id = %job_id, error = %e, "failed to append job log");
        }
    }

    #[cfg(test)]
    pub(crate) fn read(&self, job_id: &JobId) -> String {
        std::fs::read_to_string(self.dir.join(format!("{job_id}.log"))).unwrap_or_default()
    }
}
