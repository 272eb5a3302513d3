// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Liveness reconciler.
//!
//! Crawler disconnects and heartbeat timeouts both land here: every
//! `running` row goes back to `queued` with `started_at` cleared, so the
//! next provisioning cycle re-dispatches from the persisted checkpoint.
//! No job fails because of infrastructure flakiness.

use dredge_core::{Clock, JobId};
use dredge_store::JobStore;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info};

pub struct Reconciler<C: Clock> {
    store: Arc<JobStore<C>>,
    /// Coalesces concurrent triggers; resets are idempotent anyway, this
    /// just keeps the WAL quiet under event storms.
    guard: Mutex<()>,
}

impl<C: Clock> Reconciler<C> {
    pub fn new(store: Arc<JobStore<C>>) -> Self {
        Self { store, guard: Mutex::new(()) }
    }

    /// Reset stranded work. Returns the ids that went back to queued.
    pub fn crawler_lost(&self, reason: &str) -> Vec<JobId> {
        let _guard = self.guard.lock();
        match self.store.reset_running_to_queued() {
            Ok(ids) => {
                if !ids.is_empty() {
                    info!(reason, count = ids.len(), "reset running jobs after crawler loss");
                }
                ids
            }
            Err(e) => {
                error!(reason, error = %e, "failed to reset running jobs");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;
