// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistent job store: append-only WAL plus materialized state.
//!
//! The store is the single durable source of truth for jobs and areas.
//! In-memory state anywhere else in the system is a cache of this store.
//! Every mutation appends a `StoreEvent` and applies it under one lock,
//! which makes the store the serialization point for concurrent writers.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod jobs;
mod state;
mod wal;

pub use jobs::{ClaimOutcome, JobStore, StoreError};
pub use state::MaterializedState;
pub use wal::{Wal, WalError};
