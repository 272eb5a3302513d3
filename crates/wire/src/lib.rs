// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IPC wire protocol for backend ↔ crawler communication.
//!
//! Wire format: UTF-8 JSON envelopes, one object per frame, newline
//! terminated. An optional literal `IPC_MSG::` prefix is accepted on
//! ingress (legacy producers) and never emitted.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod envelope;
mod frame;
mod message;

pub use envelope::{Destination, Envelope, EnvelopeError};
pub use frame::{encode_frame, write_frame, FrameDecoder, FrameError, DEFAULT_MAX_FRAME_LEN};
pub use message::{
    AreasDiscovered, CrawlerState, Credentials, CustomParameters, Heartbeat, JobFailureLogs,
    JobList, JobProgressUpdate, JobSummary, JobUpdate, JobUpdateStatus, OutputConfig, Payload,
    Register, StartDiscovery, StateChange, StatusUpdate, Subscribe, TaskDescriptor,
    TokenRefreshRequest, TokenRefreshResponse,
};

#[cfg(test)]
mod property_tests;
