// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Seam between the job manager and the bus.
//!
//! The manager never talks to a socket directly; it hands payloads to an
//! [`Outbound`] so tests can capture traffic without any I/O.

use dredge_bus::BusClient;
use dredge_wire::{Destination, Payload};

pub trait Outbound: Send + Sync + 'static {
    /// Queue a payload for the backend.
    fn send(&self, payload: Payload);
}

/// Production outbound: everything goes to the backend over the bus.
pub struct BusOutbound {
    client: BusClient,
}

impl BusOutbound {
    pub fn new(client: BusClient) -> Self {
        Self { client }
    }
}

impl Outbound for BusOutbound {
    fn send(&self, payload: Payload) {
        self.client.send(Destination::backend(), payload);
    }
}

/// Test outbound collecting everything sent.
#[cfg(test)]
pub(crate) struct CapturedOutbound(pub parking_lot::Mutex<Vec<Payload>>);

#[cfg(test)]
impl CapturedOutbound {
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self(parking_lot::Mutex::new(Vec::new())))
    }

    pub fn take(&self) -> Vec<Payload> {
        std::mem::take(&mut self.0.lock())
    }

    pub fn snapshot(&self) -> Vec<Payload> {
        self.0.lock().clone()
    }
}

#[cfg(test)]
impl Outbound for std::sync::Arc<CapturedOutbound> {
    fn send(&self, payload: Payload) {
        self.0.lock().push(payload);
    }
}
