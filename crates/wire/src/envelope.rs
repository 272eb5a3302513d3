// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed message envelope.
//!
//! The raw wire shape is `{origin, destination, type, key, payload,
//! timestamp}`. Structure is validated once at ingress into a typed
//! [`Payload`]; handlers select by exhaustive match. An unknown
//! `type`/`key` pair is a parse error — the only silent drop is for
//! envelopes addressed to someone else, which is a routing decision,
//! not a parsing one.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::Payload;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("unknown message type/key: {msg_type}:{key}")]
    UnknownKey { msg_type: String, key: String },

    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Routing address. Either a well-known peer name, the broadcast
/// wildcard, or a concrete registered connection id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Destination(String);

impl Destination {
    pub const BACKEND: &'static str = "backend";
    pub const CRAWLER: &'static str = "crawler";
    pub const SUPERVISOR: &'static str = "supervisor";
    pub const BROADCAST: &'static str = "broadcast";

    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn backend() -> Self {
        Self(Self::BACKEND.to_string())
    }

    pub fn crawler() -> Self {
        Self(Self::CRAWLER.to_string())
    }

    pub fn broadcast() -> Self {
        Self(Self::BROADCAST.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == Self::BROADCAST
    }

    /// Whether a peer identifying as `id` (with role `role`) should
    /// process this envelope.
    pub fn accepts(&self, id: &str, role: &str) -> bool {
        self.is_broadcast() || self.0 == id || self.0 == role
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The untyped wire shape. Only used at the codec boundary.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct RawEnvelope {
    pub origin: String,
    pub destination: Destination,
    #[serde(rename = "type")]
    pub msg_type: String,
    pub key: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub timestamp: u64,
}

/// A validated, typed message.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub origin: String,
    pub destination: Destination,
    pub payload: Payload,
    /// Sender epoch ms.
    pub timestamp: u64,
}

impl Envelope {
    pub fn new(
        origin: impl Into<String>,
        destination: Destination,
        payload: Payload,
        timestamp: u64,
    ) -> Self {
        Self { origin: origin.into(), destination, payload, timestamp }
    }

    /// Parse a raw frame value into a typed envelope.
    pub fn from_value(value: serde_json::Value) -> Result<Self, EnvelopeError> {
        let raw: RawEnvelope = serde_json::from_value(value)?;
        let payload = Payload::decode(&raw.msg_type, &raw.key, raw.payload)?;
        Ok(Self {
            origin: raw.origin,
            destination: raw.destination,
            payload,
            timestamp: raw.timestamp,
        })
    }

    pub(crate) fn to_raw(&self) -> RawEnvelope {
        let (msg_type, key, payload) = self.payload.encode();
        RawEnvelope {
            origin: self.origin.clone(),
            destination: self.destination.clone(),
            msg_type: msg_type.to_string(),
            key: key.to_string(),
            payload,
            timestamp: self.timestamp,
        }
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
