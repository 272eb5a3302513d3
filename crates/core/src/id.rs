// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared id newtypes that don't belong to a single model module.

crate::define_id! {
    /// Correlation id for a token-refresh round-trip over the bus.
    ///
    /// Minted by the crawler, echoed verbatim by the backend so the
    /// requester can match the response to its pending request.
    pub struct RequestId("req-");
}

crate::define_id! {
    /// Identity of one socket connection on the bus server.
    pub struct ConnectionId("con-");
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
