// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Crawler side of the token-refresh round-trip.
//!
//! A refresh is a correlated request/response over the bus: we mint a
//! `requestId`, park a oneshot, and either the backend's response or the
//! local timeout settles it. Timed-out requests fail the requesting job.

use crate::outbound::Outbound;
use dredge_core::{AccountId, RequestId};
use dredge_wire::{Payload, TokenRefreshRequest, TokenRefreshResponse};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token refresh timed out")]
    Timeout,

    #[error("token refresh failed: {0}")]
    Refused(String),
}

/// Shared, swappable access token for one active job.
///
/// The fetcher reads it per request; a successful refresh swaps it so the
/// in-flight job continues with the new token.
#[derive(Clone)]
pub struct TokenCell {
    token: Arc<Mutex<String>>,
}

impl TokenCell {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: Arc::new(Mutex::new(token.into())) }
    }

    pub fn get(&self) -> String {
        self.token.lock().clone()
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.token.lock() = token.into();
    }
}

/// Correlates refresh requests with their responses.
pub struct TokenBroker {
    pending: Mutex<HashMap<RequestId, oneshot::Sender<TokenRefreshResponse>>>,
    timeout: Duration,
}

impl TokenBroker {
    pub fn new(timeout: Duration) -> Self {
        Self { pending: Mutex::new(HashMap::new()), timeout }
    }

    /// Ask the backend for fresh tokens and wait for the correlated
    /// response. On success the new access token is swapped into `cell`.
    pub async fn refresh(
        &self,
        out: &dyn Outbound,
        provider_id: &str,
        account_id: &AccountId,
        user_id: &str,
        cell: &TokenCell,
    ) -> Result<TokenRefreshResponse, TokenError> {
        let request_id = RequestId::generate();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id.clone(), tx);

        debug!(request = %request_id, account = %account_id, "requesting token refresh");
        out.send(Payload::TokenRefreshRequest(TokenRefreshRequest {
            request_id: request_id.clone(),
            provider_id: provider_id.to_string(),
            account_id: account_id.clone(),
            user_id: user_id.to_string(),
        }));

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response,
            // Timed out, or the broker was torn down mid-flight.
            _ => {
                self.pending.lock().remove(&request_id);
                return Err(TokenError::Timeout);
            }
        };

        if !response.success {
            let reason = response
                .error
                .clone()
                .unwrap_or_else(|| "provider refused refresh".to_string());
            return Err(TokenError::Refused(reason));
        }
        if let Some(token) = &response.access_token {
            cell.set(token.clone());
        }
        Ok(response)
    }

    /// Deliver a response from the bus. Returns `false` for unknown (late
    /// or duplicate) correlation ids, which are dropped.
    pub fn complete(&self, response: TokenRefreshResponse) -> bool {
        let sender = self.pending.lock().remove(&response.request_id);
        match sender {
            Some(tx) => tx.send(response).is_ok(),
            None => {
                warn!(request = %response.request_id, "response for unknown refresh request");
                false
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
