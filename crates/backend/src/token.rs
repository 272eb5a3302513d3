// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backend half of the token-refresh broker: the actual OAuth calls.
//!
//! Request building and response interpretation are plain functions so
//! the protocol details are testable without a provider; only
//! [`HttpTokenRefresher`] touches the network.

use crate::settings::ProviderSettings;
use async_trait::async_trait;
use dredge_core::Account;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("account has no refresh token")]
    NoRefreshToken,

    #[error("provider has no token endpoint configured")]
    NoTokenEndpoint,

    #[error("token endpoint returned HTTP {status}")]
    Endpoint { status: u16 },

    #[error("token request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("token response missing access_token")]
    MalformedResponse,
}

/// Result of a successful refresh grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedTokens {
    pub access_token: String,
    /// `None` when the provider kept the old refresh token valid.
    pub refresh_token: Option<String>,
    pub expires_at_ms: Option<u64>,
}

/// Form body for the `refresh_token` grant. Client credentials ride as
/// HTTP Basic when a secret exists; otherwise `client_id` goes in the
/// body (public client).
pub(crate) fn refresh_form(
    refresh_token: &str,
    provider: &ProviderSettings,
) -> Vec<(&'static str, String)> {
    let mut form = vec![
        ("grant_type", "refresh_token".to_string()),
        ("refresh_token", refresh_token.to_string()),
    ];
    let has_secret =
        provider.client_secret.as_deref().is_some_and(|s| !s.trim().is_empty());
    if !has_secret {
        if let Some(client_id) = &provider.client_id {
            form.push(("client_id", client_id.clone()));
        }
    }
    form
}

#[derive(Debug, Deserialize)]
struct GrantResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

/// Interpret a grant response body. `expires_at = now + expires_in·1000`.
pub(crate) fn interpret_grant(
    body: &serde_json::Value,
    now_ms: u64,
) -> Result<RefreshedTokens, RefreshError> {
    let grant: GrantResponse =
        serde_json::from_value(body.clone()).map_err(|_| RefreshError::MalformedResponse)?;
    let access_token = grant.access_token.ok_or(RefreshError::MalformedResponse)?;
    Ok(RefreshedTokens {
        access_token,
        refresh_token: grant.refresh_token,
        expires_at_ms: grant.expires_in.map(|secs| now_ms + secs * 1000),
    })
}

#[async_trait]
pub trait TokenRefresher: Send + Sync + 'static {
    /// Run the refresh grant for an account.
    async fn refresh(
        &self,
        account: &Account,
        provider: &ProviderSettings,
        token_url: Option<String>,
        now_ms: u64,
    ) -> Result<RefreshedTokens, RefreshError>;

    /// Optional pre-flight validation: GET the verify URL as the bearer.
    async fn verify(&self, token: &str, verify_url: &str) -> bool;
}

pub struct HttpTokenRefresher {
    http: reqwest::Client,
}

impl HttpTokenRefresher {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    pub fn with_timeout(timeout: std::time::Duration) -> Self {
        let http = reqwest::Client::builder().timeout(timeout).build().unwrap_or_default();
        Self::new(http)
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(
        &self,
        account: &Account,
        provider: &ProviderSettings,
        token_url: Option<String>,
        now_ms: u64,
    ) -> Result<RefreshedTokens, RefreshError> {
        let refresh_token =
            account.refresh_token.as_deref().ok_or(RefreshError::NoRefreshToken)?;
        let token_url = token_url.ok_or(RefreshError::NoTokenEndpoint)?;

        let mut request = self.http.post(&token_url).form(&refresh_form(refresh_token, provider));
        let has_secret =
            provider.client_secret.as_deref().is_some_and(|s| !s.trim().is_empty());
        if has_secret {
            if let (Some(id), Some(secret)) = (&provider.client_id, &provider.client_secret) {
                request = request.basic_auth(id, Some(secret));
            }
        }

        debug!(account = %account.id, url = token_url, "refreshing token");
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RefreshError::Endpoint { status: status.as_u16() });
        }
        let body: serde_json::Value = response.json().await?;
        interpret_grant(&body, now_ms)
    }

    async fn verify(&self, token: &str, verify_url: &str) -> bool {
        match self.http.get(verify_url).bearer_auth(token).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
