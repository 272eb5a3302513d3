// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authorization (account) record — read-only input to the core.

use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Handle of one stored authorization.
    pub struct AccountId("acct-");
}

/// OAuth account credentials backing a set of jobs.
///
/// The backend owns the canonical copy (accounts file); the core only
/// reads tokens from it when hydrating task descriptors or refreshing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: AccountId,
    pub provider_id: String,
    pub user_id: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token_expires_at_ms: Option<u64>,
}

impl Account {
    pub fn has_access_token(&self) -> bool {
        !self.access_token.trim().is_empty()
    }
}
