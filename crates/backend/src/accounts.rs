// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authorization records (TOML file).
//!
//! The accounts file is the intake surface for this deployment: the
//! OAuth callback flow lives outside this system, and whatever runs it
//! writes accounts here. Token refresh rewrites the file atomically.

use dredge_core::{Account, AccountId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum AccountsError {
    #[error("failed to read accounts {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse accounts: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to write accounts: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("unknown account: {0}")]
    Unknown(AccountId),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AccountsFile {
    #[serde(default, rename = "account")]
    accounts: Vec<Account>,
}

/// In-memory account registry backed by the accounts file.
pub struct AccountStore {
    path: PathBuf,
    accounts: Mutex<BTreeMap<AccountId, Account>>,
}

impl AccountStore {
    /// Load the file; absence means no authorizations yet.
    pub fn load(path: &Path) -> Result<Self, AccountsError> {
        let file: AccountsFile = match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AccountsFile::default(),
            Err(source) => {
                return Err(AccountsError::Io { path: path.display().to_string(), source })
            }
        };
        let accounts: BTreeMap<AccountId, Account> =
            file.accounts.into_iter().map(|a| (a.id.clone(), a)).collect();
        info!(count = accounts.len(), path = %path.display(), "accounts loaded");
        Ok(Self { path: path.to_path_buf(), accounts: Mutex::new(accounts) })
    }

    pub fn get(&self, id: &AccountId) -> Option<Account> {
        self.accounts.lock().get(id).cloned()
    }

    pub fn all(&self) -> Vec<Account> {
        self.accounts.lock().values().cloned().collect()
    }

    /// Apply refreshed tokens and persist. The old refresh token is kept
    /// when the grant didn't return a new one.
    pub fn apply_refresh(
        &self,
        id: &AccountId,
        access_token: String,
        refresh_token: Option<String>,
        expires_at_ms: Option<u64>,
    ) -> Result<Account, AccountsError> {
        let updated = {
            let mut accounts = self.accounts.lock();
            let account = accounts.get_mut(id).ok_or_else(|| AccountsError::Unknown(id.clone()))?;
            account.access_token = access_token;
            if refresh_token.is_some() {
                account.refresh_token = refresh_token;
            }
            account.access_token_expires_at_ms = expires_at_ms;
            account.clone()
        };
        self.persist()?;
        Ok(updated)
    }

    /// Add or replace an authorization (tests, manual setup tooling).
    pub fn upsert(&self, account: Account) -> Result<(), AccountsError> {
        self.accounts.lock().insert(account.id.clone(), account);
        self.persist()
    }

    fn persist(&self) -> Result<(), AccountsError> {
        let file = AccountsFile { accounts: self.all() };
        let content = toml::to_string_pretty(&file)?;
        let tmp = self.path.with_extension("toml.tmp");
        let io_err = |source| AccountsError::Io { path: self.path.display().to_string(), source };
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(io_err)?;
        }
        std::fs::write(&tmp, content).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)
    }
}

#[cfg(test)]
#[path = "accounts_tests.rs"]
mod tests;
