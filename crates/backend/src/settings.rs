// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backend settings (TOML).
//!
//! Holds what the core needs: provider defaults and OAuth client
//! credentials, plus the archive base path. A missing file is a valid
//! empty configuration — provisioning will fail jobs with specific
//! reasons instead of the daemon refusing to start.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Well-known provider id for gitlab.com.
pub const GITLAB_CLOUD: &str = "gitlabCloud";
/// Provider id for on-prem instances configured in settings.
pub const GITLAB_ONPREM: &str = "gitlab";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default)]
    pub verify_url: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

impl ProviderSettings {
    pub fn has_client(&self) -> bool {
        self.client_id.as_deref().is_some_and(|id| !id.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthSettings {
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSettings>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputSettings {
    #[serde(default)]
    pub base_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub output: OutputSettings,
}

impl Settings {
    /// Load from disk; absent file yields defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(SettingsError::Io { path: path.display().to_string(), source })
            }
        };
        Ok(toml::from_str(&content)?)
    }

    pub fn provider(&self, provider_id: &str) -> Option<&ProviderSettings> {
        self.auth.providers.get(provider_id)
    }

    /// Instance base URL for a provider. gitlab.com is built in; on-prem
    /// comes from configuration.
    pub fn base_url_for(&self, provider_id: &str) -> Option<String> {
        if let Some(provider) = self.provider(provider_id) {
            if let Some(base) = &provider.base_url {
                if !base.trim().is_empty() {
                    return Some(base.trim_end_matches('/').to_string());
                }
            }
        }
        (provider_id == GITLAB_CLOUD).then(|| "https://gitlab.com".to_string())
    }

    /// OAuth token endpoint: configured, or `<base>/oauth/token`.
    pub fn token_url_for(&self, provider_id: &str) -> Option<String> {
        if let Some(provider) = self.provider(provider_id) {
            if let Some(url) = &provider.token_url {
                if !url.trim().is_empty() {
                    return Some(url.clone());
                }
            }
        }
        self.base_url_for(provider_id).map(|base| format!("{base}/oauth/token"))
    }

    /// Token verification endpoint: configured, or `<base>/api/v4/user`.
    pub fn verify_url_for(&self, provider_id: &str) -> Option<String> {
        if let Some(provider) = self.provider(provider_id) {
            if let Some(url) = &provider.verify_url {
                if !url.trim().is_empty() {
                    return Some(url.clone());
                }
            }
        }
        self.base_url_for(provider_id).map(|base| format!("{base}/api/v4/user"))
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
