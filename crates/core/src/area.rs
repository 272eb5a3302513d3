// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Area model: a group or project namespace.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AreaKind {
    Group,
    Project,
}

crate::simple_display! {
    AreaKind {
        Group => "group",
        Project => "project",
    }
}

/// A namespace discovered during crawling. Keyed by `full_path`;
/// created on first discovery and never destroyed by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Area {
    pub full_path: String,
    /// Provider-side id. May be absent when discovery only saw the path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gitlab_id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AreaKind,
}
