// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fixture helpers for tests in this crate and downstream crates.

use crate::account::{Account, AccountId};
use crate::area::{Area, AreaKind};
use crate::command::CrawlCommand;
use crate::job::{Job, JobId, NewJob};

pub fn account(id: &str) -> Account {
    Account {
        id: AccountId::new(id),
        provider_id: "gitlabCloud".to_string(),
        user_id: "user-1".to_string(),
        access_token: "tok-access".to_string(),
        refresh_token: Some("tok-refresh".to_string()),
        access_token_expires_at_ms: None,
    }
}

pub fn new_job(command: CrawlCommand, full_path: Option<&str>) -> NewJob {
    NewJob {
        command,
        account_id: AccountId::new("acct-test"),
        provider_id: "gitlabCloud".to_string(),
        user_id: "user-1".to_string(),
        full_path: full_path.map(str::to_string),
        gitlab_graphql_url: Some("https://gitlab.com/api/graphql".to_string()),
        spawned_from: None,
    }
}

pub fn job(id: &str, command: CrawlCommand, full_path: Option<&str>) -> Job {
    new_job(command, full_path).into_job(JobId::new(id), 1_000)
}

pub fn group_area(full_path: &str) -> Area {
    Area {
        full_path: full_path.to_string(),
        gitlab_id: Some(format!("gid-{full_path}")),
        name: full_path.rsplit('/').next().unwrap_or(full_path).to_string(),
        kind: AreaKind::Group,
    }
}

pub fn project_area(full_path: &str) -> Area {
    Area { kind: AreaKind::Project, ..group_area(full_path) }
}
