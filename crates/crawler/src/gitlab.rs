// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! GitLab GraphQL client.
//!
//! Only the pagination contract matters here: every list comes back as
//! `{ pageInfo { hasNextPage, endCursor }, nodes }` and nodes stay
//! opaque JSON all the way to the sink. Queries select a workable field
//! set per data type; consumers own interpretation.

use crate::pagination::{FetchError, Page, PageFetcher};
use crate::token::TokenCell;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

/// Page size for every connection walk.
const PAGE_SIZE: u32 = 100;

/// Discovery pseudo data types used by the discovery loop.
pub const DISCOVER_GROUPS: &str = "discoverGroups";
pub const DISCOVER_PROJECTS: &str = "discoverProjects";

/// Per-dataType query plan: the GraphQL document, the path from `data`
/// to the result, and whether the result is a connection or one object.
struct QueryPlan {
    document: &'static str,
    path: &'static [&'static str],
    paginated: bool,
    needs_full_path: bool,
}

fn plan_for(data_type: &str) -> Option<QueryPlan> {
    let plan = match data_type {
        "details" => QueryPlan {
            document: "query($fullPath: ID!) { project(fullPath: $fullPath) { id name fullPath description createdAt visibility } }",
            path: &["project"],
            paginated: false,
            needs_full_path: true,
        },
        "groupDetails" => QueryPlan {
            document: "query($fullPath: ID!) { group(fullPath: $fullPath) { id name fullPath description visibility } }",
            path: &["group"],
            paginated: false,
            needs_full_path: true,
        },
        "members" => QueryPlan {
            document: "query($fullPath: ID!, $after: String) { project(fullPath: $fullPath) { projectMembers(first: 100, after: $after) { pageInfo { hasNextPage endCursor } nodes { id accessLevel { stringValue } user { id username name } } } } }",
            path: &["project", "projectMembers"],
            paginated: true,
            needs_full_path: true,
        },
        "groupMembers" => QueryPlan {
            document: "query($fullPath: ID!, $after: String) { group(fullPath: $fullPath) { groupMembers(first: 100, after: $after) { pageInfo { hasNextPage endCursor } nodes { id accessLevel { stringValue } user { id username name } } } } }",
            path: &["group", "groupMembers"],
            paginated: true,
            needs_full_path: true,
        },
        "groupProjects" => QueryPlan {
            document: "query($fullPath: ID!, $after: String) { group(fullPath: $fullPath) { projects(first: 100, after: $after) { pageInfo { hasNextPage endCursor } nodes { id name fullPath description } } } }",
            path: &["group", "projects"],
            paginated: true,
            needs_full_path: true,
        },
        "groupSubgroups" => QueryPlan {
            document: "query($fullPath: ID!, $after: String) { group(fullPath: $fullPath) { descendantGroups(first: 100, after: $after) { pageInfo { hasNextPage endCursor } nodes { id name fullPath description } } } }",
            path: &["group", "descendantGroups"],
            paginated: true,
            needs_full_path: true,
        },
        "groupIssues" => QueryPlan {
            document: "query($fullPath: ID!, $after: String) { group(fullPath: $fullPath) { issues(first: 100, after: $after, includeSubgroups: true) { pageInfo { hasNextPage endCursor } nodes { id iid title state createdAt updatedAt author { username } } } } }",
            path: &["group", "issues"],
            paginated: true,
            needs_full_path: true,
        },
        "issues" => QueryPlan {
            document: "query($fullPath: ID!, $after: String) { project(fullPath: $fullPath) { issues(first: 100, after: $after) { pageInfo { hasNextPage endCursor } nodes { id iid title state createdAt updatedAt closedAt author { username } labels { nodes { title } } } } } }",
            path: &["project", "issues"],
            paginated: true,
            needs_full_path: true,
        },
        "mergeRequests" => QueryPlan {
            document: "query($fullPath: ID!, $after: String) { project(fullPath: $fullPath) { mergeRequests(first: 100, after: $after) { pageInfo { hasNextPage endCursor } nodes { id iid title state sourceBranch targetBranch createdAt mergedAt author { username } } } } }",
            path: &["project", "mergeRequests"],
            paginated: true,
            needs_full_path: true,
        },
        "branches" => QueryPlan {
            document: "query($fullPath: ID!) { project(fullPath: $fullPath) { repository { branchNames(searchPattern: \"*\", offset: 0, limit: 100) } } }",
            path: &["project", "repository", "branchNames"],
            paginated: false,
            needs_full_path: true,
        },
        "pipelines" => QueryPlan {
            document: "query($fullPath: ID!, $after: String) { project(fullPath: $fullPath) { pipelines(first: 100, after: $after) { pageInfo { hasNextPage endCursor } nodes { id iid status ref sha createdAt finishedAt duration } } } }",
            path: &["project", "pipelines"],
            paginated: true,
            needs_full_path: true,
        },
        "commits" => QueryPlan {
            document: "query($fullPath: ID!) { project(fullPath: $fullPath) { repository { tree { lastCommit { id sha title authoredDate authorName } } } } }",
            path: &["project", "repository", "tree", "lastCommit"],
            paginated: false,
            needs_full_path: true,
        },
        "releases" => QueryPlan {
            document: "query($fullPath: ID!, $after: String) { project(fullPath: $fullPath) { releases(first: 100, after: $after) { pageInfo { hasNextPage endCursor } nodes { tagName name createdAt releasedAt } } } }",
            path: &["project", "releases"],
            paginated: true,
            needs_full_path: true,
        },
        "vulnerabilities" => QueryPlan {
            document: "query($fullPath: ID!, $after: String) { project(fullPath: $fullPath) { vulnerabilities(first: 100, after: $after) { pageInfo { hasNextPage endCursor } nodes { id title severity state reportType detectedAt } } } }",
            path: &["project", "vulnerabilities"],
            paginated: true,
            needs_full_path: true,
        },
        "timelogs" => QueryPlan {
            document: "query($fullPath: ID!, $after: String) { project(fullPath: $fullPath) { timelogs(first: 100, after: $after) { pageInfo { hasNextPage endCursor } nodes { timeSpent spentAt summary user { username } } } } }",
            path: &["project", "timelogs"],
            paginated: true,
            needs_full_path: true,
        },
        "labels" => QueryPlan {
            document: "query($fullPath: ID!, $after: String) { project(fullPath: $fullPath) { labels(first: 100, after: $after) { pageInfo { hasNextPage endCursor } nodes { id title color description } } } }",
            path: &["project", "labels"],
            paginated: true,
            needs_full_path: true,
        },
        "milestones" => QueryPlan {
            document: "query($fullPath: ID!, $after: String) { project(fullPath: $fullPath) { milestones(first: 100, after: $after) { pageInfo { hasNextPage endCursor } nodes { id title state dueDate startDate } } } }",
            path: &["project", "milestones"],
            paginated: true,
            needs_full_path: true,
        },
        "epics" => QueryPlan {
            document: "query($fullPath: ID!, $after: String) { group(fullPath: $fullPath) { epics(first: 100, after: $after) { pageInfo { hasNextPage endCursor } nodes { id iid title state createdAt } } } }",
            path: &["group", "epics"],
            paginated: true,
            needs_full_path: true,
        },
        "authorizationScope" => QueryPlan {
            document: "query { currentUser { id username name } }",
            path: &["currentUser"],
            paginated: false,
            needs_full_path: false,
        },
        DISCOVER_GROUPS => QueryPlan {
            document: "query($after: String) { currentUser { groups(first: 100, after: $after) { pageInfo { hasNextPage endCursor } nodes { id name fullPath } } } }",
            path: &["currentUser", "groups"],
            paginated: true,
            needs_full_path: false,
        },
        DISCOVER_PROJECTS => QueryPlan {
            document: "query($after: String) { projects(membership: true, first: 100, after: $after) { pageInfo { hasNextPage endCursor } nodes { id name fullPath } } }",
            path: &["projects"],
            paginated: true,
            needs_full_path: false,
        },
        _ => return None,
    };
    Some(plan)
}

/// HTTP client for one GitLab endpoint.
pub struct GitLabClient {
    http: reqwest::Client,
    graphql_url: String,
    full_path: Option<String>,
    token: TokenCell,
}

impl GitLabClient {
    pub fn new(
        http: reqwest::Client,
        graphql_url: impl Into<String>,
        full_path: Option<String>,
        token: TokenCell,
    ) -> Self {
        Self { http, graphql_url: graphql_url.into(), full_path, token }
    }

    /// Shared HTTP client with the standard request timeout.
    pub fn build_http(timeout: Duration) -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default()
    }

    async fn post_query(
        &self,
        document: &str,
        variables: serde_json::Value,
    ) -> Result<serde_json::Value, FetchError> {
        let response = self
            .http
            .post(&self.graphql_url)
            .bearer_auth(self.token.get())
            .json(&json!({ "query": document, "variables": variables }))
            .send()
            .await?;

        match response.status().as_u16() {
            200..=299 => {}
            401 | 403 => return Err(FetchError::Unauthorized),
            429 => return Err(FetchError::RateLimited),
            status => return Err(FetchError::Status { status }),
        }

        let body: serde_json::Value = response.json().await?;
        if let Some(errors) = body.get("errors").and_then(|e| e.as_array()) {
            if !errors.is_empty() {
                let summary = errors
                    .iter()
                    .filter_map(|e| e.get("message").and_then(|m| m.as_str()))
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(FetchError::GraphQl(summary));
            }
        }
        Ok(body)
    }
}

/// Walk `data.<path...>` in a GraphQL response.
fn dig<'v>(body: &'v serde_json::Value, path: &[&str]) -> Option<&'v serde_json::Value> {
    let mut cursor = body.get("data")?;
    for part in path {
        cursor = cursor.get(part)?;
    }
    Some(cursor)
}

#[async_trait]
impl PageFetcher for GitLabClient {
    async fn fetch_page(&self, data_type: &str, after: Option<&str>) -> Result<Page, FetchError> {
        let plan = plan_for(data_type)
            .ok_or_else(|| FetchError::UnsupportedDataType(data_type.to_string()))?;

        let mut variables = serde_json::Map::new();
        if plan.needs_full_path {
            variables.insert(
                "fullPath".to_string(),
                json!(self.full_path.clone().unwrap_or_default()),
            );
        }
        if plan.paginated {
            variables.insert("after".to_string(), json!(after));
        }

        let body = self.post_query(plan.document, serde_json::Value::Object(variables)).await?;
        let result = dig(&body, plan.path).ok_or_else(|| FetchError::MissingData {
            path: plan.path.join("."),
        })?;

        if plan.paginated {
            Ok(Page::from_connection(result))
        } else if let Some(list) = result.as_array() {
            // Non-connection lists (e.g. branch names) come back whole.
            Ok(Page { nodes: list.clone(), page_info: Default::default() })
        } else if result.is_null() {
            Ok(Page::default())
        } else {
            Ok(Page::single(result.clone()))
        }
    }
}

/// Builds a fetcher per task descriptor.
pub struct GitLabFetcherFactory {
    http: reqwest::Client,
}

impl GitLabFetcherFactory {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    pub fn fetcher(
        &self,
        graphql_url: &str,
        full_path: Option<String>,
        token: TokenCell,
    ) -> GitLabClient {
        GitLabClient::new(self.http.clone(), graphql_url, full_path, token)
    }
}

/// Task descriptors carry the instance origin; the GraphQL endpoint
/// hangs off it at the standard path.
pub fn graphql_endpoint(api_url: &str) -> String {
    let trimmed = api_url.trim_end_matches('/');
    if trimmed.ends_with("/api/graphql") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/api/graphql")
    }
}

impl crate::manager::FetcherProvider for GitLabFetcherFactory {
    fn fetcher_for(
        &self,
        task: &dredge_wire::TaskDescriptor,
        token: TokenCell,
    ) -> Box<dyn PageFetcher> {
        Box::new(self.fetcher(
            &graphql_endpoint(&task.gitlab_api_url),
            task.full_path.clone(),
            token,
        ))
    }
}

#[cfg(test)]
#[path = "gitlab_tests.rs"]
mod tests;
