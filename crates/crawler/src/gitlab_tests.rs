// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use dredge_core::CrawlCommand;
use yare::parameterized;

#[test]
fn every_command_data_type_has_a_query_plan() {
    let all = [
        CrawlCommand::GroupProjectDiscovery,
        CrawlCommand::Group,
        CrawlCommand::GroupMembers,
        CrawlCommand::GroupProjects,
        CrawlCommand::GroupIssues,
        CrawlCommand::GroupSubgroups,
        CrawlCommand::Project,
        CrawlCommand::ProjectMembers,
        CrawlCommand::Issues,
        CrawlCommand::MergeRequests,
        CrawlCommand::Branches,
        CrawlCommand::Pipelines,
        CrawlCommand::Commits,
        CrawlCommand::Releases,
        CrawlCommand::Vulnerabilities,
        CrawlCommand::Timelogs,
        CrawlCommand::Labels,
        CrawlCommand::Milestones,
        CrawlCommand::Epics,
        CrawlCommand::AuthorizationScope,
    ];
    for command in all {
        for data_type in command.data_types() {
            if *data_type == "discover_all_groups_projects" {
                // Discovery runs through the two pseudo data types.
                assert!(plan_for(DISCOVER_GROUPS).is_some());
                assert!(plan_for(DISCOVER_PROJECTS).is_some());
                continue;
            }
            assert!(plan_for(data_type).is_some(), "no query plan for {data_type}");
        }
    }
}

#[test]
fn unknown_data_types_have_no_plan() {
    assert!(plan_for("wikis").is_none());
}

#[parameterized(
    bare = { "https://gitlab.com", "https://gitlab.com/api/graphql" },
    trailing_slash = { "https://gitlab.example.org/", "https://gitlab.example.org/api/graphql" },
    already_graphql = { "https://gitlab.com/api/graphql", "https://gitlab.com/api/graphql" },
)]
fn graphql_endpoint_joins_the_standard_path(base: &str, expected: &str) {
    assert_eq!(graphql_endpoint(base), expected);
}

#[test]
fn dig_walks_the_data_tree() {
    let body = serde_json::json!({
        "data": { "project": { "issues": { "nodes": [{"iid": 1}], "pageInfo": {"hasNextPage": false} } } }
    });
    let connection = dig(&body, &["project", "issues"]).unwrap();
    let page = crate::pagination::Page::from_connection(connection);
    assert_eq!(page.nodes.len(), 1);
    assert!(dig(&body, &["project", "mergeRequests"]).is_none());
}
