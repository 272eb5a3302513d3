// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Crawl command enumeration and its mappings.
//!
//! A command names one extraction operation against a GitLab namespace
//! (or the whole authorization, for discovery). The wire spellings are
//! canonical; parsing is case-insensitive because historical payloads
//! carried spellings like `groupprojects`.

use serde::{Deserialize, Serialize};

/// One crawl operation. The serialized form is the canonical wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrawlCommand {
    #[serde(rename = "GROUP_PROJECT_DISCOVERY")]
    GroupProjectDiscovery,
    #[serde(rename = "group")]
    Group,
    #[serde(rename = "groupMembers")]
    GroupMembers,
    #[serde(rename = "groupProjects")]
    GroupProjects,
    #[serde(rename = "groupIssues")]
    GroupIssues,
    #[serde(rename = "groupSubgroups")]
    GroupSubgroups,
    #[serde(rename = "project")]
    Project,
    #[serde(rename = "projectMembers")]
    ProjectMembers,
    #[serde(rename = "issues")]
    Issues,
    #[serde(rename = "mergeRequests")]
    MergeRequests,
    #[serde(rename = "branches")]
    Branches,
    #[serde(rename = "pipelines")]
    Pipelines,
    #[serde(rename = "commits")]
    Commits,
    #[serde(rename = "releases")]
    Releases,
    #[serde(rename = "vulnerabilities")]
    Vulnerabilities,
    #[serde(rename = "timelogs")]
    Timelogs,
    #[serde(rename = "labels")]
    Labels,
    #[serde(rename = "milestones")]
    Milestones,
    #[serde(rename = "epics")]
    Epics,
    #[serde(rename = "authorizationScope")]
    AuthorizationScope,
}

crate::simple_display! {
    CrawlCommand {
        GroupProjectDiscovery => "GROUP_PROJECT_DISCOVERY",
        Group => "group",
        GroupMembers => "groupMembers",
        GroupProjects => "groupProjects",
        GroupIssues => "groupIssues",
        GroupSubgroups => "groupSubgroups",
        Project => "project",
        ProjectMembers => "projectMembers",
        Issues => "issues",
        MergeRequests => "mergeRequests",
        Branches => "branches",
        Pipelines => "pipelines",
        Commits => "commits",
        Releases => "releases",
        Vulnerabilities => "vulnerabilities",
        Timelogs => "timelogs",
        Labels => "labels",
        Milestones => "milestones",
        Epics => "epics",
        AuthorizationScope => "authorizationScope",
    }
}

/// Resource class a task descriptor addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceType {
    #[serde(rename = "group")]
    Group,
    #[serde(rename = "project")]
    Project,
    #[serde(rename = "user")]
    User,
    #[serde(rename = "instance")]
    Instance,
    #[serde(rename = "GROUP_PROJECT_DISCOVERY")]
    Discovery,
}

crate::simple_display! {
    ResourceType {
        Group => "group",
        Project => "project",
        User => "user",
        Instance => "instance",
        Discovery => "GROUP_PROJECT_DISCOVERY",
    }
}

const ALL: &[CrawlCommand] = &[
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

/// Commands fanned out for a newly discovered group.
const GROUP_COMMANDS: &[CrawlCommand] = &[
    CrawlCommand::Group,
    CrawlCommand::GroupMembers,
    CrawlCommand::GroupProjects,
    CrawlCommand::GroupSubgroups,
    CrawlCommand::GroupIssues,
    CrawlCommand::Epics,
];

/// Commands fanned out for a newly discovered project.
const PROJECT_COMMANDS: &[CrawlCommand] = &[
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
];

impl CrawlCommand {
    /// Case-insensitive parse of a wire spelling.
    pub fn parse(s: &str) -> Option<Self> {
        let lowered = s.to_ascii_lowercase();
        ALL.iter().copied().find(|c| c.to_string().to_ascii_lowercase() == lowered)
    }

    pub fn group_commands() -> &'static [CrawlCommand] {
        GROUP_COMMANDS
    }

    pub fn project_commands() -> &'static [CrawlCommand] {
        PROJECT_COMMANDS
    }

    /// Whether executing this command can surface new areas to fan out.
    pub fn is_discovery(&self) -> bool {
        matches!(
            self,
            CrawlCommand::GroupProjectDiscovery
                | CrawlCommand::GroupProjects
                | CrawlCommand::GroupSubgroups
        )
    }

    /// Resource class for the task descriptor.
    pub fn resource_type(&self) -> ResourceType {
        match self {
            CrawlCommand::GroupProjectDiscovery => ResourceType::Discovery,
            CrawlCommand::Group
            | CrawlCommand::GroupMembers
            | CrawlCommand::GroupProjects
            | CrawlCommand::GroupIssues
            | CrawlCommand::GroupSubgroups
            | CrawlCommand::Epics => ResourceType::Group,
            CrawlCommand::Project
            | CrawlCommand::ProjectMembers
            | CrawlCommand::Issues
            | CrawlCommand::MergeRequests
            | CrawlCommand::Branches
            | CrawlCommand::Pipelines
            | CrawlCommand::Commits
            | CrawlCommand::Releases
            | CrawlCommand::Vulnerabilities
            | CrawlCommand::Timelogs
            | CrawlCommand::Labels
            | CrawlCommand::Milestones => ResourceType::Project,
            CrawlCommand::AuthorizationScope => ResourceType::Instance,
        }
    }

    /// Data types the crawler iterates for this command.
    ///
    /// The names are the per-dataType progress keys; `groupProjects` and
    /// `groupSubgroups` keep their command spelling because the pagination
    /// loop keys child-area fan-out on them.
    pub fn data_types(&self) -> &'static [&'static str] {
        match self {
            CrawlCommand::GroupProjectDiscovery => &["discover_all_groups_projects"],
            CrawlCommand::Group => &["groupDetails"],
            CrawlCommand::Project => &["details"],
            CrawlCommand::GroupMembers => &["groupMembers"],
            CrawlCommand::ProjectMembers => &["members"],
            CrawlCommand::GroupProjects => &["groupProjects"],
            CrawlCommand::GroupIssues => &["groupIssues"],
            CrawlCommand::GroupSubgroups => &["groupSubgroups"],
            CrawlCommand::Issues => &["issues"],
            CrawlCommand::MergeRequests => &["mergeRequests"],
            CrawlCommand::Branches => &["branches"],
            CrawlCommand::Pipelines => &["pipelines"],
            CrawlCommand::Commits => &["commits"],
            CrawlCommand::Releases => &["releases"],
            CrawlCommand::Vulnerabilities => &["vulnerabilities"],
            CrawlCommand::Timelogs => &["timelogs"],
            CrawlCommand::Labels => &["labels"],
            CrawlCommand::Milestones => &["milestones"],
            CrawlCommand::Epics => &["epics"],
            CrawlCommand::AuthorizationScope => &["authorizationScope"],
        }
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
