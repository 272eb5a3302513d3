// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Happy-path discovery pipeline: authorization → discovery job →
//! area fan-out → child jobs, end to end over the socket.

use super::support::{eventually, start_backend, start_crawler, ScriptedFetcher};
use dredge_core::{CrawlCommand, JobStatus};
use dredge_crawler::{Page, PageInfo};
use serde_json::json;

fn page(nodes: Vec<serde_json::Value>, end_cursor: Option<&str>, has_next: bool) -> Page {
    Page {
        nodes,
        page_info: PageInfo {
            has_next_page: has_next,
            end_cursor: end_cursor.map(str::to_string),
        },
    }
}

#[tokio::test]
async fn discovery_fans_out_and_all_jobs_finish() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("api.sock");
    let backend = start_backend(dir.path(), &socket);

    // Discovery: page 1 yields two groups, page 2 ends the group walk,
    // then the project walk is empty. Every child job sees empty pages.
    let fetcher = ScriptedFetcher::new(vec![
        Ok(page(
            vec![
                json!({"id": "gid://gitlab/Group/1", "name": "a", "fullPath": "g/a"}),
                json!({"id": "gid://gitlab/Group/2", "name": "b", "fullPath": "g/b"}),
            ],
            Some("gc1"),
            true,
        )),
        Ok(page(vec![], None, false)),
        Ok(page(vec![], None, false)),
    ]);
    let crawler_cancel = start_crawler(dir.path(), &socket, "crawler-spec", fetcher);

    // Both areas recorded, the full group command set queued per area,
    // and everything eventually drains to finished.
    let expected_jobs = 1 + 2 * CrawlCommand::group_commands().len();
    eventually("all jobs to finish", || {
        backend.store.count_with_status(JobStatus::Finished) == expected_jobs
    })
    .await;

    assert!(backend.store.area("g/a").is_some());
    assert!(backend.store.area("g/b").is_some());

    let jobs = backend.store.jobs_snapshot();
    assert_eq!(jobs.len(), expected_jobs);
    let discovery = jobs
        .iter()
        .find(|j| j.command == CrawlCommand::GroupProjectDiscovery)
        .unwrap();
    // Completion cleared the discovery checkpoint.
    assert!(discovery.resume_state.is_none());

    // Duplicate suppression held: one row per (command, path).
    for area in ["g/a", "g/b"] {
        for command in CrawlCommand::group_commands() {
            let count = jobs
                .iter()
                .filter(|j| j.command == *command && j.full_path.as_deref() == Some(area))
                .count();
            assert_eq!(count, 1, "expected one {command} job for {area}");
        }
    }

    crawler_cancel.cancel();
    backend.cancel.cancel();
}
