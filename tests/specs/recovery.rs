// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Crawler death mid-pagination: the backend requeues the running job
//! and a replacement crawler resumes from the persisted cursor.

use super::support::{eventually, start_backend, start_crawler, ScriptedFetcher};
use dredge_core::{CrawlCommand, JobStatus};
use dredge_crawler::{Page, PageInfo};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Semaphore;

#[tokio::test]
async fn crawler_death_requeues_and_resumes_from_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("api.sock");
    let backend = start_backend(dir.path(), &socket);

    // First crawler: serves one discovery page (cursor gc1), then blocks
    // forever on the gate — the moral equivalent of a wedged process.
    let gate = Arc::new(Semaphore::new(1));
    let first_fetcher = ScriptedFetcher::gated(
        vec![Ok(Page {
            nodes: vec![json!({"id": "1", "name": "a", "fullPath": "g/a"})],
            page_info: PageInfo { has_next_page: true, end_cursor: Some("gc1".to_string()) },
        })],
        Arc::clone(&gate),
    );
    let first_cancel = start_crawler(dir.path(), &socket, "crawler-one", first_fetcher);

    // Wait until the first page's checkpoint landed in the store.
    eventually("first checkpoint to persist", || {
        backend
            .store
            .jobs_snapshot()
            .iter()
            .find(|j| j.command == CrawlCommand::GroupProjectDiscovery)
            .and_then(|j| j.resume_state.clone())
            .map(|resume| resume["groupCursor"] == "gc1")
            .unwrap_or(false)
    })
    .await;

    // Kill the crawler. The disconnect resets running → queued with
    // started_at cleared.
    first_cancel.cancel();
    eventually("running job to be requeued", || {
        backend.store.count_with_status(JobStatus::Running) == 0
            && backend.store.count_with_status(JobStatus::Queued) >= 1
    })
    .await;
    let requeued = backend
        .store
        .jobs_snapshot()
        .into_iter()
        .find(|j| j.command == CrawlCommand::GroupProjectDiscovery)
        .unwrap();
    assert_eq!(requeued.status, JobStatus::Queued);
    assert!(requeued.started_at_ms.is_none());
    assert!(requeued.resume_state.is_some());

    // Replacement crawler finishes both walks from the checkpoint.
    let second_fetcher = ScriptedFetcher::new(vec![
        Ok(Page::default()), // group walk ends immediately
        Ok(Page::default()), // project walk is empty
    ]);
    let second_cancel =
        start_crawler(dir.path(), &socket, "crawler-two", Arc::clone(&second_fetcher));

    eventually("discovery to finish on the second crawler", || {
        backend
            .store
            .jobs_snapshot()
            .iter()
            .any(|j| j.command == CrawlCommand::GroupProjectDiscovery && j.status == JobStatus::Finished)
    })
    .await;

    // The resumed walk started from the persisted cursor, so records
    // before it were not re-fetched.
    let cursors = second_fetcher.cursors.lock().unwrap().clone();
    assert_eq!(cursors[0].1.as_deref(), Some("gc1"));

    second_cancel.cancel();
    backend.cancel.cancel();
}
