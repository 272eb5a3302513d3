// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

/// Serves scripted pages and records the cursors it was asked for.
pub(crate) struct ScriptedFetcher {
    pages: Mutex<Vec<Result<Page, FetchError>>>,
    pub requested_cursors: Mutex<Vec<Option<String>>>,
}

impl ScriptedFetcher {
    pub fn new(pages: Vec<Result<Page, FetchError>>) -> Self {
        Self { pages: Mutex::new(pages), requested_cursors: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch_page(&self, _data_type: &str, after: Option<&str>) -> Result<Page, FetchError> {
        self.requested_cursors.lock().push(after.map(str::to_string));
        let mut pages = self.pages.lock();
        if pages.is_empty() {
            return Ok(Page::default());
        }
        pages.remove(0)
    }
}

pub(crate) fn page(nodes: Vec<serde_json::Value>, end_cursor: Option<&str>, has_next: bool) -> Page {
    Page {
        nodes,
        page_info: PageInfo {
            has_next_page: has_next,
            end_cursor: end_cursor.map(str::to_string),
        },
    }
}

#[tokio::test]
async fn walks_until_has_next_page_is_false() {
    let fetcher = ScriptedFetcher::new(vec![
        Ok(page(vec![json!({"n": 1})], Some("c1"), true)),
        Ok(page(vec![json!({"n": 2})], Some("c2"), false)),
    ]);
    let mut pager = Pager::new(&fetcher, "issues", None);

    let first = pager.next_page().await.unwrap().unwrap();
    assert_eq!(first.nodes.len(), 1);
    assert_eq!(pager.cursor(), Some("c1"));
    assert!(!pager.is_exhausted());

    let second = pager.next_page().await.unwrap().unwrap();
    assert_eq!(second.nodes[0]["n"], 2);
    assert!(pager.is_exhausted());

    assert!(pager.next_page().await.unwrap().is_none());
    assert_eq!(
        *fetcher.requested_cursors.lock(),
        vec![None, Some("c1".to_string())]
    );
}

#[tokio::test]
async fn resumes_from_a_checkpointed_cursor() {
    let fetcher = ScriptedFetcher::new(vec![Ok(page(vec![json!({"n": 5})], Some("c5"), false))]);
    let mut pager = Pager::new(&fetcher, "issues", Some("c4".to_string()));
    pager.next_page().await.unwrap();
    assert_eq!(*fetcher.requested_cursors.lock(), vec![Some("c4".to_string())]);
}

#[tokio::test]
async fn missing_page_info_means_single_page() {
    let connection = json!({ "nodes": [{"id": 1}, {"id": 2}] });
    let page = Page::from_connection(&connection);
    assert_eq!(page.nodes.len(), 2);
    assert!(!page.page_info.has_next_page);
    assert!(page.page_info.end_cursor.is_none());

    let fetcher = ScriptedFetcher::new(vec![Ok(page)]);
    let mut pager = Pager::new(&fetcher, "details", None);
    assert!(pager.next_page().await.unwrap().is_some());
    assert!(pager.next_page().await.unwrap().is_none());
}

#[tokio::test]
async fn errors_do_not_advance_the_cursor() {
    let fetcher = ScriptedFetcher::new(vec![
        Ok(page(vec![json!({"n": 1})], Some("c1"), true)),
        Err(FetchError::Status { status: 502 }),
        Ok(page(vec![json!({"n": 2})], Some("c2"), false)),
    ]);
    let mut pager = Pager::new(&fetcher, "issues", None);

    pager.next_page().await.unwrap();
    assert!(pager.next_page().await.is_err());
    // Cursor still points at the last successful page.
    assert_eq!(pager.cursor(), Some("c1"));

    // Retrying fetches the same cursor again.
    pager.next_page().await.unwrap();
    assert_eq!(
        *fetcher.requested_cursors.lock(),
        vec![None, Some("c1".to_string()), Some("c1".to_string())]
    );
}

#[test]
fn connection_parse_tolerates_malformed_page_info() {
    let connection = json!({ "nodes": [], "pageInfo": "garbage" });
    let page = Page::from_connection(&connection);
    assert!(!page.page_info.has_next_page);
}

#[test]
fn fetch_error_kinds_classify_for_reporting() {
    assert_eq!(FetchError::Unauthorized.kind(), dredge_core::ErrorKind::Authentication);
    assert_eq!(FetchError::RateLimited.kind(), dredge_core::ErrorKind::RateLimiting);
    assert_eq!(
        FetchError::Status { status: 500 }.kind(),
        dredge_core::ErrorKind::Network
    );
    assert_eq!(
        FetchError::UnsupportedDataType("x".into()).kind(),
        dredge_core::ErrorKind::Configuration
    );
}
