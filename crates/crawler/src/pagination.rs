// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cursor pagination over the GitLab contract.
//!
//! Every list returns `{ pageInfo { hasNextPage, endCursor }, nodes }`.
//! A missing `pageInfo` means a single page. The [`Pager`] is a plain
//! pull loop over a [`PageFetcher`], so tests inject synthetic pages and
//! the job manager decides between pages whether to pause or abort.

use async_trait::async_trait;
use dredge_core::ErrorKind;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from provider")]
    Status { status: u16 },

    #[error("access token rejected")]
    Unauthorized,

    #[error("rate limited by provider")]
    RateLimited,

    #[error("GraphQL errors: {0}")]
    GraphQl(String),

    #[error("response missing {path}")]
    MissingData { path: String },

    #[error("unsupported data type: {0}")]
    UnsupportedDataType(String),
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Http(e) if e.is_timeout() => ErrorKind::Timeout,
            FetchError::Http(_) | FetchError::Status { .. } => ErrorKind::Network,
            FetchError::Unauthorized => ErrorKind::Authentication,
            FetchError::RateLimited => ErrorKind::RateLimiting,
            FetchError::GraphQl(_) | FetchError::MissingData { .. } => ErrorKind::JobProcessing,
            FetchError::UnsupportedDataType(_) => ErrorKind::Configuration,
        }
    }
}

/// The pagination contract's `pageInfo`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    #[serde(default)]
    pub has_next_page: bool,
    #[serde(default)]
    pub end_cursor: Option<String>,
}

/// One fetched page.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub nodes: Vec<serde_json::Value>,
    pub page_info: PageInfo,
}

impl Page {
    /// Build from a raw connection value, treating absent `pageInfo` as
    /// a single page.
    pub fn from_connection(connection: &serde_json::Value) -> Self {
        let nodes = connection
            .get("nodes")
            .and_then(|n| n.as_array())
            .cloned()
            .unwrap_or_default();
        let page_info = connection
            .get("pageInfo")
            .and_then(|p| serde_json::from_value(p.clone()).ok())
            .unwrap_or_default();
        Self { nodes, page_info }
    }

    /// Wrap a single object as a one-page result.
    pub fn single(node: serde_json::Value) -> Self {
        Self { nodes: vec![node], page_info: PageInfo::default() }
    }
}

/// Fetches one page of one data type.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, data_type: &str, after: Option<&str>) -> Result<Page, FetchError>;
}

/// Pull-style pagination over one data type.
pub struct Pager<'a> {
    fetcher: &'a dyn PageFetcher,
    data_type: &'a str,
    cursor: Option<String>,
    exhausted: bool,
}

impl<'a> Pager<'a> {
    /// Start (or resume, when `cursor` is set) a walk.
    pub fn new(fetcher: &'a dyn PageFetcher, data_type: &'a str, cursor: Option<String>) -> Self {
        Self { fetcher, data_type, cursor, exhausted: false }
    }

    /// Cursor of the last fetched page; the checkpoint value.
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// Fetch the next page, or `None` once the connection is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Page>, FetchError> {
        if self.exhausted {
            return Ok(None);
        }
        let page = self.fetcher.fetch_page(self.data_type, self.cursor.as_deref()).await?;
        if page.page_info.has_next_page {
            self.cursor = page.page_info.end_cursor.clone();
        } else {
            self.exhausted = true;
            if page.page_info.end_cursor.is_some() {
                self.cursor = page.page_info.end_cursor.clone();
            }
        }
        Ok(Some(page))
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

#[cfg(test)]
#[path = "pagination_tests.rs"]
mod tests;
