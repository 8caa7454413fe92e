//! Upstream page sources
//!
//! [`PageFetcher`] fetches exactly one page for a cursor; [`PageStream`]
//! walks the cursor chain lazily. Neither persists anything: resuming is
//! done by constructing a stream from a checkpointed cursor.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::models::{DateWindow, RawPage, SourceKind};

pub mod clinical_trials;
pub mod http;
pub mod openfda;

pub use http::HttpSourceClient;

/// Request for one upstream page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub url: String,
    pub query: Vec<(&'static str, String)>,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch the page at `cursor` (`None` = first page) of `window`
    async fn fetch_page(
        &self,
        source: SourceKind,
        window: &DateWindow,
        cursor: Option<&str>,
        page_number: u32,
    ) -> Result<RawPage>;
}

/// Lazy, restartable sequence of pages for one `(source, window)`
pub struct PageStream {
    fetcher: Arc<dyn PageFetcher>,
    source: SourceKind,
    window: DateWindow,
    cursor: Option<String>,
    pages_fetched: u32,
    finished: bool,
}

impl PageStream {
    pub fn new(fetcher: Arc<dyn PageFetcher>, source: SourceKind, window: DateWindow) -> Self {
        Self {
            fetcher,
            source,
            window,
            cursor: None,
            pages_fetched: 0,
            finished: false,
        }
    }

    /// Continue after `pages_completed` pages, starting at `cursor`.
    /// A `None` cursor after at least one page means the window is exhausted.
    pub fn resume_from(
        fetcher: Arc<dyn PageFetcher>,
        source: SourceKind,
        window: DateWindow,
        cursor: Option<String>,
        pages_completed: u32,
    ) -> Self {
        Self {
            fetcher,
            source,
            window,
            finished: pages_completed > 0 && cursor.is_none(),
            cursor,
            pages_fetched: pages_completed,
        }
    }

    /// Cursor of the next page to be fetched
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Fetch the next page, or `None` once the last page has been returned
    pub async fn next_page(&mut self) -> Result<Option<RawPage>> {
        if self.finished {
            return Ok(None);
        }

        let page_number = self.pages_fetched + 1;
        let page = self
            .fetcher
            .fetch_page(self.source, &self.window, self.cursor.as_deref(), page_number)
            .await?;

        debug!(
            source = %self.source,
            page_number,
            records = page.records.len(),
            next_cursor = ?page.next_cursor,
            "Fetched page"
        );

        self.pages_fetched = page_number;
        self.cursor = page.next_cursor.clone();
        self.finished = page.is_last();
        Ok(Some(page))
    }
}
