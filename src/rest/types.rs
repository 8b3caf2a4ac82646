//! Paginated query types and traits

use crate::config::RestSettings;
use crate::error::Result;
use crate::types::{format_datetime, JsonObject};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::fmt;

/// One page fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRequest {
    /// Start a query
    Query(String),
    /// Follow a `nextRecordsUrl` cursor (instance-relative path)
    Next(String),
}

/// One page of query results
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct QueryPage {
    /// Records on this page
    #[serde(default)]
    pub records: Vec<JsonObject>,

    /// Cursor for the next page
    #[serde(default, rename = "nextRecordsUrl")]
    pub next_records_url: Option<String>,

    /// Whether this is the last page
    #[serde(default = "default_done")]
    pub done: bool,
}

fn default_done() -> bool {
    true
}

impl QueryPage {
    /// Cursor to follow, if more pages remain
    pub fn next_request(&self) -> Option<PageRequest> {
        if self.done {
            return None;
        }
        self.next_records_url.clone().map(PageRequest::Next)
    }
}

/// Source of query pages
#[async_trait]
pub trait QueryTransport: Send + Sync {
    /// Fetch one page
    async fn fetch_page(&self, request: &PageRequest) -> Result<QueryPage>;
}

/// Replication-key range of one query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Lower bound
    pub start: DateTime<Utc>,
    /// Whether records exactly at `start` belong to the window
    pub start_inclusive: bool,
    /// Exclusive upper bound; `None` runs to now
    pub end: Option<DateTime<Utc>>,
}

impl Window {
    /// Window from `start` (exclusive) to now
    pub fn open(start: DateTime<Utc>) -> Self {
        Self {
            start,
            start_inclusive: false,
            end: None,
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open = if self.start_inclusive { '[' } else { '(' };
        match self.end {
            Some(end) => write!(
                f,
                "{open}{}, {})",
                format_datetime(&self.start),
                format_datetime(&end)
            ),
            None => write!(f, "{open}{}, now)", format_datetime(&self.start)),
        }
    }
}

/// Retry policy for query timeouts
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Consecutive timeouts tolerated
    pub max_retries: u32,
    /// Narrowest window a bisection may produce
    pub min_window: Duration,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self::from_settings(&RestSettings::default())
    }
}

impl RestConfig {
    /// Build from the `rest` section of the run config
    pub fn from_settings(settings: &RestSettings) -> Self {
        Self {
            max_retries: settings.max_retries.max(1),
            min_window: Duration::seconds(settings.min_window_secs.max(1)),
        }
    }

    /// Set the timeout budget
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    /// Set the narrowest window
    #[must_use]
    pub fn with_min_window(mut self, width: Duration) -> Self {
        self.min_window = width.max(Duration::seconds(1));
        self
    }
}
