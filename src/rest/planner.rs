//! Query window planning
//!
//! A query that times out is retried over the first half of its window. When
//! a bounded window succeeds, the range from its end to now is queued next.
//! Windows live on a stack; there is no recursion.

use super::types::{RestConfig, Window};
use crate::error::{Error, Result};
use crate::types::format_datetime;
use chrono::{DateTime, SubsecRound, Utc};
use tracing::{debug, info};

/// Decides which window to query next
#[derive(Debug, Clone)]
pub struct WindowPlanner {
    stream: String,
    config: RestConfig,
    stack: Vec<Window>,
    completed: Vec<Window>,
    consecutive_timeouts: u32,
}

impl WindowPlanner {
    /// Plan a query of `stream` from `start` to now
    pub fn new(stream: impl Into<String>, start: DateTime<Utc>, config: RestConfig) -> Self {
        Self {
            stream: stream.into(),
            config,
            stack: vec![Window::open(start)],
            completed: Vec::new(),
            consecutive_timeouts: 0,
        }
    }

    /// Window to query next; `None` once everything up to now is covered
    pub fn current(&self) -> Option<&Window> {
        self.stack.last()
    }

    /// Windows that completed, in order
    pub fn completed(&self) -> &[Window] {
        &self.completed
    }

    /// Timeouts since the last success
    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts
    }

    /// The current window returned every page
    pub fn on_success(&mut self) {
        let Some(window) = self.stack.pop() else {
            return;
        };
        self.consecutive_timeouts = 0;

        if let Some(end) = window.end {
            if self.stack.is_empty() {
                debug!("{}: window {window} done, continuing from its end", self.stream);
                self.stack.push(Window {
                    start: end,
                    start_inclusive: true,
                    end: None,
                });
            }
        }
        self.completed.push(window);
    }

    /// The current window timed out; narrow it to its first half.
    ///
    /// `now` stands in for the end of an open window.
    pub fn on_timeout(&mut self, now: DateTime<Utc>) -> Result<()> {
        let Some(window) = self.stack.pop() else {
            return Ok(());
        };
        self.consecutive_timeouts += 1;

        let end = window.end.unwrap_or(now);
        let half = (end - window.start) / 2;
        info!(
            "{} returned QUERY_TIMEOUT querying {} days",
            self.stream,
            (end - window.start).num_days()
        );

        if half < self.config.min_window {
            return Err(Error::UnrecoverableQueryWindow {
                stream: self.stream.clone(),
                start: format_datetime(&window.start),
                end: format_datetime(&end),
                min_width_secs: self.config.min_window.num_seconds(),
            });
        }
        if self.consecutive_timeouts >= self.config.max_retries {
            return Err(Error::QueryRetriesExhausted {
                stream: self.stream.clone(),
                attempts: self.consecutive_timeouts,
            });
        }

        let narrowed = Window {
            end: Some((window.start + half).trunc_subsecs(0)),
            ..window
        };
        debug!("{}: retrying narrowed window {narrowed}", self.stream);
        self.stack.push(narrowed);
        Ok(())
    }
}
