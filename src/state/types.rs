//! State types for tracking extraction progress
//!
//! These types are serialized to JSON and persisted between runs.

use crate::types::parse_datetime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Complete state for a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Per-stream state
    #[serde(default)]
    pub bookmarks: BTreeMap<String, StreamState>,
}

impl State {
    /// Create a new empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get state for a stream
    pub fn get_stream(&self, stream: &str) -> Option<&StreamState> {
        self.bookmarks.get(stream)
    }

    /// Get mutable state for a stream, creating if needed
    pub fn get_stream_mut(&mut self, stream: &str) -> &mut StreamState {
        self.bookmarks.entry(stream.to_string()).or_default()
    }
}

/// Where a stream's extraction stands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Position {
    /// Plain incremental bookmark
    Replication {
        /// Highest replication key value delivered
        value: String,
    },

    /// A bulk job whose results are still being delivered
    BulkJob {
        /// Remote job id
        job_id: String,
        /// Completed partitions not yet delivered, in remote order
        pending_partitions: Vec<String>,
        /// Highest replication key value delivered from this job
        #[serde(default)]
        highest_seen: Option<String>,
        /// Bookmark the job was submitted from
        #[serde(default)]
        started_from: Option<String>,
    },
}

/// State for a single stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamState {
    /// Table version announced with `ACTIVATE_VERSION`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,

    /// Replication bookmark or in-flight bulk job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl StreamState {
    /// Create a new empty stream state
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether nothing has been recorded for the stream
    pub fn is_empty(&self) -> bool {
        self.version.is_none() && self.position.is_none()
    }

    /// Plain replication bookmark, if that is the current position
    pub fn replication_value(&self) -> Option<&str> {
        match &self.position {
            Some(Position::Replication { value }) => Some(value),
            _ => None,
        }
    }

    /// In-flight bulk job id and its pending partitions
    pub fn bulk_job(&self) -> Option<(&str, &[String])> {
        match &self.position {
            Some(Position::BulkJob {
                job_id,
                pending_partitions,
                ..
            }) => Some((job_id, pending_partitions)),
            _ => None,
        }
    }

    /// Replace the position with a plain bookmark
    pub fn set_replication_value(&mut self, value: impl Into<String>) {
        self.position = Some(Position::Replication {
            value: value.into(),
        });
    }

    /// Collapse a bulk job position into the bookmark it earned.
    ///
    /// Never moves behind the bookmark the job started from.
    pub fn finish_bulk_job(&mut self) {
        if let Some(Position::BulkJob {
            highest_seen,
            started_from,
            ..
        }) = self.position.take()
        {
            self.position = later_bookmark(started_from, highest_seen)
                .map(|value| Position::Replication { value });
        }
    }

    /// Drop a bulk job position and return to the bookmark it started from
    pub fn abandon_bulk_job(&mut self) {
        if let Some(Position::BulkJob { started_from, .. }) = self.position.take() {
            self.position = started_from.map(|value| Position::Replication { value });
        }
    }
}

/// The later of two bookmark values; unparseable values lose
pub fn later_bookmark(current: Option<String>, candidate: Option<String>) -> Option<String> {
    match (current, candidate) {
        (None, candidate) => candidate,
        (current, None) => current,
        (Some(current), Some(candidate)) => {
            match (parse_datetime(&current), parse_datetime(&candidate)) {
                (Some(a), Some(b)) if b > a => Some(candidate),
                (None, Some(_)) => Some(candidate),
                _ => Some(current),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn job(highest: Option<&str>, started: Option<&str>) -> StreamState {
        StreamState {
            version: Some(1),
            position: Some(Position::BulkJob {
                job_id: "750x".to_string(),
                pending_partitions: vec!["751a".to_string()],
                highest_seen: highest.map(String::from),
                started_from: started.map(String::from),
            }),
        }
    }

    #[test]
    fn test_state_serialization_shape() {
        let mut state = State::new();
        state
            .get_stream_mut("Account")
            .set_replication_value("2024-01-01T00:00:00.000000Z");
        state.get_stream_mut("Contact").position = job(None, None).position;

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"bookmarks": {
                "Account": {"position": {"kind": "replication", "value": "2024-01-01T00:00:00.000000Z"}},
                "Contact": {"position": {
                    "kind": "bulk_job",
                    "job_id": "750x",
                    "pending_partitions": ["751a"],
                    "highest_seen": null,
                    "started_from": null
                }}
            }})
        );

        let restored: State = serde_json::from_value(json).unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn test_positions_are_exclusive() {
        let mut stream = job(None, None);
        assert!(stream.replication_value().is_none());
        assert_eq!(stream.bulk_job().unwrap().0, "750x");

        stream.set_replication_value("2024-01-01");
        assert!(stream.bulk_job().is_none());
        assert_eq!(stream.replication_value(), Some("2024-01-01"));
    }

    #[test]
    fn test_finish_bulk_job() {
        let mut stream = job(Some("2024-02-01"), Some("2024-01-01"));
        stream.finish_bulk_job();
        assert_eq!(stream.replication_value(), Some("2024-02-01"));
        assert_eq!(stream.version, Some(1));

        let mut stream = job(None, Some("2024-01-01"));
        stream.finish_bulk_job();
        assert_eq!(stream.replication_value(), Some("2024-01-01"));

        let mut stream = job(Some("2023-12-01"), Some("2024-01-01"));
        stream.finish_bulk_job();
        assert_eq!(stream.replication_value(), Some("2024-01-01"));

        let mut stream = job(None, None);
        stream.finish_bulk_job();
        assert!(stream.position.is_none());
    }

    #[test]
    fn test_abandon_bulk_job_reverts_to_start() {
        let mut stream = job(Some("2024-02-01"), Some("2024-01-01"));
        stream.abandon_bulk_job();
        assert_eq!(stream.replication_value(), Some("2024-01-01"));
    }

    #[test]
    fn test_later_bookmark() {
        let a = Some("2024-01-01T00:00:00Z".to_string());
        let b = Some("2024-01-02T00:00:00.000+0000".to_string());
        assert_eq!(later_bookmark(a.clone(), b.clone()), b);
        assert_eq!(later_bookmark(b.clone(), a.clone()), b);
        assert_eq!(later_bookmark(None, a.clone()), a);
        assert_eq!(later_bookmark(a.clone(), None), a);
        assert_eq!(later_bookmark(a.clone(), Some("garbage".to_string())), a);
    }
}
