//! Engine types
//!
//! Output messages, sync configuration and run statistics.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::state::StreamState;
use crate::types::{parse_datetime, ApiType, JsonObject};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// A message emitted during sync
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// One extracted record
    Record {
        /// Stream name
        stream: String,
        /// The record
        record: JsonObject,
        /// Table version the record belongs to
        version: i64,
        /// When the record was handed on
        time_extracted: DateTime<Utc>,
    },
    /// Position update
    State {
        /// Stream name
        stream: String,
        /// Stream state after the update
        value: StreamState,
    },
    /// Marks `version` as the current table version
    ActivateVersion {
        /// Stream name
        stream: String,
        /// Table version
        version: i64,
    },
}

impl Message {
    /// Create a record message stamped now
    pub fn record(stream: impl Into<String>, record: JsonObject, version: i64) -> Self {
        Self::Record {
            stream: stream.into(),
            record,
            version,
            time_extracted: Utc::now(),
        }
    }

    /// Create a state message
    pub fn state(stream: impl Into<String>, value: StreamState) -> Self {
        Self::State {
            stream: stream.into(),
            value,
        }
    }

    /// Create an activate-version message
    pub fn activate_version(stream: impl Into<String>, version: i64) -> Self {
        Self::ActivateVersion {
            stream: stream.into(),
            version,
        }
    }

    /// Check if this is a record message
    pub fn is_record(&self) -> bool {
        matches!(self, Self::Record { .. })
    }

    /// Stream the message belongs to
    pub fn stream(&self) -> &str {
        match self {
            Self::Record { stream, .. }
            | Self::State { stream, .. }
            | Self::ActivateVersion { stream, .. } => stream,
        }
    }

    /// Serialize as one JSON line (without the newline)
    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Configuration for sync operation
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Where targets without a bookmark start
    pub start_date: DateTime<Utc>,
    /// API used by targets that do not pick one
    pub api_type: ApiType,
}

impl SyncConfig {
    /// Create a sync config
    pub fn new(start_date: DateTime<Utc>) -> Self {
        Self {
            start_date,
            api_type: ApiType::default(),
        }
    }

    /// Derive from the run config
    pub fn from_config(config: &Config) -> Result<Self> {
        let start_date = parse_datetime(&config.start_date)
            .ok_or_else(|| Error::invalid_value("start_date", "not a datetime"))?;
        Ok(Self::new(start_date).with_api_type(config.api_type))
    }

    /// Set the default API
    #[must_use]
    pub fn with_api_type(mut self, api_type: ApiType) -> Self {
        self.api_type = api_type;
        self
    }
}

/// Statistics from a sync run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Records delivered per stream
    pub records: BTreeMap<String, u64>,
    /// Streams whose PK-chunked jobs failed and fell back to one batch
    pub chunking_failures: Vec<String>,
    /// Targets that finished
    pub targets_synced: usize,
    /// Targets that failed
    pub targets_failed: usize,
}

impl SyncStats {
    /// Create new stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one record
    pub fn add_record(&mut self, stream: &str) {
        *self.records.entry(stream.to_string()).or_default() += 1;
    }

    /// Records delivered for a stream
    pub fn records_for(&self, stream: &str) -> u64 {
        self.records.get(stream).copied().unwrap_or(0)
    }

    /// Records delivered across all streams
    pub fn total_records(&self) -> u64 {
        self.records.values().sum()
    }

    /// Note a chunking fallback
    pub fn add_chunking_failure(&mut self, stream: &str) {
        self.chunking_failures.push(stream.to_string());
    }

    /// Count a finished target
    pub fn add_target(&mut self) {
        self.targets_synced += 1;
    }

    /// Count a failed target
    pub fn add_failure(&mut self) {
        self.targets_failed += 1;
    }
}
