//! Extraction targets
//!
//! A target is one object type to extract, with the fields to select and the
//! replication key that orders and filters it. Targets are resolved by the
//! caller (the CLI loads them from a file) and never change during a pass.

use crate::error::{Error, Result};
use crate::types::{format_datetime, ApiType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One object type to extract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionTarget {
    /// Object name, used as the stream name
    pub stream: String,

    /// Fields to select
    pub properties: Vec<String>,

    /// Field that orders and filters incremental extraction
    #[serde(default)]
    pub replication_key: Option<String>,

    /// Primary key fields
    #[serde(default = "default_key_properties")]
    pub key_properties: Vec<String>,

    /// API to extract with; the run's `api_type` when absent
    #[serde(default)]
    pub mode: Option<ApiType>,

    /// Literal query to run instead of the generated one
    #[serde(default)]
    pub query_override: Option<String>,
}

fn default_key_properties() -> Vec<String> {
    vec!["Id".to_string()]
}

impl ExtractionTarget {
    /// Create a target selecting `properties` from `stream`
    pub fn new(stream: impl Into<String>, properties: Vec<String>) -> Self {
        Self {
            stream: stream.into(),
            properties,
            replication_key: None,
            key_properties: default_key_properties(),
            mode: None,
            query_override: None,
        }
    }

    /// Set the replication key
    #[must_use]
    pub fn with_replication_key(mut self, key: impl Into<String>) -> Self {
        self.replication_key = Some(key.into());
        self
    }

    /// Set the extraction mode
    #[must_use]
    pub fn with_mode(mut self, mode: ApiType) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set a literal query
    #[must_use]
    pub fn with_query_override(mut self, query: impl Into<String>) -> Self {
        self.query_override = Some(query.into());
        self
    }

    /// Load a list of targets from a JSON or YAML file
    pub fn load_all(path: impl AsRef<Path>) -> Result<Vec<Self>> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read targets file {}: {e}", path.display()))
        })?;
        let targets: Vec<Self> = serde_yaml::from_str(&contents)?;
        for target in &targets {
            target.validate()?;
        }
        Ok(targets)
    }

    /// Validate the target definition
    pub fn validate(&self) -> Result<()> {
        if self.stream.trim().is_empty() {
            return Err(Error::missing_field("stream"));
        }
        if self.properties.is_empty() && self.query_override.is_none() {
            return Err(Error::invalid_value(
                format!("{}.properties", self.stream),
                "at least one property must be selected",
            ));
        }
        Ok(())
    }

    /// Mode this target extracts with under a run default
    pub fn effective_mode(&self, default: ApiType) -> ApiType {
        if self.query_override.is_some() {
            return ApiType::Rest;
        }
        self.mode.unwrap_or(default)
    }

    /// Whether extraction can be windowed on the replication key
    pub fn is_incremental(&self) -> bool {
        self.replication_key.is_some() && self.query_override.is_none()
    }

    /// Build the query for records after `start` and, if given, before `end`.
    ///
    /// Targets without a replication key select everything; a query override
    /// is returned verbatim.
    pub fn build_query(
        &self,
        start: &DateTime<Utc>,
        end: Option<&DateTime<Utc>>,
        order_by: bool,
    ) -> String {
        self.build_window_query(start, false, end, order_by)
    }

    /// Like [`build_query`](Self::build_query), optionally also selecting
    /// records exactly at `start`
    pub fn build_window_query(
        &self,
        start: &DateTime<Utc>,
        start_inclusive: bool,
        end: Option<&DateTime<Utc>>,
        order_by: bool,
    ) -> String {
        if let Some(ref query) = self.query_override {
            return query.clone();
        }

        let mut query = format!("SELECT {} FROM {}", self.properties.join(","), self.stream);
        let Some(ref key) = self.replication_key else {
            return query;
        };

        let op = if start_inclusive { ">=" } else { ">" };
        query.push_str(&format!(" WHERE {key} {op} {}", format_datetime(start)));
        if let Some(end) = end {
            query.push_str(&format!(" AND {key} < {}", format_datetime(end)));
        }
        if order_by {
            query.push_str(&format!(" ORDER BY {key} ASC"));
        }
        query
    }
}
