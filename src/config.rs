//! Run configuration
//!
//! Loaded from a JSON or YAML file. Every tuning section is optional and
//! falls back to the values the platform integration has always used.

use crate::error::{Error, Result};
use crate::types::{ApiType, OptionStringExt};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default share of the daily quota a single run may consume
pub const DEFAULT_QUOTA_PERCENT_PER_RUN: f64 = 25.0;

/// Default ceiling on the account-wide quota consumption
pub const DEFAULT_QUOTA_PERCENT_TOTAL: f64 = 80.0;

/// Default platform API version
pub const DEFAULT_API_VERSION: &str = "41.0";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Complete run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Instance URL when an access token is supplied directly
    #[serde(default)]
    pub instance_url: Option<String>,

    /// Pre-issued access token
    #[serde(default)]
    pub access_token: Option<String>,

    /// OAuth2 connected app client id
    #[serde(default)]
    pub client_id: Option<String>,

    /// OAuth2 connected app client secret
    #[serde(default)]
    pub client_secret: Option<String>,

    /// OAuth2 refresh token
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Log in against the sandbox login host
    #[serde(default)]
    pub is_sandbox: bool,

    /// Which API extracts targets that do not say otherwise
    #[serde(default)]
    pub api_type: ApiType,

    /// Platform API version (e.g. "41.0")
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Replication start for targets without a bookmark
    pub start_date: String,

    /// Percentage of the daily quota this run may use
    #[serde(
        default = "default_percent_per_run",
        deserialize_with = "deserialize_percent_per_run"
    )]
    pub quota_percent_per_run: f64,

    /// Account-wide quota percentage above which the run stops
    #[serde(
        default = "default_percent_total",
        deserialize_with = "deserialize_percent_total"
    )]
    pub quota_percent_total: f64,

    /// Bulk job tuning
    #[serde(default)]
    pub bulk: BulkSettings,

    /// Paginated query tuning
    #[serde(default)]
    pub rest: RestSettings,

    /// Transport tuning
    #[serde(default)]
    pub http: HttpSettings,
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

fn default_percent_per_run() -> f64 {
    DEFAULT_QUOTA_PERCENT_PER_RUN
}

fn default_percent_total() -> f64 {
    DEFAULT_QUOTA_PERCENT_TOTAL
}

/// Percentages may arrive as numbers, numeric strings or blank strings
#[derive(Deserialize)]
#[serde(untagged)]
enum PercentValue {
    Number(f64),
    Text(String),
}

fn deserialize_percent<'de, D>(deserializer: D, default: f64) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<PercentValue>::deserialize(deserializer)?;
    match value {
        None => Ok(default),
        Some(PercentValue::Number(n)) => Ok(n),
        Some(PercentValue::Text(s)) => match Some(s).none_if_blank() {
            None => Ok(default),
            Some(s) => s.trim().parse().map_err(serde::de::Error::custom),
        },
    }
}

fn deserialize_percent_per_run<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_percent(deserializer, DEFAULT_QUOTA_PERCENT_PER_RUN)
}

fn deserialize_percent_total<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_percent(deserializer, DEFAULT_QUOTA_PERCENT_TOTAL)
}

impl Config {
    /// Create a config with defaults and the given start date
    pub fn new(start_date: impl Into<String>) -> Self {
        Self {
            instance_url: None,
            access_token: None,
            client_id: None,
            client_secret: None,
            refresh_token: None,
            is_sandbox: false,
            api_type: ApiType::default(),
            api_version: default_api_version(),
            start_date: start_date.into(),
            quota_percent_per_run: DEFAULT_QUOTA_PERCENT_PER_RUN,
            quota_percent_total: DEFAULT_QUOTA_PERCENT_TOTAL,
            bulk: BulkSettings::default(),
            rest: RestSettings::default(),
            http: HttpSettings::default(),
        }
    }

    /// Load a config file (JSON is valid YAML, so both are accepted)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_str(&contents)
    }

    /// Parse a config from a JSON or YAML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the API type
    #[must_use]
    pub fn with_api_type(mut self, api_type: ApiType) -> Self {
        self.api_type = api_type;
        self
    }

    /// Set direct session credentials
    #[must_use]
    pub fn with_session(
        mut self,
        instance_url: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        self.instance_url = Some(instance_url.into());
        self.access_token = Some(access_token.into());
        self
    }

    /// Set quota percentages
    #[must_use]
    pub fn with_quota(mut self, percent_per_run: f64, percent_total: f64) -> Self {
        self.quota_percent_per_run = percent_per_run;
        self.quota_percent_total = percent_total;
        self
    }

    /// Validate field values
    pub fn validate(&self) -> Result<()> {
        if self.start_date.trim().is_empty() {
            return Err(Error::missing_field("start_date"));
        }
        if crate::types::parse_datetime(&self.start_date).is_none() {
            return Err(Error::invalid_value(
                "start_date",
                format!("'{}' is not a datetime", self.start_date),
            ));
        }
        for (field, value) in [
            ("quota_percent_per_run", self.quota_percent_per_run),
            ("quota_percent_total", self.quota_percent_total),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(Error::invalid_value(field, "must be between 0 and 100"));
            }
        }
        if self.bulk.fallback_chunk_size == 0 || self.bulk.chunk_size == 0 {
            return Err(Error::invalid_value("bulk.chunk_size", "must be positive"));
        }
        if self.rest.max_retries == 0 {
            return Err(Error::invalid_value("rest.max_retries", "must be positive"));
        }
        Ok(())
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Bulk job tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkSettings {
    /// Poll interval for an unpartitioned job
    pub poll_interval_secs: u64,
    /// Poll interval for a PK-chunked job
    pub chunked_poll_interval_secs: u64,
    /// PK chunk size for the first attempt
    pub chunk_size: u32,
    /// PK chunk size after the first attempt failed
    pub fallback_chunk_size: u32,
    /// Concurrent partition downloads
    pub max_workers: usize,
}

impl Default for BulkSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 20,
            chunked_poll_interval_secs: 60,
            chunk_size: 250_000,
            fallback_chunk_size: 2_000,
            max_workers: 8,
        }
    }
}

/// Paginated query tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestSettings {
    /// Consecutive query timeouts tolerated before giving up
    pub max_retries: u32,
    /// Narrowest window bisection may produce
    pub min_window_secs: i64,
}

impl Default for RestSettings {
    fn default() -> Self {
        Self {
            max_retries: 4,
            min_window_secs: 86_400,
        }
    }
}

/// Transport tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Per-request timeout
    pub timeout_secs: u64,
    /// Attempts on transient network failures
    pub max_attempts: u32,
    /// First backoff delay
    pub initial_backoff_ms: u64,
    /// Backoff ceiling
    pub max_backoff_secs: u64,
    /// Outbound request pacing (None disables pacing)
    pub requests_per_second: Option<u32>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            max_attempts: 10,
            initial_backoff_ms: 2_000,
            max_backoff_secs: 300,
            requests_per_second: Some(20),
        }
    }
}

impl HttpSettings {
    /// Request timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_minimal_json_config() {
        let config = Config::from_str(
            r#"{"start_date": "2024-01-01T00:00:00Z", "api_type": "BULK",
                "instance_url": "https://x.my.salesforce.com", "access_token": "tok"}"#,
        )
        .unwrap();

        assert_eq!(config.api_type, ApiType::Bulk);
        assert_eq!(config.api_version, "41.0");
        assert_eq!(config.quota_percent_per_run, 25.0);
        assert_eq!(config.quota_percent_total, 80.0);
        assert_eq!(config.bulk.chunk_size, 250_000);
        assert_eq!(config.bulk.fallback_chunk_size, 2_000);
        assert_eq!(config.rest.max_retries, 4);
    }

    #[test]
    fn test_yaml_config_with_sections() {
        let config = Config::from_str(
            r"
start_date: '2023-06-01T00:00:00Z'
api_type: REST
quota_percent_per_run: 10
bulk:
  max_workers: 2
rest:
  min_window_secs: 3600
",
        )
        .unwrap();

        assert_eq!(config.quota_percent_per_run, 10.0);
        assert_eq!(config.bulk.max_workers, 2);
        assert_eq!(config.bulk.poll_interval_secs, 20);
        assert_eq!(config.rest.min_window_secs, 3600);
    }

    #[test]
    fn test_blank_and_string_percentages() {
        let config = Config::from_str(
            r#"{"start_date": "2024-01-01", "quota_percent_per_run": " ", "quota_percent_total": "50"}"#,
        )
        .unwrap();
        assert_eq!(config.quota_percent_per_run, 25.0);
        assert_eq!(config.quota_percent_total, 50.0);
    }

    #[test]
    fn test_invalid_start_date() {
        let err = Config::from_str(r#"{"start_date": "yesterday"}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidConfigValue { ref field, .. } if field == "start_date"));
    }

    #[test]
    fn test_out_of_range_percentage() {
        let err =
            Config::from_str(r#"{"start_date": "2024-01-01", "quota_percent_total": 150}"#)
                .unwrap_err();
        assert!(err.to_string().contains("quota_percent_total"));
    }

    #[test]
    fn test_builder() {
        let config = Config::new("2024-01-01T00:00:00Z")
            .with_api_type(ApiType::Bulk)
            .with_session("https://x", "tok")
            .with_quota(5.0, 90.0);
        assert_eq!(config.api_type, ApiType::Bulk);
        assert_eq!(config.access_token.as_deref(), Some("tok"));
        assert_eq!(config.quota_percent_total, 90.0);
        config.validate().unwrap();
    }
}
