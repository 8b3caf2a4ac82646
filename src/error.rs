//! Error types for Solidafy SFDC
//!
//! This module defines the error hierarchy for the whole extraction engine.
//! All public APIs return `Result<T, Error>` where Error is defined here.
//!
//! Only [`Error::QuotaExceeded`] aborts an entire run; every other variant is
//! scoped to the target that raised it.

use thiserror::Error;

/// The main error type for Solidafy SFDC
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Missing required config field: {field}")]
    MissingConfigField { field: String },

    #[error("Invalid config value for '{field}': {message}")]
    InvalidConfigValue { field: String, message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ============================================================================
    // Authentication Errors
    // ============================================================================
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    #[error("Bulk API is disabled for this org")]
    BulkApiDisabled,

    // ============================================================================
    // Transport Errors
    // ============================================================================
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Transient network failure after {attempts} attempts: {message}")]
    TransientNetwork { attempts: u32, message: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ============================================================================
    // Quota Errors
    // ============================================================================
    #[error("{api} quota exceeded: {message}")]
    QuotaExceeded { api: String, message: String },

    // ============================================================================
    // Bulk Job Errors
    // ============================================================================
    #[error("Bulk job {job_id} has failed partitions: {}", failed.join(", "))]
    PartitionFailure { job_id: String, failed: Vec<String> },

    #[error("Partition {partition} cannot move from {from} to {to}")]
    PartitionTransition {
        partition: String,
        from: String,
        to: String,
    },

    #[error("Bulk job {job_id} cannot move from {from:?} to {to:?}")]
    JobTransition {
        job_id: String,
        from: crate::bulk::JobPhase,
        to: crate::bulk::JobPhase,
    },

    // ============================================================================
    // Query Window Errors
    // ============================================================================
    #[error("Cannot narrow query window for '{stream}' below {min_width_secs}s (window {start} .. {end})")]
    UnrecoverableQueryWindow {
        stream: String,
        start: String,
        end: String,
        min_width_secs: i64,
    },

    #[error("Ran out of retries attempting to query '{stream}' ({attempts} timeouts)")]
    QueryRetriesExhausted { stream: String, attempts: u32 },

    // ============================================================================
    // Data Processing Errors
    // ============================================================================
    #[error("Failed to decode response: {message}")]
    Decode { message: String },

    #[error("CSV parsing error: {0}")]
    CsvParse(#[from] csv::Error),

    #[error("XML parsing error: {message}")]
    XmlParse { message: String },

    // ============================================================================
    // State Errors
    // ============================================================================
    #[error("State error: {message}")]
    State { message: String },

    // ============================================================================
    // I/O Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a missing field error
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingConfigField {
            field: field.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfigValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an auth error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Create an HTTP status error
    pub fn http_status(status: u16, body: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            body: body.into(),
        }
    }

    /// Create a quota error for an API family
    pub fn quota(api: impl Into<String>, message: impl Into<String>) -> Self {
        Self::QuotaExceeded {
            api: api.into(),
            message: message.into(),
        }
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create an XML error
    pub fn xml(message: impl Into<String>) -> Self {
        Self::XmlParse {
            message: message.into(),
        }
    }

    /// Create a state error
    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    /// Whether this error must abort the whole run rather than a single target
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, Error::QuotaExceeded { .. })
    }

    /// Whether this is a remote query timeout (`QUERY_TIMEOUT` error code)
    pub fn is_query_timeout(&self) -> bool {
        self.remote_error_code()
            .is_some_and(|code| code == "QUERY_TIMEOUT")
    }

    /// Error code reported by the platform in an HTTP error body.
    ///
    /// REST errors arrive as `[{"errorCode": ..}]`, bulk errors as
    /// `{"exceptionCode": ..}`.
    pub fn remote_error_code(&self) -> Option<String> {
        let Error::HttpStatus { body, .. } = self else {
            return None;
        };
        let value: serde_json::Value = serde_json::from_str(body).ok()?;
        let item = match &value {
            serde_json::Value::Array(items) => items.first()?,
            other => other,
        };
        item.get("errorCode")
            .or_else(|| item.get("exceptionCode"))
            .and_then(serde_json::Value::as_str)
            .map(String::from)
    }
}

/// Result type alias for Solidafy SFDC
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", message.into(), inner))
        })
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", f(), inner))
        })
    }
}
