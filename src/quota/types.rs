//! Quota types
//!
//! Policy percentages and remote quota snapshots.

use crate::config::{DEFAULT_QUOTA_PERCENT_PER_RUN, DEFAULT_QUOTA_PERCENT_TOTAL};
use crate::error::{Error, Result};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Header carrying REST consumption on every API response
pub const LIMIT_INFO_HEADER: &str = "Sforce-Limit-Info";

/// Percent thresholds a governor enforces
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuotaPolicy {
    /// Share of the daily quota one run may consume
    pub percent_per_run: f64,
    /// Account-wide consumption ceiling
    pub percent_total: f64,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            percent_per_run: DEFAULT_QUOTA_PERCENT_PER_RUN,
            percent_total: DEFAULT_QUOTA_PERCENT_TOTAL,
        }
    }
}

impl QuotaPolicy {
    /// Create a policy from the two percentages
    pub fn new(percent_per_run: f64, percent_total: f64) -> Self {
        Self {
            percent_per_run,
            percent_total,
        }
    }

    /// Calls this run may attempt given the account's daily maximum
    pub fn max_for_run(&self, max: u64) -> u64 {
        ((self.percent_per_run * max as f64) / 100.0).floor() as u64
    }
}

/// Remote view of one API family's daily quota
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaSnapshot {
    /// Calls left today
    pub remaining: u64,
    /// Daily allotment
    pub max: u64,
}

impl QuotaSnapshot {
    /// Create a snapshot
    pub fn new(remaining: u64, max: u64) -> Self {
        Self { remaining, max }
    }

    /// Percentage of the daily allotment already used by the whole account
    pub fn percent_used_total(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        let used = self.max.saturating_sub(self.remaining);
        (used as f64 / self.max as f64) * 100.0
    }

    /// Parse a `Sforce-Limit-Info` header value (`api-usage=USED/MAX`)
    pub fn from_limit_info(header: &str) -> Option<Self> {
        static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
        let pattern = PATTERN
            .get_or_init(|| Regex::new(r"(?:^|[,\s])api-usage=(\d+)/(\d+)").ok())
            .as_ref()?;

        let caps = pattern.captures(header.trim())?;
        let used: u64 = caps.get(1)?.as_str().parse().ok()?;
        let max: u64 = caps.get(2)?.as_str().parse().ok()?;
        Some(Self::new(max.saturating_sub(used), max))
    }

    /// Read the bulk quota out of a `limits` endpoint response.
    ///
    /// Orgs report either `DailyBulkApiRequests` or the older
    /// `DailyBulkApiBatches`.
    pub fn from_bulk_limits(limits: &Value) -> Result<Self> {
        let entry = limits
            .get("DailyBulkApiRequests")
            .or_else(|| limits.get("DailyBulkApiBatches"))
            .ok_or_else(|| Error::decode("limits response has no bulk API quota entry"))?;
        Self::from_limit_entry(entry)
    }

    /// Read the REST quota (`DailyApiRequests`) out of a `limits` response
    pub fn from_rest_limits(limits: &Value) -> Result<Self> {
        let entry = limits
            .get("DailyApiRequests")
            .ok_or_else(|| Error::decode("limits response has no REST API quota entry"))?;
        Self::from_limit_entry(entry)
    }

    fn from_limit_entry(entry: &Value) -> Result<Self> {
        let field = |name: &str| {
            entry
                .get(name)
                .and_then(Value::as_u64)
                .ok_or_else(|| Error::decode(format!("quota entry missing '{name}'")))
        };

        Ok(Self::new(field("Remaining")?, field("Max")?))
    }
}
