//! Quota governor
//!
//! Admission control for the two remote API families. Each family gets its
//! own [`QuotaGovernor`]; the run aborts as soon as either one reports that
//! the account-wide ceiling or the per-run share has been crossed.
//!
//! A governor latches: after it has tripped once, [`QuotaGovernor::ensure_open`]
//! fails for every later call so no further request leaves the process.

mod types;

pub use types::{QuotaPolicy, QuotaSnapshot, LIMIT_INFO_HEADER};

use crate::error::{Error, Result};
use crate::types::ApiType;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error};

/// The pair of governors shared by every component of one run
#[derive(Debug, Clone)]
pub struct Governors {
    /// REST query calls
    pub rest: Arc<QuotaGovernor>,
    /// Bulk API jobs
    pub bulk: Arc<QuotaGovernor>,
}

impl Governors {
    /// Create both governors with the same policy
    pub fn new(policy: QuotaPolicy) -> Self {
        Self {
            rest: Arc::new(QuotaGovernor::rest(policy)),
            bulk: Arc::new(QuotaGovernor::bulk(policy)),
        }
    }

    /// Fail if either governor has tripped
    pub fn ensure_open(&self) -> Result<()> {
        self.rest.ensure_open()?;
        self.bulk.ensure_open()
    }
}

impl Default for Governors {
    fn default() -> Self {
        Self::new(QuotaPolicy::default())
    }
}

/// Quota tracker for one API family
#[derive(Debug)]
pub struct QuotaGovernor {
    api: ApiType,
    policy: QuotaPolicy,
    attempted: AtomicU64,
    tripped: OnceLock<String>,
}

impl QuotaGovernor {
    /// Create a governor for an API family
    pub fn new(api: ApiType, policy: QuotaPolicy) -> Self {
        Self {
            api,
            policy,
            attempted: AtomicU64::new(0),
            tripped: OnceLock::new(),
        }
    }

    /// Governor for REST query calls
    pub fn rest(policy: QuotaPolicy) -> Self {
        Self::new(ApiType::Rest, policy)
    }

    /// Governor for Bulk API jobs
    pub fn bulk(policy: QuotaPolicy) -> Self {
        Self::new(ApiType::Bulk, policy)
    }

    /// API family this governor tracks
    pub fn api(&self) -> ApiType {
        self.api
    }

    /// Units attempted during this run
    pub fn attempted(&self) -> u64 {
        self.attempted.load(Ordering::SeqCst)
    }

    /// Whether the governor has already stopped the run
    pub fn is_tripped(&self) -> bool {
        self.tripped.get().is_some()
    }

    /// Fail if the governor has tripped earlier in the run
    pub fn ensure_open(&self) -> Result<()> {
        match self.tripped.get() {
            Some(message) => Err(Error::quota(self.api.label(), message.clone())),
            None => Ok(()),
        }
    }

    /// Count one unit of work without evaluating thresholds
    pub fn record_attempt(&self) -> u64 {
        self.attempted.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Gate a new query or job on the current remote snapshot.
    ///
    /// Without a snapshot only the latch is consulted.
    pub fn check_before_run(&self, snapshot: Option<&QuotaSnapshot>) -> Result<()> {
        self.ensure_open()?;
        match snapshot {
            Some(snapshot) => self.evaluate(snapshot, self.attempted()),
            None => Ok(()),
        }
    }

    /// Count a completed call and evaluate the snapshot it reported
    pub fn account_for_call(&self, snapshot: &QuotaSnapshot) -> Result<()> {
        let attempted = self.record_attempt();
        self.ensure_open()?;
        self.evaluate(snapshot, attempted)
    }

    fn evaluate(&self, snapshot: &QuotaSnapshot, attempted: u64) -> Result<()> {
        let percent_used = snapshot.percent_used_total();
        let max_for_run = self.policy.max_for_run(snapshot.max);

        debug!(
            api = self.api.label(),
            attempted,
            max_for_run,
            percent_used = format!("{percent_used:.2}"),
            "Quota check"
        );

        let message = if percent_used > self.policy.percent_total {
            format!(
                "{percent_used:.2}% of the daily quota is in use, above the configured ceiling of {}%",
                self.policy.percent_total
            )
        } else if attempted > max_for_run {
            format!(
                "{attempted} calls attempted this run, above the {}% per-run share ({max_for_run} of {})",
                self.policy.percent_per_run, snapshot.max
            )
        } else {
            return Ok(());
        };

        Err(self.trip(message))
    }

    fn trip(&self, message: String) -> Error {
        let message = self.tripped.get_or_init(|| message).clone();
        error!(api = self.api.label(), "Terminating replication: {message}");
        Error::quota(self.api.label(), message)
    }
}
