//! Bulk job types
//!
//! A bulk job owns a set of partitions ("batches" on the wire). With PK
//! chunking the platform splits the submitted query into one partition per
//! key range; without it the job has exactly the one submitted partition.

use crate::config::BulkSettings;
use crate::error::{Error, Result};
use crate::types::JsonObject;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// First PK chunk size tried
pub const DEFAULT_CHUNK_SIZE: u32 = 250_000;

/// PK chunk size after the first chunked job failed
pub const FALLBACK_CHUNK_SIZE: u32 = 2_000;

// ============================================================================
// Partition
// ============================================================================

/// Remote processing state of one partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionState {
    /// Waiting to run
    Queued,
    /// Running
    InProgress,
    /// Results ready
    Completed,
    /// Failed; see the state message
    Failed,
    /// Will not run (the parent batch of a PK-chunked job ends here)
    NotProcessed,
}

impl PartitionState {
    /// Parse the state string the platform reports
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim() {
            "Queued" => Ok(Self::Queued),
            "InProgress" => Ok(Self::InProgress),
            "Completed" => Ok(Self::Completed),
            "Failed" => Ok(Self::Failed),
            "NotProcessed" | "Not Processed" => Ok(Self::NotProcessed),
            other => Err(Error::decode(format!("unknown batch state '{other}'"))),
        }
    }

    /// Whether the state can never change again
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::NotProcessed)
    }

    /// Whether the partition still needs polling
    pub fn is_pending(self) -> bool {
        !self.is_terminal()
    }

    /// Check that `self -> next` is a legal move
    pub fn can_transition_to(self, next: Self) -> bool {
        if self == next {
            return true;
        }
        !self.is_terminal() && next != Self::Queued
    }
}

impl fmt::Display for PartitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "Queued",
            Self::InProgress => "InProgress",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::NotProcessed => "NotProcessed",
        };
        f.write_str(s)
    }
}

/// One unit of work inside a bulk job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// Remote batch id
    pub id: String,
    /// Current state
    pub state: PartitionState,
    /// Message the platform attached to the state, if any
    pub state_message: Option<String>,
}

impl Partition {
    /// Create a partition in the given state
    pub fn new(id: impl Into<String>, state: PartitionState) -> Self {
        Self {
            id: id.into(),
            state,
            state_message: None,
        }
    }

    /// Attach a state message
    #[must_use]
    pub fn with_message(mut self, message: Option<String>) -> Self {
        self.state_message = message;
        self
    }

    /// Move to `next`, refusing illegal transitions
    pub fn transition(&mut self, next: PartitionState, message: Option<String>) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::PartitionTransition {
                partition: self.id.clone(),
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        if self.state != next {
            debug!("Partition {} {} -> {}", self.id, self.state, next);
        }
        self.state = next;
        if message.is_some() {
            self.state_message = message;
        }
        Ok(())
    }
}

/// Partitions of one job in the order the platform lists them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionSet {
    partitions: Vec<Partition>,
}

impl PartitionSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a fresh remote listing, validating every state change
    pub fn apply(&mut self, listing: Vec<Partition>) -> Result<()> {
        for remote in listing {
            match self.partitions.iter_mut().find(|p| p.id == remote.id) {
                Some(existing) => existing.transition(remote.state, remote.state_message)?,
                None => self.partitions.push(remote),
            }
        }
        Ok(())
    }

    /// All partitions
    pub fn iter(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.iter()
    }

    /// Look up a partition
    pub fn get(&self, id: &str) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.id == id)
    }

    /// Number of partitions
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Partitions still queued or running
    pub fn pending_count(&self) -> usize {
        self.partitions.iter().filter(|p| p.state.is_pending()).count()
    }

    /// Whether every partition reached a terminal state
    pub fn is_resolved(&self) -> bool {
        !self.is_empty() && self.pending_count() == 0
    }

    /// Ids of completed partitions in remote order
    pub fn completed_ids(&self) -> Vec<String> {
        self.ids_in(PartitionState::Completed)
    }

    /// Ids of failed partitions in remote order
    pub fn failed_ids(&self) -> Vec<String> {
        self.ids_in(PartitionState::Failed)
    }

    fn ids_in(&self, state: PartitionState) -> Vec<String> {
        self.partitions
            .iter()
            .filter(|p| p.state == state)
            .map(|p| p.id.clone())
            .collect()
    }
}

// ============================================================================
// Job
// ============================================================================

/// Whether the job asks the platform to split the query by key ranges
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunking {
    /// One partition holding the whole query
    None,
    /// PK chunking with a chunk size and optional parent object
    KeyChunked {
        /// Records per chunk
        chunk_size: u32,
        /// Object whose key ranges drive the chunks
        parent: Option<String>,
    },
}

impl Chunking {
    /// Key-chunked at `chunk_size`, inferring the parent from the object name
    pub fn key_chunked(stream: &str, chunk_size: u32) -> Self {
        Self::KeyChunked {
            chunk_size,
            parent: pk_chunking_parent(stream),
        }
    }

    /// Value of the `Sforce-Enable-PKChunking` header
    pub fn header_value(&self) -> Option<String> {
        match self {
            Self::None => None,
            Self::KeyChunked { chunk_size, parent } => {
                let mut value = format!("true; chunkSize={chunk_size}");
                if let Some(parent) = parent {
                    value.push_str(&format!("; parent={parent}"));
                }
                Some(value)
            }
        }
    }

    /// Whether the job is partitioned by key range
    pub fn is_chunked(&self) -> bool {
        matches!(self, Self::KeyChunked { .. })
    }
}

/// Lifecycle of a bulk job inside one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    /// Job created, nothing submitted
    Created,
    /// Created with a PK chunking request
    PartitionRequested,
    /// Query batch added
    BatchesSubmitted,
    /// Waiting for partitions
    Polling,
    /// Every partition is terminal
    AllPartitionsResolved,
    /// Closed; no partitions will be added
    Closed,
    /// Given up on
    Failed,
}

impl JobPhase {
    /// Whether the job is done with
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// Check that `self -> next` is a legal move
    pub fn can_transition_to(self, next: Self) -> bool {
        use JobPhase::{
            AllPartitionsResolved, BatchesSubmitted, Closed, Created, Failed, PartitionRequested,
            Polling,
        };
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Created | PartitionRequested, BatchesSubmitted)
            | (BatchesSubmitted, Polling)
            | (Polling, AllPartitionsResolved)
            | (AllPartitionsResolved, Closed) => true,
            _ => false,
        }
    }
}

/// A remote bulk job and what is known about its partitions
#[derive(Debug, Clone)]
pub struct BulkJob {
    /// Remote job id
    pub id: String,
    /// Chunking requested at creation
    pub chunking: Chunking,
    /// Partitions seen so far
    pub partitions: PartitionSet,
    /// Where the job stands
    pub phase: JobPhase,
}

impl BulkJob {
    /// A freshly created job
    pub fn new(id: impl Into<String>, chunking: Chunking) -> Self {
        let phase = if chunking.is_chunked() {
            JobPhase::PartitionRequested
        } else {
            JobPhase::Created
        };
        Self {
            id: id.into(),
            chunking,
            partitions: PartitionSet::new(),
            phase,
        }
    }

    /// Move to a new phase, refusing illegal transitions
    pub fn advance(&mut self, phase: JobPhase) -> Result<()> {
        if !self.phase.can_transition_to(phase) {
            return Err(Error::JobTransition {
                job_id: self.id.clone(),
                from: self.phase,
                to: phase,
            });
        }
        debug!("Bulk job {} {:?} -> {:?}", self.id, self.phase, phase);
        self.phase = phase;
        Ok(())
    }

    /// Give up on the job; a finished job keeps its phase
    pub fn fail(&mut self) {
        if !self.phase.is_terminal() {
            debug!("Bulk job {} {:?} -> Failed", self.id, self.phase);
            self.phase = JobPhase::Failed;
        }
    }
}

// ============================================================================
// Events & Config
// ============================================================================

/// What a bulk extraction reports to its consumer
#[derive(Debug, Clone, PartialEq)]
pub enum BulkEvent {
    /// Both PK-chunked attempts failed and an unpartitioned job ran instead
    ChunkingAbandoned {
        /// Why chunking was given up
        message: String,
    },
    /// Results are about to be delivered for these partitions
    JobStarted {
        /// Remote job id
        job_id: String,
        /// Completed partitions whose results follow
        pending: Vec<String>,
    },
    /// One record from a partition
    Record {
        /// Partition the record came from
        partition_id: String,
        /// The record
        record: JsonObject,
    },
    /// Every record of a partition has been delivered
    PartitionDone {
        /// The finished partition
        partition_id: String,
    },
}

/// Runtime tuning for bulk extraction
#[derive(Debug, Clone)]
pub struct BulkConfig {
    /// Poll interval for an unpartitioned job
    pub poll_interval: Duration,
    /// Poll interval for a PK-chunked job
    pub chunked_poll_interval: Duration,
    /// First PK chunk size
    pub chunk_size: u32,
    /// PK chunk size on the second attempt
    pub fallback_chunk_size: u32,
    /// Concurrent partition downloads
    pub max_workers: usize,
    /// Records buffered between a CSV parser and its consumer
    pub channel_capacity: usize,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self::from_settings(&BulkSettings::default())
    }
}

impl BulkConfig {
    /// Build from the `bulk` section of the run config
    pub fn from_settings(settings: &BulkSettings) -> Self {
        Self {
            poll_interval: Duration::from_secs(settings.poll_interval_secs),
            chunked_poll_interval: Duration::from_secs(settings.chunked_poll_interval_secs),
            chunk_size: settings.chunk_size,
            fallback_chunk_size: settings.fallback_chunk_size,
            max_workers: settings.max_workers.max(1),
            channel_capacity: 1024,
        }
    }

    /// Use the same poll interval for both job kinds
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self.chunked_poll_interval = interval;
        self
    }

    /// Set concurrent partition downloads
    #[must_use]
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }
}

// ============================================================================
// Parent Inference
// ============================================================================

/// Strip the history/clean-info suffix to find the object a child table
/// belongs to; custom objects get their `__c` back
pub fn find_parent(stream: &str) -> String {
    let mut parent = ["CleanInfo", "FieldHistory", "History"]
        .iter()
        .find_map(|suffix| stream.strip_suffix(suffix))
        .unwrap_or(stream)
        .to_string();

    if parent.ends_with("__") {
        parent.push('c');
    }
    parent
}

/// Parent to PK chunk on, for objects that cannot be chunked directly
pub fn pk_chunking_parent(stream: &str) -> Option<String> {
    if stream.ends_with("CleanInfo") || stream.ends_with("History") {
        Some(find_parent(stream))
    } else {
        None
    }
}
