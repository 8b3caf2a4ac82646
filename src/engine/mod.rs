//! Execution engine module
//!
//! Chooses the extraction path per target and turns its records into output
//! messages, advancing bookmarks as records are handed on.
//!
//! # Overview
//!
//! The engine module provides:
//! - `SyncEngine` - Runs one target at a time against the state manager
//! - `SyncConfig` - Start date and default API
//! - Message types for output (Record, State, ActivateVersion)
//!
//! # Bookmarks
//!
//! Paginated queries return records in replication key order, so the
//! bookmark follows every record. Bulk partitions finish in any order; each
//! partition's high-water mark is only merged into the job position once all
//! of its records are delivered. Values later than the start of the sync
//! never move a bookmark.

mod types;

pub use types::{Message, SyncConfig, SyncStats};

use crate::bulk::{BulkEvent, BulkExtractor, EventStream};
use crate::error::{Error, Result};
use crate::rest::PaginatedQuery;
use crate::state::{StateManager, StreamState};
use crate::target::ExtractionTarget;
use crate::types::{epoch_millis, format_datetime, parse_datetime, ApiType, JsonObject};
use async_stream::try_stream;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Type alias for the message stream of one target
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Message>> + Send>>;

/// Sync engine for orchestrating data extraction
#[derive(Clone)]
pub struct SyncEngine {
    /// State manager
    state: StateManager,
    /// Paginated query engine
    rest: PaginatedQuery,
    /// Bulk extractor, when the session may use the Bulk API
    bulk: Option<BulkExtractor>,
    /// Sync configuration
    config: SyncConfig,
    /// Statistics
    stats: Arc<Mutex<SyncStats>>,
}

impl SyncEngine {
    /// Create a new sync engine
    pub fn new(state: StateManager, rest: PaginatedQuery, config: SyncConfig) -> Self {
        Self {
            state,
            rest,
            bulk: None,
            config,
            stats: Arc::new(Mutex::new(SyncStats::new())),
        }
    }

    /// Enable bulk extraction
    #[must_use]
    pub fn with_bulk(mut self, bulk: BulkExtractor) -> Self {
        self.bulk = Some(bulk);
        self
    }

    /// Get the state manager
    pub fn state(&self) -> &StateManager {
        &self.state
    }

    /// Snapshot of the run statistics
    pub fn stats(&self) -> SyncStats {
        self.update_stats(|s| s.clone())
    }

    /// Count a target that failed outside the engine
    pub fn record_failure(&self) {
        self.update_stats(SyncStats::add_failure);
    }

    fn update_stats<R>(&self, f: impl FnOnce(&mut SyncStats) -> R) -> R {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut stats)
    }

    /// Where a stream without a bulk job resumes
    fn start_position(&self, stream: &StreamState) -> DateTime<Utc> {
        stream
            .replication_value()
            .and_then(parse_datetime)
            .unwrap_or(self.config.start_date)
    }

    // =========================================================================
    // Target Sync
    // =========================================================================

    /// Sync one target.
    ///
    /// The stream ends after the final position has been persisted. State is
    /// only written once the messages it covers have been pulled.
    pub fn sync_target(&self, target: &ExtractionTarget) -> MessageStream {
        let this = self.clone();
        let target = target.clone();

        Box::pin(try_stream! {
            let sync_start = Utc::now();
            let stream = target.stream.clone();
            let mode = target.effective_mode(this.config.api_type);
            info!("Starting {} sync for stream: {stream}", mode.label());

            let prior = this.state.stream_state(&stream).await;
            // An interrupted bulk job continues the version its records carry
            let resuming = mode == ApiType::Bulk && prior.bulk_job().is_some();
            let version = stream_version(&target, &prior, resuming, &sync_start);
            let updated = this.state.set_version(&stream, version).await?;
            if !resuming && (target.replication_key.is_some() || prior.is_empty()) {
                yield Message::activate_version(&stream, version);
            }
            yield Message::state(&stream, updated);

            let mut messages = match mode {
                ApiType::Bulk => this.bulk_messages(target.clone(), version, sync_start),
                ApiType::Rest => this.rest_messages(target.clone(), version, sync_start),
            };
            while let Some(message) = messages.next().await {
                yield message?;
            }

            // Full-table streams replace the previous table version
            if target.replication_key.is_none() {
                yield Message::activate_version(&stream, version);
                let updated = this.state.update_stream(&stream, |s| s.version = None).await?;
                yield Message::state(&stream, updated);
            }

            let count = this.update_stats(|s| {
                s.add_target();
                s.records_for(&stream)
            });
            info!("Completed sync for {stream}: {count} records");
        })
    }

    // =========================================================================
    // Paginated Path
    // =========================================================================

    fn rest_messages(
        &self,
        target: ExtractionTarget,
        version: i64,
        sync_start: DateTime<Utc>,
    ) -> MessageStream {
        let this = self.clone();

        Box::pin(try_stream! {
            let stream = target.stream.clone();
            let current = this.state.stream_state(&stream).await;
            let start = this.start_position(&current);
            let mut bookmark = current.replication_value().and_then(parse_datetime);
            debug!("{stream}: querying from {}", format_datetime(&start));

            let mut records = this.rest.query(&target, start);
            while let Some(record) = records.next().await {
                let record = record?;
                let value = replication_value(&target, &record)
                    .filter(|v| *v <= sync_start && bookmark.map_or(true, |b| *v > b));

                this.update_stats(|s| s.add_record(&stream));
                yield Message::record(&stream, record, version);

                if let Some(value) = value {
                    bookmark = Some(value);
                    let updated = this
                        .state
                        .set_replication_value(&stream, format_datetime(&value))
                        .await?;
                    yield Message::state(&stream, updated);
                }
            }
        })
    }

    // =========================================================================
    // Bulk Path
    // =========================================================================

    fn bulk_messages(
        &self,
        target: ExtractionTarget,
        version: i64,
        sync_start: DateTime<Utc>,
    ) -> MessageStream {
        let this = self.clone();

        Box::pin(try_stream! {
            let bulk = this
                .bulk
                .clone()
                .ok_or_else(|| Error::config("Bulk API mode requested without a bulk extractor"))?;
            let stream = target.stream.clone();
            let prior = this.state.stream_state(&stream).await;

            if let Some((job_id, pending)) = prior.bulk_job() {
                let job_id = job_id.to_string();
                match bulk.resume(&job_id, pending.to_vec()).await? {
                    Some(events) => {
                        let mut messages = this.deliver(&target, version, sync_start, None, events);
                        while let Some(message) = messages.next().await {
                            yield message?;
                        }
                        let finished = this.state.finish_bulk_job(&stream).await?;
                        info!("Finished resumed bulk job {job_id} for {stream}");
                        yield Message::state(&stream, finished);
                        return;
                    }
                    None => {
                        let reverted = this.state.abandon_bulk_job(&stream).await?;
                        yield Message::state(&stream, reverted);
                    }
                }
            }

            let current = this.state.stream_state(&stream).await;
            let start = this.start_position(&current);
            let started_from = current.replication_value().map(String::from);

            let events = bulk.query(&target, start);
            let mut messages = this.deliver(&target, version, sync_start, started_from, events);
            while let Some(message) = messages.next().await {
                yield message?;
            }

            let finished = this.state.finish_bulk_job(&stream).await?;
            yield Message::state(&stream, finished);
        })
    }

    /// Turn bulk events into messages, persisting the job position as
    /// partitions complete
    fn deliver(
        &self,
        target: &ExtractionTarget,
        version: i64,
        sync_start: DateTime<Utc>,
        started_from: Option<String>,
        mut events: EventStream,
    ) -> MessageStream {
        let this = self.clone();
        let target = target.clone();

        Box::pin(try_stream! {
            let stream = target.stream.clone();
            let mut marks: HashMap<String, DateTime<Utc>> = HashMap::new();

            while let Some(event) = events.next().await {
                match event? {
                    BulkEvent::ChunkingAbandoned { message } => {
                        warn!("{message}");
                        this.update_stats(|s| s.add_chunking_failure(&stream));
                    }
                    BulkEvent::JobStarted { job_id, pending } => {
                        let updated = this
                            .state
                            .start_bulk_job(&stream, job_id, pending, started_from.clone())
                            .await?;
                        yield Message::state(&stream, updated);
                    }
                    BulkEvent::Record { partition_id, record } => {
                        if let Some(value) =
                            replication_value(&target, &record).filter(|v| *v <= sync_start)
                        {
                            let mark = marks.entry(partition_id).or_insert(value);
                            if value > *mark {
                                *mark = value;
                            }
                        }
                        this.update_stats(|s| s.add_record(&stream));
                        yield Message::record(&stream, record, version);
                    }
                    BulkEvent::PartitionDone { partition_id } => {
                        let highest = marks.remove(&partition_id).map(|v| format_datetime(&v));
                        let updated = this
                            .state
                            .complete_partition(&stream, &partition_id, highest)
                            .await?;
                        debug!("{stream}: partition {partition_id} delivered");
                        yield Message::state(&stream, updated);
                    }
                }
            }
        })
    }
}

/// Stored version for incremental targets and resumed jobs, a fresh one
/// otherwise
fn stream_version(
    target: &ExtractionTarget,
    prior: &StreamState,
    resuming: bool,
    now: &DateTime<Utc>,
) -> i64 {
    match prior.version {
        Some(version) if resuming || target.replication_key.is_some() => version,
        _ => epoch_millis(now),
    }
}

/// Replication key value of a record; values that do not parse are ignored
fn replication_value(target: &ExtractionTarget, record: &JsonObject) -> Option<DateTime<Utc>> {
    let key = target.replication_key.as_deref()?;
    record.get(key)?.as_str().and_then(parse_datetime)
}
