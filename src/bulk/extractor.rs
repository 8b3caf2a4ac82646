//! Bulk extraction driver
//!
//! Runs one target through the job lifecycle: submit, poll, close, then
//! download every completed partition through a bounded pool of workers.

use super::api::BulkApi;
use super::types::{BulkConfig, BulkEvent, BulkJob, Chunking, JobPhase, Partition, PartitionState};
use crate::decode::CsvRecords;
use crate::error::{Error, Result};
use crate::quota::QuotaGovernor;
use crate::target::ExtractionTarget;
use crate::types::JsonObject;
use async_stream::try_stream;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use std::io::BufReader;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Lazily produced bulk events
pub type EventStream = BoxStream<'static, Result<BulkEvent>>;

/// Extracts targets through the Bulk API
#[derive(Debug, Clone)]
pub struct BulkExtractor {
    api: BulkApi,
    governor: Arc<QuotaGovernor>,
    config: BulkConfig,
}

impl BulkExtractor {
    /// Create an extractor
    pub fn new(api: BulkApi, governor: Arc<QuotaGovernor>, config: BulkConfig) -> Self {
        Self {
            api,
            governor,
            config,
        }
    }

    /// Endpoint wrapper in use
    pub fn api(&self) -> &BulkApi {
        &self.api
    }

    /// Tuning in use
    pub fn config(&self) -> &BulkConfig {
        &self.config
    }

    // =========================================================================
    // Fresh Extraction
    // =========================================================================

    /// Extract every record of `target` after `start`.
    ///
    /// The bulk quota is checked once up front. A [`BulkEvent::JobStarted`]
    /// precedes the records so the caller can persist the job before any
    /// result is downloaded.
    pub fn query(&self, target: &ExtractionTarget, start: DateTime<Utc>) -> EventStream {
        let this = self.clone();
        let target = target.clone();

        Box::pin(try_stream! {
            let snapshot = this.api.quota().await?;
            this.governor.check_before_run(Some(&snapshot))?;

            let (job, abandoned) = this.submit_with_fallback(&target, &start).await?;
            if let Some(message) = abandoned {
                yield BulkEvent::ChunkingAbandoned { message };
            }

            let pending = job.partitions.completed_ids();
            info!(
                "Bulk job {} for {} finished with {} completed partitions",
                job.id,
                target.stream,
                pending.len()
            );
            yield BulkEvent::JobStarted {
                job_id: job.id.clone(),
                pending: pending.clone(),
            };

            let mut events = this.resolve(&job.id, pending);
            while let Some(event) = events.next().await {
                yield event?;
            }

            let jobs = this.governor.record_attempt();
            debug!("Bulk jobs completed this run: {jobs}");
        })
    }

    /// Chunked at the default size, then at the fallback size, then one
    /// unpartitioned job. Every abandoned job is closed before the next one
    /// is created.
    async fn submit_with_fallback(
        &self,
        target: &ExtractionTarget,
        start: &DateTime<Utc>,
    ) -> Result<(BulkJob, Option<String>)> {
        let mut last_error = None;

        for chunk_size in [self.config.chunk_size, self.config.fallback_chunk_size] {
            match self.run_chunked(target, start, chunk_size).await {
                Ok(job) => return Ok((job, None)),
                Err(e) if e.is_run_fatal() => return Err(e),
                Err(e) => {
                    warn!(
                        "PK-chunked job for {} at chunk size {chunk_size} failed: {e}",
                        target.stream
                    );
                    last_error = Some(e);
                }
            }
        }

        let message = match last_error {
            Some(e) => format!("PK chunking failed for {}: {e}", target.stream),
            None => format!("PK chunking failed for {}", target.stream),
        };
        warn!("{message}; retrying without chunking");

        let job = self.run_unchunked(target, start).await?;
        Ok((job, Some(message)))
    }

    async fn run_chunked(
        &self,
        target: &ExtractionTarget,
        start: &DateTime<Utc>,
        chunk_size: u32,
    ) -> Result<BulkJob> {
        let chunking = Chunking::key_chunked(&target.stream, chunk_size);
        let job_id = self.api.create_job(&target.stream, &chunking).await?;
        let mut job = BulkJob::new(job_id, chunking);

        let outcome = self.drive_chunked(&mut job, target, start).await;
        let closed = self.api.close_job(&job.id).await;

        match outcome {
            Ok(()) => {
                closed?;
                job.advance(JobPhase::Closed)?;
                Ok(job)
            }
            Err(e) => {
                job.fail();
                if let Err(close_err) = closed {
                    warn!("Failed to close abandoned job {}: {close_err}", job.id);
                }
                Err(e)
            }
        }
    }

    async fn drive_chunked(
        &self,
        job: &mut BulkJob,
        target: &ExtractionTarget,
        start: &DateTime<Utc>,
    ) -> Result<()> {
        let query = target.build_query(start, None, false);
        self.api.add_batch(&job.id, &query).await?;
        job.advance(JobPhase::BatchesSubmitted)?;

        job.advance(JobPhase::Polling)?;
        loop {
            let listing = self.api.get_batches(&job.id).await?;
            job.partitions.apply(listing)?;
            if job.partitions.is_resolved() {
                break;
            }
            debug!(
                "Job {}: {} of {} partitions pending",
                job.id,
                job.partitions.pending_count(),
                job.partitions.len()
            );
            tokio::time::sleep(self.config.chunked_poll_interval).await;
        }
        job.advance(JobPhase::AllPartitionsResolved)?;

        check_failed(job)
    }

    async fn run_unchunked(
        &self,
        target: &ExtractionTarget,
        start: &DateTime<Utc>,
    ) -> Result<BulkJob> {
        let job_id = self.api.create_job(&target.stream, &Chunking::None).await?;
        let mut job = BulkJob::new(job_id, Chunking::None);

        let query = target.build_query(start, None, true);
        let submitted = self.api.add_batch(&job.id, &query).await;
        let closed = self.api.close_job(&job.id).await;

        let batch_id = match submitted {
            Ok(id) => id,
            Err(e) => {
                job.fail();
                return Err(e);
            }
        };
        closed?;
        job.advance(JobPhase::BatchesSubmitted)?;
        job.partitions
            .apply(vec![Partition::new(&batch_id, PartitionState::Queued)])?;

        job.advance(JobPhase::Polling)?;
        loop {
            let batch = self.api.get_batch(&job.id, &batch_id).await?;
            job.partitions.apply(vec![batch])?;
            if job.partitions.is_resolved() {
                break;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
        job.advance(JobPhase::AllPartitionsResolved)?;

        // The single batch must complete; NotProcessed means nothing will run
        if job.partitions.completed_ids().is_empty() {
            log_partition_messages(&job);
            job.fail();
            return Err(Error::PartitionFailure {
                job_id: job.id.clone(),
                failed: vec![batch_id],
            });
        }
        // Closed remotely right after submission
        job.advance(JobPhase::Closed)?;
        Ok(job)
    }

    // =========================================================================
    // Result Retrieval
    // =========================================================================

    /// Download and parse the results of `partition_ids`.
    ///
    /// At most `max_workers` partitions are read at once. Records of one
    /// partition keep their CSV order and are followed by a
    /// [`BulkEvent::PartitionDone`].
    pub fn resolve(&self, job_id: &str, partition_ids: Vec<String>) -> EventStream {
        let this = self.clone();
        let job_id = job_id.to_string();
        let workers = self.config.max_workers;

        stream::iter(partition_ids)
            .map(move |partition_id| this.partition_events(job_id.clone(), partition_id))
            .flatten_unordered(workers)
            .boxed()
    }

    fn partition_events(&self, job_id: String, partition_id: String) -> EventStream {
        let api = self.api.clone();
        let capacity = self.config.channel_capacity;

        Box::pin(try_stream! {
            let result_ids = api.result_ids(&job_id, &partition_id).await?;
            let mut count = 0usize;

            for result_id in result_ids {
                let file = api.download_result(&job_id, &partition_id, &result_id).await?;
                let mut records = read_records(file, capacity);
                while let Some(record) = records.next().await {
                    count += 1;
                    yield BulkEvent::Record {
                        partition_id: partition_id.clone(),
                        record: record?,
                    };
                }
            }

            debug!("Partition {partition_id} of job {job_id} delivered {count} records");
            yield BulkEvent::PartitionDone { partition_id };
        })
    }

    // =========================================================================
    // Resumption
    // =========================================================================

    /// Continue a job persisted by an earlier run.
    ///
    /// Returns `None` when the platform no longer knows the job; the caller
    /// then drops the job bookmark and starts fresh.
    pub async fn resume(&self, job_id: &str, pending: Vec<String>) -> Result<Option<EventStream>> {
        if !self.api.job_exists(job_id).await? {
            warn!("Bulk job {job_id} no longer exists, dropping it");
            return Ok(None);
        }

        info!(
            "Resuming bulk job {job_id} with {} pending partitions",
            pending.len()
        );
        Ok(Some(self.resolve(job_id, pending)))
    }
}

fn check_failed(job: &BulkJob) -> Result<()> {
    let failed = job.partitions.failed_ids();
    if failed.is_empty() {
        return Ok(());
    }
    log_partition_messages(job);
    Err(Error::PartitionFailure {
        job_id: job.id.clone(),
        failed,
    })
}

fn log_partition_messages(job: &BulkJob) {
    for partition in job.partitions.iter() {
        if partition.state == PartitionState::Completed {
            continue;
        }
        if let Some(ref message) = partition.state_message {
            warn!(
                "Job {} partition {} ended {}: {message}",
                job.id, partition.id, partition.state
            );
        }
    }
}

/// Parse a downloaded result on a blocking thread, handing records over a
/// bounded channel. The temp file is removed once parsing ends.
fn read_records(file: NamedTempFile, capacity: usize) -> BoxStream<'static, Result<JsonObject>> {
    let (tx, rx) = mpsc::channel(capacity.max(1));

    tokio::task::spawn_blocking(move || {
        let records = file
            .reopen()
            .map_err(Error::from)
            .and_then(|handle| CsvRecords::new(BufReader::new(handle)));

        match records {
            Ok(records) => {
                for record in records {
                    if tx.blocking_send(record).is_err() {
                        break;
                    }
                }
            }
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
            }
        }
        drop(file);
    });

    stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed()
}
