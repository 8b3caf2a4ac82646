//! Bulk extraction module
//!
//! Drives Bulk API v1 query jobs.
//!
//! # Overview
//!
//! - `BulkApi` - Job, batch and result endpoints of one session
//! - `BulkExtractor` - Submit, poll, close and download, with PK chunking
//!   fallback and resumption of persisted jobs
//! - `JobTracker` - Jobs already closed in this run
//!
//! # Fallback
//!
//! A target is first tried PK-chunked at the default chunk size, then at the
//! fallback size, then as a single unpartitioned job ordered by the
//! replication key. Each abandoned job is closed before the next is created.

mod api;
mod extractor;
mod tracker;
mod types;

pub use api::BulkApi;
pub use extractor::{BulkExtractor, EventStream};
pub use tracker::JobTracker;
pub use types::{
    find_parent, pk_chunking_parent, BulkConfig, BulkEvent, BulkJob, Chunking, JobPhase,
    Partition, PartitionSet, PartitionState, DEFAULT_CHUNK_SIZE, FALLBACK_CHUNK_SIZE,
};
