//! State manager implementation
//!
//! Provides file-based state persistence with atomic writes. Every mutation
//! happens under one write lock and is followed by one save, so a crash
//! leaves either the previous or the next state on disk.

use super::types::{later_bookmark, Position, State, StreamState};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// State manager for persisting and loading state
#[derive(Debug, Clone)]
pub struct StateManager {
    /// Path to the state file
    path: PathBuf,
    /// Current state (cached)
    state: Arc<RwLock<State>>,
    /// Whether to save on every update
    auto_save: bool,
}

impl StateManager {
    /// Create a new state manager with the given path
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            state: Arc::new(RwLock::new(State::new())),
            auto_save: true,
        }
    }

    /// Create an in-memory state manager (no file persistence)
    pub fn in_memory() -> Self {
        Self::with_state(State::new())
    }

    /// Create an in-memory state manager seeded with a state
    pub fn with_state(state: State) -> Self {
        Self {
            path: PathBuf::new(),
            state: Arc::new(RwLock::new(state)),
            auto_save: false,
        }
    }

    /// Create a state manager from a file, loading existing state if present
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| Error::state(format!("Failed to read state file: {e}")))?;
            parse_state(&contents)?
        } else {
            State::new()
        };

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(state)),
            auto_save: true,
        })
    }

    /// Create an in-memory state manager from inline JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(Self::with_state(parse_state(json)?))
    }

    /// Save current state to file
    pub async fn save(&self) -> Result<()> {
        if self.is_in_memory() {
            return Ok(());
        }

        let contents = self.to_json_pretty().await?;

        // Write to temp file first, then rename for atomicity
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, &contents)
            .await
            .map_err(|e| Error::state(format!("Failed to write state file: {e}")))?;

        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| Error::state(format!("Failed to rename state file: {e}")))?;

        debug!("State saved to {}", self.path.display());
        Ok(())
    }

    /// Get a read lock on the current state
    pub async fn state(&self) -> tokio::sync::RwLockReadGuard<'_, State> {
        self.state.read().await
    }

    /// Snapshot of the whole state
    pub async fn snapshot(&self) -> State {
        self.state.read().await.clone()
    }

    /// Export state as JSON string
    pub async fn to_json(&self) -> Result<String> {
        let state = self.state.read().await;
        serde_json::to_string(&*state)
            .map_err(|e| Error::state(format!("Failed to serialize state: {e}")))
    }

    /// Export state as pretty-printed JSON string
    pub async fn to_json_pretty(&self) -> Result<String> {
        let state = self.state.read().await;
        serde_json::to_string_pretty(&*state)
            .map_err(|e| Error::state(format!("Failed to serialize state: {e}")))
    }

    /// State of one stream (empty if never seen)
    pub async fn stream_state(&self, stream: &str) -> StreamState {
        let state = self.state.read().await;
        state.get_stream(stream).cloned().unwrap_or_default()
    }

    /// Apply a mutation to one stream's state and persist it.
    ///
    /// Returns the stream state as it stands after the mutation.
    pub async fn update_stream<F>(&self, stream: &str, f: F) -> Result<StreamState>
    where
        F: FnOnce(&mut StreamState),
    {
        let updated = {
            let mut state = self.state.write().await;
            let entry = state.get_stream_mut(stream);
            f(entry);
            entry.clone()
        };

        if self.auto_save {
            self.save().await?;
        }

        Ok(updated)
    }

    /// Set the table version for a stream
    pub async fn set_version(&self, stream: &str, version: i64) -> Result<StreamState> {
        self.update_stream(stream, |s| s.version = Some(version))
            .await
    }

    /// Set a plain replication bookmark
    pub async fn set_replication_value(&self, stream: &str, value: String) -> Result<StreamState> {
        self.update_stream(stream, |s| s.set_replication_value(value))
            .await
    }

    /// Record a bulk job whose completed partitions are about to be delivered
    pub async fn start_bulk_job(
        &self,
        stream: &str,
        job_id: String,
        pending_partitions: Vec<String>,
        started_from: Option<String>,
    ) -> Result<StreamState> {
        self.update_stream(stream, |s| {
            s.position = Some(Position::BulkJob {
                job_id,
                pending_partitions,
                highest_seen: None,
                started_from,
            });
        })
        .await
    }

    /// Remove a delivered partition from the job's pending set and raise its
    /// high-water mark, in one write and one save
    pub async fn complete_partition(
        &self,
        stream: &str,
        partition_id: &str,
        highest_seen: Option<String>,
    ) -> Result<StreamState> {
        self.update_stream(stream, |s| {
            if let Some(Position::BulkJob {
                pending_partitions,
                highest_seen: current,
                ..
            }) = &mut s.position
            {
                pending_partitions.retain(|p| p != partition_id);
                *current = later_bookmark(current.take(), highest_seen);
            }
        })
        .await
    }

    /// Collapse a finished bulk job into a replication bookmark
    pub async fn finish_bulk_job(&self, stream: &str) -> Result<StreamState> {
        self.update_stream(stream, StreamState::finish_bulk_job)
            .await
    }

    /// Drop a stale bulk job and return to the bookmark it started from
    pub async fn abandon_bulk_job(&self, stream: &str) -> Result<StreamState> {
        self.update_stream(stream, StreamState::abandon_bulk_job)
            .await
    }

    /// Get the state file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if using in-memory mode
    pub fn is_in_memory(&self) -> bool {
        self.path.as_os_str().is_empty()
    }
}

fn parse_state(contents: &str) -> Result<State> {
    if contents.trim().is_empty() {
        return Ok(State::new());
    }
    serde_json::from_str(contents).map_err(|e| Error::state(format!("Failed to parse state: {e}")))
}
