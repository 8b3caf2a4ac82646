//! State management module
//!
//! Handles bookmark tracking, checkpointing, and resumability.
//! State is persisted between runs to enable incremental extraction.
//!
//! # Overview
//!
//! - `State` - per-stream bookmarks keyed by stream name
//! - `Position` - either a replication bookmark or an in-flight bulk job
//! - `StateManager` - file-based persistence with atomic writes

mod manager;
mod types;

pub use manager::StateManager;
pub use types::{later_bookmark, Position, State, StreamState};
