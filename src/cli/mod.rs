//! CLI module
//!
//! Command-line interface for running extractions.
//!
//! # Commands
//!
//! - `check` - Log in and report remaining quota
//! - `read` - Extract targets to stdout as JSON lines

mod commands;
mod runner;

pub use commands::{Cli, Commands};
pub use runner::{log_summary, sync_targets, Connection, Runner};
