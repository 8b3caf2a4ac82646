//! CLI runner - executes commands

use crate::auth::{Authenticator, Credentials, Session};
use crate::bulk::{BulkApi, BulkConfig, BulkExtractor, JobTracker};
use crate::cli::commands::{Cli, Commands};
use crate::config::Config;
use crate::engine::{SyncConfig, SyncEngine, SyncStats};
use crate::error::{Error, Result};
use crate::http::{HttpClient, HttpClientConfig};
use crate::quota::{Governors, QuotaPolicy, QuotaSnapshot};
use crate::rest::{PaginatedQuery, RestApi, RestConfig};
use crate::state::StateManager;
use crate::target::ExtractionTarget;
use futures::StreamExt;
use serde_json::{json, Value};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command
    pub async fn run(&self) -> Result<()> {
        match &self.cli.command {
            Commands::Check => self.check().await,
            Commands::Read { targets, streams } => self.read(targets, streams.as_deref()).await,
        }
    }

    /// Load configuration
    fn load_config(&self) -> Result<Config> {
        let path = self
            .cli
            .config
            .as_ref()
            .ok_or_else(|| Error::config("Config file not specified (use -C flag)"))?;
        Config::from_file(path)
    }

    /// Load state
    fn load_state(&self) -> Result<StateManager> {
        // Inline state takes precedence
        if let Some(state_json) = &self.cli.state_json {
            StateManager::from_json(state_json)
        } else if let Some(path) = &self.cli.state {
            StateManager::from_file(path)
        } else {
            Ok(StateManager::in_memory())
        }
    }

    /// Log in and report both quotas
    async fn check(&self) -> Result<()> {
        let config = self.load_config()?;
        let connection = Connection::open(&config).await?;
        let session = &connection.session;

        let limits: Value = connection
            .client
            .get_json(&session.data_url("limits"), &session.rest_request())
            .await?;
        let rest = QuotaSnapshot::from_rest_limits(&limits).ok();
        let bulk = QuotaSnapshot::from_bulk_limits(&limits).ok();
        let bulk_enabled = connection.bulk_api().has_permissions().await?;
        if !bulk_enabled {
            warn!("The Bulk API is disabled for this org");
        }

        output_message(&json!({
            "type": "CONNECTION_STATUS",
            "connectionStatus": {
                "status": "SUCCEEDED",
                "instance_url": session.instance_url(),
                "rest_quota": rest.map(quota_json),
                "bulk_quota": bulk.map(quota_json),
                "bulk_enabled": bulk_enabled
            }
        }));
        Ok(())
    }

    /// Sync every selected target, writing messages to stdout
    async fn read(&self, targets_path: &Path, streams: Option<&str>) -> Result<()> {
        let started = Instant::now();
        let config = self.load_config()?;
        let state = self.load_state()?;

        let stream_filter: Option<Vec<&str>> = streams.map(|s| s.split(',').collect());
        let targets: Vec<ExtractionTarget> = ExtractionTarget::load_all(targets_path)?
            .into_iter()
            .filter(|t| {
                stream_filter
                    .as_ref()
                    .map_or(true, |f| f.contains(&t.stream.as_str()))
            })
            .collect();

        let connection = Connection::open(&config).await?;
        let engine = connection.engine(&config, state)?;

        let mut stdout = std::io::stdout();
        let outcome = sync_targets(&engine, &targets, &mut stdout).await;
        engine.state().save().await?;

        let stats = engine.stats();
        log_summary(&connection.governors, &stats);
        info!("Run finished in {}ms", started.elapsed().as_millis());

        outcome?;
        if stats.targets_failed > 0 {
            return Err(Error::Other(format!(
                "{} of {} targets failed",
                stats.targets_failed,
                targets.len()
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Run Wiring
// ============================================================================

/// An authenticated connection and the quota governors of one run
#[derive(Clone)]
pub struct Connection {
    /// Transport shared by every component
    pub client: HttpClient,
    /// Logged-in session
    pub session: Session,
    /// Quota governors
    pub governors: Governors,
}

impl Connection {
    /// Build the transport and log in
    pub async fn open(config: &Config) -> Result<Self> {
        let governors = Governors::new(QuotaPolicy::new(
            config.quota_percent_per_run,
            config.quota_percent_total,
        ));
        let client = HttpClient::with_config(HttpClientConfig::from_settings(&config.http))?
            .with_governors(governors.clone());

        let credentials = Credentials::from_config(config)?;
        let session = Authenticator::new(client.clone())
            .login(&credentials, &config.api_version)
            .await?;
        info!("Connected to {}", session.instance_url());

        Ok(Self {
            client,
            session,
            governors,
        })
    }

    /// Bulk endpoints for this session
    pub fn bulk_api(&self) -> BulkApi {
        BulkApi::new(
            self.client.clone(),
            self.session.clone(),
            Arc::new(JobTracker::new()),
        )
    }

    /// Build a sync engine with both extraction paths
    pub fn engine(&self, config: &Config, state: StateManager) -> Result<SyncEngine> {
        let rest = PaginatedQuery::new(
            Arc::new(RestApi::new(self.client.clone(), self.session.clone())),
            self.governors.rest.clone(),
            RestConfig::from_settings(&config.rest),
        );
        let bulk = BulkExtractor::new(
            self.bulk_api(),
            self.governors.bulk.clone(),
            BulkConfig::from_settings(&config.bulk),
        );
        Ok(SyncEngine::new(state, rest, SyncConfig::from_config(config)?).with_bulk(bulk))
    }
}

/// Sync targets in order, writing one JSON line per message.
///
/// A failed target is logged and the run moves on; a quota stop ends the
/// run at once.
pub async fn sync_targets<W: Write>(
    engine: &SyncEngine,
    targets: &[ExtractionTarget],
    out: &mut W,
) -> Result<()> {
    for target in targets {
        let mut messages = engine.sync_target(target);
        while let Some(message) = messages.next().await {
            match message {
                Ok(message) => {
                    writeln!(out, "{}", message.to_json_line()?)?;
                }
                Err(e) if e.is_run_fatal() => {
                    error!("Stopping run at {}: {e}", target.stream);
                    engine.record_failure();
                    out.flush()?;
                    return Err(e);
                }
                Err(e) => {
                    error!("Error syncing stream {}: {e}", target.stream);
                    engine.record_failure();
                    break;
                }
            }
        }
        out.flush()?;
    }
    Ok(())
}

/// Log what the run consumed
pub fn log_summary(governors: &Governors, stats: &SyncStats) {
    info!("REST API calls attempted: {}", governors.rest.attempted());
    info!("Bulk API jobs completed: {}", governors.bulk.attempted());
    for (stream, count) in &stats.records {
        info!("{stream}: {count} records");
    }
    info!(
        "Targets synced: {}, failed: {}, records: {}",
        stats.targets_synced,
        stats.targets_failed,
        stats.total_records()
    );
    if !stats.chunking_failures.is_empty() {
        warn!(
            "PK chunking failed for: {}",
            stats.chunking_failures.join(", ")
        );
    }
}

fn quota_json(snapshot: QuotaSnapshot) -> Value {
    json!({
        "remaining": snapshot.remaining,
        "max": snapshot.max,
        "percent_used": snapshot.percent_used_total()
    })
}

/// Output a message
fn output_message(msg: &Value) {
    println!("{}", serde_json::to_string(msg).unwrap_or_default());
}
