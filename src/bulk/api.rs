//! Bulk API v1 endpoints
//!
//! Jobs are created and closed with JSON bodies; batch listings and result
//! listings come back as XML; results are CSV.

use super::tracker::JobTracker;
use super::types::{Chunking, Partition, PartitionState};
use crate::auth::Session;
use crate::decode::{as_list, strip_nul, xml_to_json};
use crate::error::{Error, Result};
use crate::http::{HttpClient, RequestConfig};
use crate::quota::QuotaSnapshot;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Thin wrapper over the Bulk API endpoints of one session
#[derive(Debug, Clone)]
pub struct BulkApi {
    client: HttpClient,
    session: Session,
    tracker: Arc<JobTracker>,
}

#[derive(Debug, Deserialize)]
struct JobInfo {
    id: String,
}

impl BulkApi {
    /// Create the endpoint wrapper
    pub fn new(client: HttpClient, session: Session, tracker: Arc<JobTracker>) -> Self {
        Self {
            client,
            session,
            tracker,
        }
    }

    /// Closed-job tracker shared by this API
    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    fn request(&self) -> RequestConfig {
        self.session
            .bulk_request()
            .header("Content-Type", "application/json")
    }

    /// Create a `queryAll` CSV job for `object`
    pub async fn create_job(&self, object: &str, chunking: &Chunking) -> Result<String> {
        let mut config = self
            .request()
            .header("Sforce-Disable-Batch-Retry", "true")
            .json(json!({
                "operation": "queryAll",
                "object": object,
                "contentType": "CSV"
            }));
        if let Some(value) = chunking.header_value() {
            info!("Requesting PK chunking for {object}: {value}");
            config = config.header("Sforce-Enable-PKChunking", value);
        }

        let job: JobInfo = self
            .client
            .post_json(&self.session.bulk_url("job"), &config)
            .await?;
        info!("Created bulk job {} for {object}", job.id);
        Ok(job.id)
    }

    /// Submit the query as the job's batch; returns the batch id
    pub async fn add_batch(&self, job_id: &str, query: &str) -> Result<String> {
        let config = self.request().text("text/csv", query);
        let url = self.session.bulk_url(&format!("job/{job_id}/batch"));
        let body = self.client.send_text(Method::POST, &url, &config).await?;

        let doc = xml_to_json(&body)?;
        let id = doc["batchInfo"]["id"]
            .as_str()
            .ok_or_else(|| Error::decode("batchInfo response has no id"))?;
        debug!("Added batch {id} to job {job_id}");
        Ok(id.to_string())
    }

    /// List every batch of a job in remote order
    pub async fn get_batches(&self, job_id: &str) -> Result<Vec<Partition>> {
        let url = self.session.bulk_url(&format!("job/{job_id}/batch"));
        let body = self.client.send_text(Method::GET, &url, &self.request()).await?;

        let doc = xml_to_json(&body)?;
        as_list(doc["batchInfoList"].get("batchInfo"))
            .into_iter()
            .map(parse_batch_info)
            .collect()
    }

    /// Read one batch
    pub async fn get_batch(&self, job_id: &str, batch_id: &str) -> Result<Partition> {
        let url = self.session.bulk_url(&format!("job/{job_id}/batch/{batch_id}"));
        let body = self.client.send_text(Method::GET, &url, &self.request()).await?;

        let doc = xml_to_json(&body)?;
        parse_batch_info(&doc["batchInfo"])
    }

    /// Result ids of a completed batch
    pub async fn result_ids(&self, job_id: &str, batch_id: &str) -> Result<Vec<String>> {
        let url = self
            .session
            .bulk_url(&format!("job/{job_id}/batch/{batch_id}/result"));
        let body = self.client.send_text(Method::GET, &url, &self.request()).await?;

        let doc = xml_to_json(&body)?;
        as_list(doc["result-list"].get("result"))
            .into_iter()
            .map(|v| {
                v.as_str()
                    .map(String::from)
                    .ok_or_else(|| Error::decode("result id is not text"))
            })
            .collect()
    }

    /// Stream one result CSV into a temporary file, dropping NUL bytes
    pub async fn download_result(
        &self,
        job_id: &str,
        batch_id: &str,
        result_id: &str,
    ) -> Result<NamedTempFile> {
        let url = self
            .session
            .bulk_url(&format!("job/{job_id}/batch/{batch_id}/result/{result_id}"));
        let config = self.session.bulk_request().header("Content-Type", "text/csv");
        let mut response = self.client.send(Method::GET, &url, &config).await?;

        let temp = NamedTempFile::new()?;
        let mut out = tokio::fs::File::from_std(temp.reopen()?);
        let mut bytes = 0usize;
        while let Some(chunk) = response.chunk().await? {
            let clean = strip_nul(&chunk);
            bytes += clean.len();
            out.write_all(&clean).await?;
        }
        out.flush().await?;

        debug!("Downloaded result {result_id} of batch {batch_id} ({bytes} bytes)");
        Ok(temp)
    }

    /// Whether the platform still knows the job
    pub async fn job_exists(&self, job_id: &str) -> Result<bool> {
        let url = self.session.bulk_url(&format!("job/{job_id}"));
        match self.client.send(Method::GET, &url, &self.request()).await {
            Ok(_) => Ok(true),
            Err(e) if bulk_error_code(&e).as_deref() == Some("InvalidJob") => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Close a job; closing an already closed job is a no-op
    pub async fn close_job(&self, job_id: &str) -> Result<()> {
        if !self.tracker.mark_closed(job_id) {
            debug!("Job {job_id} already closed, skipping");
            return Ok(());
        }

        let url = self.session.bulk_url(&format!("job/{job_id}"));
        let config = self.request().json(json!({"state": "Closed"}));
        self.client.send(Method::POST, &url, &config).await?;
        info!("Closed bulk job {job_id}");
        Ok(())
    }

    /// Current bulk quota from the `limits` endpoint
    pub async fn quota(&self) -> Result<QuotaSnapshot> {
        let limits: Value = self
            .client
            .get_json(&self.session.data_url("limits"), &self.session.rest_request())
            .await?;
        QuotaSnapshot::from_bulk_limits(&limits)
    }

    /// False when the org has the Bulk API disabled
    pub async fn has_permissions(&self) -> Result<bool> {
        match self.quota().await {
            Ok(_) => Ok(true),
            Err(e) if e.remote_error_code().as_deref() == Some("API_DISABLED_FOR_ORG") => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Error code of a Bulk API failure, which may be JSON or XML
fn bulk_error_code(err: &Error) -> Option<String> {
    if let Some(code) = err.remote_error_code() {
        return Some(code);
    }
    let Error::HttpStatus { body, .. } = err else {
        return None;
    };
    let doc = xml_to_json(body).ok()?;
    doc.get("error")?
        .get("exceptionCode")?
        .as_str()
        .map(String::from)
}

fn parse_batch_info(info: &Value) -> Result<Partition> {
    let id = info["id"]
        .as_str()
        .ok_or_else(|| Error::decode("batchInfo has no id"))?;
    let state = info["state"]
        .as_str()
        .ok_or_else(|| Error::decode(format!("batchInfo {id} has no state")))?;
    let message = info["stateMessage"].as_str().map(String::from);

    Ok(Partition::new(id, PartitionState::parse(state)?).with_message(message))
}
