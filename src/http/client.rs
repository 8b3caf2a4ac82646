//! HTTP client with retry and quota admission
//!
//! Every remote call goes through [`HttpClient::send`], which:
//! - refuses to send once a quota governor has tripped
//! - paces requests with a token bucket
//! - retries connect and timeout failures with exponential backoff
//! - hands the `Sforce-Limit-Info` header to the REST governor
//!
//! HTTP error statuses are never retried here; callers decide what a
//! given status means.

use super::rate_limit::{RateLimiter, RateLimiterConfig};
use crate::config::HttpSettings;
use crate::error::{Error, Result};
use crate::quota::{Governors, QuotaSnapshot, LIMIT_INFO_HEADER};
use crate::types::BackoffType;
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for the HTTP client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout
    pub timeout: Duration,
    /// Total attempts for a transient failure (first try included)
    pub max_attempts: u32,
    /// Initial delay for backoff
    pub initial_backoff: Duration,
    /// Maximum delay for backoff
    pub max_backoff: Duration,
    /// Type of backoff strategy
    pub backoff_type: BackoffType,
    /// Rate limiter configuration
    pub rate_limit: Option<RateLimiterConfig>,
    /// Default headers for all requests
    pub default_headers: HashMap<String, String>,
    /// User agent string
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self::from_settings(&HttpSettings::default())
    }
}

impl HttpClientConfig {
    /// Create a new config builder
    pub fn builder() -> HttpClientConfigBuilder {
        HttpClientConfigBuilder::default()
    }

    /// Build a client config from the `http` section of the run config
    pub fn from_settings(settings: &HttpSettings) -> Self {
        Self {
            timeout: settings.timeout(),
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_secs(settings.max_backoff_secs),
            backoff_type: BackoffType::Exponential,
            rate_limit: settings.requests_per_second.map(RateLimiterConfig::per_second),
            default_headers: HashMap::new(),
            user_agent: format!("solidafy-sfdc/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Builder for HTTP client config
#[derive(Default)]
pub struct HttpClientConfigBuilder {
    config: HttpClientConfig,
}

impl HttpClientConfigBuilder {
    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set total attempts for transient failures
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts.max(1);
        self
    }

    /// Set backoff configuration
    pub fn backoff(mut self, backoff_type: BackoffType, initial: Duration, max: Duration) -> Self {
        self.config.backoff_type = backoff_type;
        self.config.initial_backoff = initial;
        self.config.max_backoff = max;
        self
    }

    /// Set rate limiter
    pub fn rate_limit(mut self, config: RateLimiterConfig) -> Self {
        self.config.rate_limit = Some(config);
        self
    }

    /// Disable rate limiting
    pub fn no_rate_limit(mut self) -> Self {
        self.config.rate_limit = None;
        self
    }

    /// Add a default header
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.insert(key.into(), value.into());
        self
    }

    /// Build the config
    pub fn build(self) -> HttpClientConfig {
        self.config
    }
}

/// Body of a single request
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// Serialized as JSON with `Content-Type: application/json`
    Json(Value),
    /// Sent verbatim; the caller supplies `Content-Type`
    Text(String),
}

/// Configuration for a single request
#[derive(Debug, Clone, Default)]
pub struct RequestConfig {
    /// Query parameters
    pub query: Vec<(String, String)>,
    /// Request headers
    pub headers: HashMap<String, String>,
    /// Request body
    pub body: Option<RequestBody>,
    /// Override timeout for this request
    pub timeout: Option<Duration>,
}

impl RequestConfig {
    /// Create a new request config
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a query parameter
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add a header
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set JSON body
    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    /// Set a raw text body with its content type
    #[must_use]
    pub fn text(mut self, content_type: &str, body: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Text(body.into()));
        self.header("Content-Type", content_type)
    }

    /// Set timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// HTTP client with retry, pacing and quota admission
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    config: HttpClientConfig,
    rate_limiter: Option<RateLimiter>,
    governors: Option<Governors>,
}

impl HttpClient {
    /// Create a new HTTP client with custom configuration
    pub fn with_config(config: HttpClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;

        let rate_limiter = config.rate_limit.as_ref().map(RateLimiter::new);

        Ok(Self {
            client,
            config,
            rate_limiter,
            governors: None,
        })
    }

    /// Attach the run's quota governors
    #[must_use]
    pub fn with_governors(mut self, governors: Governors) -> Self {
        self.governors = Some(governors);
        self
    }

    /// Governors attached to this client
    pub fn governors(&self) -> Option<&Governors> {
        self.governors.as_ref()
    }

    /// Get the underlying reqwest client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Send a request, retrying transient network failures.
    ///
    /// Returns the response for any 2xx status. Other statuses surface as
    /// [`Error::HttpStatus`] with the body text.
    pub async fn send(&self, method: Method, url: &str, config: &RequestConfig) -> Result<Response> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.send_once(method.clone(), url, config).await {
                Ok(response) => return self.check_response(response).await,
                Err(e) if is_transient(&e) => {
                    if attempt >= max_attempts {
                        return Err(Error::TransientNetwork {
                            attempts: attempt,
                            message: e.to_string(),
                        });
                    }
                    let delay = self.calculate_backoff(attempt - 1);
                    warn!(
                        "Network error on {} {}, attempt {}/{}, retrying in {:?}: {}",
                        method, url, attempt, max_attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Send a request and parse the body as JSON.
    ///
    /// A body that is not valid JSON is treated like a dropped connection and
    /// the whole request is retried.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        config: &RequestConfig,
    ) -> Result<T> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let response = self.send(method.clone(), url, config).await?;
            let text = response.text().await?;

            match serde_json::from_str::<Value>(&text) {
                Ok(value) => return Ok(serde_json::from_value(value)?),
                Err(e) if attempt < max_attempts => {
                    let delay = self.calculate_backoff(attempt - 1);
                    warn!(
                        "Malformed JSON from {} {}, attempt {}/{}, retrying in {:?}: {}",
                        method, url, attempt, max_attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(Error::TransientNetwork {
                        attempts: attempt,
                        message: format!("malformed JSON body: {e}"),
                    })
                }
            }
        }
    }

    /// Send a request and return the body as text
    pub async fn send_text(&self, method: Method, url: &str, config: &RequestConfig) -> Result<String> {
        let response = self.send(method, url, config).await?;
        Ok(response.text().await?)
    }

    /// GET and parse JSON
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str, config: &RequestConfig) -> Result<T> {
        self.send_json(Method::GET, url, config).await
    }

    /// POST and parse JSON
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        url: &str,
        config: &RequestConfig,
    ) -> Result<T> {
        self.send_json(Method::POST, url, config).await
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        config: &RequestConfig,
    ) -> std::result::Result<Response, SendError> {
        if let Some(ref governors) = self.governors {
            governors.ensure_open().map_err(SendError::Quota)?;
        }

        if let Some(ref limiter) = self.rate_limiter {
            limiter.wait().await;
        }

        let mut req = self.client.request(method, url);

        for (key, value) in &self.config.default_headers {
            req = req.header(key.as_str(), value.as_str());
        }
        for (key, value) in &config.headers {
            req = req.header(key.as_str(), value.as_str());
        }
        if !config.query.is_empty() {
            req = req.query(&config.query);
        }
        match &config.body {
            Some(RequestBody::Json(body)) => req = req.json(body),
            Some(RequestBody::Text(body)) => req = req.body(body.clone()),
            None => {}
        }
        if let Some(timeout) = config.timeout {
            req = req.timeout(timeout);
        }

        req.send().await.map_err(SendError::Network)
    }

    async fn check_response(&self, response: Response) -> Result<Response> {
        let status = response.status();
        let snapshot = response
            .headers()
            .get(LIMIT_INFO_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(QuotaSnapshot::from_limit_info);

        // Only calls that report REST usage count against the REST share
        if !status.is_success() {
            if let (Some(governors), Some(_)) = (&self.governors, snapshot) {
                governors.rest.record_attempt();
            }
            let body = response.text().await.unwrap_or_default();
            debug!("Request failed with {}: {}", status.as_u16(), body);
            return Err(Error::http_status(status.as_u16(), body));
        }

        if let (Some(governors), Some(snapshot)) = (&self.governors, snapshot) {
            governors.rest.account_for_call(&snapshot)?;
        }

        Ok(response)
    }

    /// Calculate backoff delay for a given retry (0-based)
    pub fn calculate_backoff(&self, retry: u32) -> Duration {
        let delay = match self.config.backoff_type {
            BackoffType::Constant => self.config.initial_backoff,
            BackoffType::Linear => self.config.initial_backoff.saturating_mul(retry + 1),
            BackoffType::Exponential => {
                let factor = 2u32.saturating_pow(retry);
                self.config.initial_backoff.saturating_mul(factor)
            }
        };

        std::cmp::min(delay, self.config.max_backoff)
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("config", &self.config)
            .field("has_rate_limiter", &self.rate_limiter.is_some())
            .field("has_governors", &self.governors.is_some())
            .finish_non_exhaustive()
    }
}

/// Failure of a single attempt
enum SendError {
    Quota(Error),
    Network(reqwest::Error),
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendError::Quota(e) => write!(f, "{e}"),
            SendError::Network(e) => write!(f, "{e}"),
        }
    }
}

impl From<SendError> for Error {
    fn from(e: SendError) -> Self {
        match e {
            SendError::Quota(e) => e,
            SendError::Network(e) => Error::Http(e),
        }
    }
}

/// Connect failures and timeouts are worth another attempt
fn is_transient(e: &SendError) -> bool {
    match e {
        SendError::Network(e) => e.is_connect() || e.is_timeout(),
        SendError::Quota(_) => false,
    }
}
