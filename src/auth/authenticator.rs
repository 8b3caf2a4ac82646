//! Session login
//!
//! Resolves [`Credentials`] into a [`Session`]. The refresh token flow is a
//! single token request; the session is not refreshed during the run.

use super::types::{Credentials, Session, LOGIN_URL, SANDBOX_LOGIN_URL};
use crate::error::{Error, Result};
use crate::http::{HttpClient, RequestConfig};
use reqwest::Method;
use serde::Deserialize;
use tracing::info;

/// Logs in and produces sessions
#[derive(Debug, Clone)]
pub struct Authenticator {
    client: HttpClient,
    login_url: Option<String>,
}

impl Authenticator {
    /// Create an authenticator using the given transport
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            login_url: None,
        }
    }

    /// Override the login host
    #[must_use]
    pub fn with_login_url(mut self, url: impl Into<String>) -> Self {
        self.login_url = Some(url.into());
        self
    }

    /// Resolve credentials into a session for `api_version`
    pub async fn login(&self, credentials: &Credentials, api_version: &str) -> Result<Session> {
        match credentials {
            Credentials::AccessToken {
                instance_url,
                access_token,
            } => Ok(Session::new(
                instance_url.clone(),
                access_token.clone(),
                api_version,
            )),
            Credentials::RefreshToken {
                client_id,
                client_secret,
                refresh_token,
                is_sandbox,
            } => {
                let host = match (&self.login_url, is_sandbox) {
                    (Some(url), _) => url.trim_end_matches('/').to_string(),
                    (None, true) => SANDBOX_LOGIN_URL.to_string(),
                    (None, false) => LOGIN_URL.to_string(),
                };
                let token_url = format!("{host}/services/oauth2/token");

                let form = url::form_urlencoded::Serializer::new(String::new())
                    .append_pair("grant_type", "refresh_token")
                    .append_pair("client_id", client_id)
                    .append_pair("client_secret", client_secret)
                    .append_pair("refresh_token", refresh_token)
                    .finish();
                let config =
                    RequestConfig::new().text("application/x-www-form-urlencoded", form);

                let token: TokenResponse = self
                    .client
                    .send_json(Method::POST, &token_url, &config)
                    .await
                    .map_err(|e| match e {
                        Error::HttpStatus { status, body } => Error::auth(format!(
                            "Refresh token request failed with status {status}: {body}"
                        )),
                        other => other,
                    })?;

                info!("Logged in to {}", token.instance_url);
                Ok(Session::new(token.instance_url, token.access_token, api_version))
            }
        }
    }
}

/// OAuth2 token response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    instance_url: String,
}
