//! Auth types
//!
//! Credentials as configured, and the session they resolve to.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::http::RequestConfig;
use crate::types::OptionStringExt;

/// Production login host
pub const LOGIN_URL: &str = "https://login.salesforce.com";

/// Sandbox login host
pub const SANDBOX_LOGIN_URL: &str = "https://test.salesforce.com";

/// How the run obtains an access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// A token issued elsewhere, used as is
    AccessToken {
        /// Instance the token belongs to
        instance_url: String,
        /// The token
        access_token: String,
    },

    /// OAuth2 refresh token flow
    RefreshToken {
        /// Connected app client id
        client_id: String,
        /// Connected app client secret
        client_secret: String,
        /// Long-lived refresh token
        refresh_token: String,
        /// Use the sandbox login host
        is_sandbox: bool,
    },
}

impl Credentials {
    /// Pick credentials from the run config, preferring a direct token
    pub fn from_config(config: &Config) -> Result<Self> {
        let instance_url = config.instance_url.clone().none_if_blank();
        let access_token = config.access_token.clone().none_if_blank();
        if let (Some(instance_url), Some(access_token)) = (instance_url, access_token) {
            return Ok(Self::AccessToken {
                instance_url,
                access_token,
            });
        }

        let field = |value: &Option<String>, name: &str| {
            value
                .clone()
                .none_if_blank()
                .ok_or_else(|| Error::missing_field(name))
        };

        Ok(Self::RefreshToken {
            client_id: field(&config.client_id, "client_id")?,
            client_secret: field(&config.client_secret, "client_secret")?,
            refresh_token: field(&config.refresh_token, "refresh_token")?,
            is_sandbox: config.is_sandbox,
        })
    }
}

/// An authenticated session against one instance
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    instance_url: String,
    access_token: String,
    api_version: String,
}

impl Session {
    /// Create a session
    pub fn new(
        instance_url: impl Into<String>,
        access_token: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        Self {
            instance_url: instance_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            api_version: api_version.into(),
        }
    }

    /// Instance base URL without a trailing slash
    pub fn instance_url(&self) -> &str {
        &self.instance_url
    }

    /// API version in use
    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// URL under `/services/data/v{version}/`
    pub fn data_url(&self, path: &str) -> String {
        format!(
            "{}/services/data/v{}/{}",
            self.instance_url,
            self.api_version,
            path.trim_start_matches('/')
        )
    }

    /// URL under the Bulk API root `/services/async/{version}/`
    pub fn bulk_url(&self, path: &str) -> String {
        format!(
            "{}/services/async/{}/{}",
            self.instance_url,
            self.api_version,
            path.trim_start_matches('/')
        )
    }

    /// Request config carrying the REST bearer token
    pub fn rest_request(&self) -> RequestConfig {
        RequestConfig::new().header("Authorization", format!("Bearer {}", self.access_token))
    }

    /// Request config carrying the Bulk API session header
    pub fn bulk_request(&self) -> RequestConfig {
        RequestConfig::new().header("X-SFDC-Session", self.access_token.clone())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("instance_url", &self.instance_url)
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}
