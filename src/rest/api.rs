//! `queryAll` endpoint

use super::types::{PageRequest, QueryPage, QueryTransport};
use crate::auth::Session;
use crate::error::Result;
use crate::http::HttpClient;
use async_trait::async_trait;
use tracing::debug;

/// Field the platform wraps around every record
const ATTRIBUTES_FIELD: &str = "attributes";

/// Query pages over HTTP for one session
#[derive(Debug, Clone)]
pub struct RestApi {
    client: HttpClient,
    session: Session,
}

impl RestApi {
    /// Create the endpoint wrapper
    pub fn new(client: HttpClient, session: Session) -> Self {
        Self { client, session }
    }
}

#[async_trait]
impl QueryTransport for RestApi {
    async fn fetch_page(&self, request: &PageRequest) -> Result<QueryPage> {
        let (url, config) = match request {
            PageRequest::Query(query) => {
                debug!("queryAll: {query}");
                (
                    self.session.data_url("queryAll"),
                    self.session.rest_request().query("q", query.clone()),
                )
            }
            PageRequest::Next(path) => (
                format!("{}{path}", self.session.instance_url()),
                self.session.rest_request(),
            ),
        };

        let mut page: QueryPage = self.client.get_json(&url, &config).await?;
        for record in &mut page.records {
            record.remove(ATTRIBUTES_FIELD);
        }
        Ok(page)
    }
}
