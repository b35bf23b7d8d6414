//! HTTP transport for schema data.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SchemaFetchError;

/// Status and decoded body of a schema data request.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaResponse {
    pub status: u16,
    /// Parsed JSON body; only read on HTTP 200.
    pub body: Option<Value>,
}

/// Fetches per-user schema data from a brand API.
#[async_trait]
pub trait SchemaDataClient: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> Result<SchemaResponse, SchemaFetchError>;
}

/// `reqwest`-backed client. The timeout is applied per request.
pub struct HttpSchemaDataClient {
    client: reqwest::Client,
}

impl HttpSchemaDataClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpSchemaDataClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SchemaDataClient for HttpSchemaDataClient {
    async fn get(&self, url: &str, timeout: Duration) -> Result<SchemaResponse, SchemaFetchError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SchemaFetchError::Timeout(timeout.as_millis() as u64)
                } else {
                    SchemaFetchError::Transport(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status != 200 {
            return Ok(SchemaResponse { status, body: None });
        }

        let body: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                SchemaFetchError::Timeout(timeout.as_millis() as u64)
            } else {
                SchemaFetchError::InvalidBody(e.to_string())
            }
        })?;
        Ok(SchemaResponse {
            status,
            body: Some(body),
        })
    }
}
