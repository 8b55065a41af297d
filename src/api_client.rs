//! One-shot (non-live) queries over HTTP.

use esav_shared::ApiError;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub const DEFAULT_QUERY_ENDPOINT: &str = "https://esav.whey.party/xrpc/com.example.prototypeESQuery";

/// HTTP client for single query descriptors, answered once.
#[derive(Debug, Clone)]
pub struct QueryClient {
    client: Client,
    endpoint: String,
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            endpoint: DEFAULT_QUERY_ENDPOINT.to_string(),
        }
    }

    /// Set the query endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// `{endpoint}?q={url-encoded descriptor JSON}`
    pub fn query_url(&self, descriptor: &Value) -> Result<String, ApiError> {
        let json =
            serde_json::to_string(descriptor).map_err(|e| ApiError::Deserialize(e.to_string()))?;
        Ok(format!("{}?q={}", self.endpoint, urlencoding::encode(&json)))
    }

    /// Run `descriptor` once and decode the response body.
    pub async fn search<TRes: DeserializeOwned>(&self, descriptor: &Value) -> Result<TRes, ApiError> {
        let url = self.query_url(descriptor)?;
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();

        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            return Err(ApiError::Http { status, body: text });
        }

        serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
    }
}
