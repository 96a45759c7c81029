//! reqwest-backed external API caller

use crate::providers::request_failed;
use crate::{ApiRequest, ApiResponse, ExternalApiCaller};
use async_trait::async_trait;
use enrich_core::{EnrichResult, HttpMethod};
use reqwest::Client;

/// Plain HTTP caller for external API columns.
#[derive(Debug, Clone, Default)]
pub struct ReqwestApiCaller {
    client: Client,
}

impl ReqwestApiCaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a pre-configured client (proxies, TLS roots, ...).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ExternalApiCaller for ReqwestApiCaller {
    async fn call(&self, request: &ApiRequest) -> EnrichResult<ApiResponse> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
            HttpMethod::Put => self.client.put(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| request_failed("http", 0, format!("HTTP request failed: {}", e)))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| request_failed("http", status as i32, format!("Failed to read body: {}", e)))?;

        Ok(ApiResponse { status, body })
    }
}
