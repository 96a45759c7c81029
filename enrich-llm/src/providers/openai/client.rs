//! OpenAI-compatible HTTP client with rate limiting

use super::types::ApiError;
use crate::providers::{invalid_response, rate_limited, request_failed};
use enrich_core::EnrichResult;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Client for any host speaking the OpenAI REST dialect.
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    base_url: String,
    provider: String,
    rate_limiter: Arc<Semaphore>,
    last_request: Arc<AtomicU64>,
    min_request_interval_ms: u64,
    start_time: Instant,
}

impl OpenAIClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `base_url` - API root, e.g. `https://api.together.xyz/v1`
    /// * `api_key` - Bearer token
    /// * `requests_per_minute` - Maximum requests per minute
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        requests_per_minute: u32,
    ) -> Self {
        let rpm = requests_per_minute.max(1);
        let permits = rpm as usize;
        let min_interval_ms = (60_000 / rpm as u64).max(10);
        let base_url: String = base_url.into();

        Self {
            client: Client::new(),
            api_key: api_key.into(),
            provider: provider_label(&base_url),
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limiter: Arc::new(Semaphore::new(permits)),
            last_request: Arc::new(AtomicU64::new(0)),
            min_request_interval_ms: min_interval_ms,
            start_time: Instant::now(),
        }
    }

    /// Provider label derived from the host, used in errors and logs.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Make an API request with automatic rate limiting.
    pub async fn request<Req: Serialize, Res: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: Req,
    ) -> EnrichResult<Res> {
        let provider = self.provider.as_str();

        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| request_failed(provider, 0, format!("Rate limiter error: {}", e)))?;

        // Enforce minimum interval between requests
        let now_ms = self.start_time.elapsed().as_millis() as u64;
        let last_ms = self.last_request.load(Ordering::Relaxed);
        let elapsed = now_ms.saturating_sub(last_ms);

        if last_ms > 0 && elapsed < self.min_request_interval_ms {
            let wait_ms = self.min_request_interval_ms - elapsed;
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;
        }

        self.last_request.store(
            self.start_time.elapsed().as_millis() as u64,
            Ordering::Relaxed,
        );

        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| request_failed(provider, 0, format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let retry_after_ms = parse_retry_after_ms(response.headers()).unwrap_or(0);

        if status.is_success() {
            response.json().await.map_err(|e| {
                invalid_response(provider, format!("Failed to parse response: {}", e))
            })
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            let error_msg = match serde_json::from_str::<ApiError>(&error_text) {
                Ok(api_error) => api_error.error.message,
                Err(_) => error_text,
            };

            Err(match status {
                StatusCode::TOO_MANY_REQUESTS => rate_limited(provider, retry_after_ms),
                _ => request_failed(provider, status.as_u16() as i32, error_msg),
            })
        }
    }
}

fn provider_label(base_url: &str) -> String {
    base_url
        .split("://")
        .nth(1)
        .unwrap_or(base_url)
        .split('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

fn parse_retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<i64> {
    headers
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<f64>().ok())
        .map(|seconds| (seconds * 1000.0) as i64)
}

impl std::fmt::Debug for OpenAIClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    #[test]
    fn test_provider_label_from_host() {
        assert_eq!(provider_label("https://api.together.xyz/v1"), "api.together.xyz");
        assert_eq!(provider_label("localhost:8080"), "localhost:8080");
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("1.5"));
        assert_eq!(parse_retry_after_ms(&headers), Some(1500));
        assert_eq!(parse_retry_after_ms(&HeaderMap::new()), None);
    }

    #[test]
    fn test_debug_redacts_key() {
        let client = OpenAIClient::new("https://api.together.xyz/v1/", "sk-secret", 60);
        let debug = format!("{:?}", client);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("https://api.together.xyz/v1\""));
    }
}
