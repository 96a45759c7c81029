//! Mock collaborators for testing.
//!
//! Deterministic, in-memory implementations of every collaborator trait.
//! Each mock records what it was asked so tests can assert on calls.

use crate::{
    providers::invalid_response, ApiRequest, ApiResponse, EnrichmentProvider, EnrichmentRequest,
    ExternalApiCaller, FitScorer, ModelInvoker, ModelReply, ScoreRequest,
};
use async_trait::async_trait;
use enrich_core::{EnrichError, EnrichResult, ProviderError};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// MODEL
// ============================================================================

/// Mock model invoker.
/// Answers `"Result for: {prompt}"` unless a canned response or a failure
/// rule matches. Every call reports 10 prompt and 5 completion tokens.
#[derive(Debug, Default)]
pub struct MockModelInvoker {
    responses: HashMap<String, String>,
    failures: Vec<(String, ProviderError)>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockModelInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canned reply for an exact prompt.
    pub fn with_response(mut self, prompt: impl Into<String>, text: impl Into<String>) -> Self {
        self.responses.insert(prompt.into(), text.into());
        self
    }

    /// Fail every prompt containing `needle`.
    pub fn failing_on(mut self, needle: impl Into<String>, error: ProviderError) -> Self {
        self.failures.push((needle.into(), error));
        self
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// `(prompt, model_id)` pairs in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ModelInvoker for MockModelInvoker {
    async fn invoke(&self, prompt: &str, model_id: &str) -> EnrichResult<ModelReply> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((prompt.to_string(), model_id.to_string()));
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((_, error)) = self
            .failures
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
        {
            return Err(EnrichError::Provider(error.clone()));
        }
        let text = self
            .responses
            .get(prompt)
            .cloned()
            .unwrap_or_else(|| format!("Result for: {}", prompt));
        Ok(ModelReply {
            text,
            prompt_tokens: 10,
            completion_tokens: 5,
        })
    }

    fn provider_name(&self) -> &str {
        "mock"
    }
}

// ============================================================================
// ENRICHMENT
// ============================================================================

/// Mock enrichment source keyed by any input value (e.g. a domain).
#[derive(Debug, Default)]
pub struct MockEnrichmentProvider {
    records: HashMap<String, serde_json::Value>,
    requests: Mutex<Vec<EnrichmentRequest>>,
}

impl MockEnrichmentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(mut self, input_value: impl Into<String>, record: serde_json::Value) -> Self {
        self.records.insert(input_value.into(), record);
        self
    }

    pub fn requests(&self) -> Vec<EnrichmentRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EnrichmentProvider for MockEnrichmentProvider {
    async fn lookup(&self, request: &EnrichmentRequest) -> EnrichResult<serde_json::Value> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        request
            .inputs
            .values()
            .find_map(|value| self.records.get(value))
            .cloned()
            .ok_or_else(|| invalid_response(&request.provider, "no record for inputs"))
    }
}

// ============================================================================
// EXTERNAL API
// ============================================================================

/// Mock HTTP caller. Unknown URLs answer 404.
#[derive(Debug, Default)]
pub struct MockApiCaller {
    responses: HashMap<String, ApiResponse>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl MockApiCaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, url: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        self.responses.insert(
            url.into(),
            ApiResponse {
                status,
                body: body.into(),
            },
        );
        self
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ExternalApiCaller for MockApiCaller {
    async fn call(&self, request: &ApiRequest) -> EnrichResult<ApiResponse> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        Ok(self.responses.get(&request.url).cloned().unwrap_or(ApiResponse {
            status: 404,
            body: "not found".to_string(),
        }))
    }
}

// ============================================================================
// FIT SCORE
// ============================================================================

/// Mock fit scorer returning a fixed score.
#[derive(Debug)]
pub struct MockFitScorer {
    score: f64,
    requests: Mutex<Vec<ScoreRequest>>,
}

impl MockFitScorer {
    pub fn constant(score: f64) -> Self {
        Self {
            score,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ScoreRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl FitScorer for MockFitScorer {
    async fn score(&self, request: &ScoreRequest) -> EnrichResult<f64> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        Ok(self.score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_mock_model_default_and_canned() {
        let model = MockModelInvoker::new().with_response("hello", "world");
        assert_eq!(model.invoke("hello", "m").await.unwrap().text, "world");
        assert_eq!(model.invoke("Acme", "m").await.unwrap().text, "Result for: Acme");
        assert_eq!(model.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_model_failure_rule() {
        let model = MockModelInvoker::new().failing_on(
            "Beta",
            ProviderError::RequestFailed {
                provider: "mock".to_string(),
                status: 400,
                message: "bad request".to_string(),
            },
        );
        assert!(model.invoke("Analyze Beta", "m").await.is_err());
        assert!(model.invoke("Analyze Acme", "m").await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_enrichment_lookup() {
        let provider = MockEnrichmentProvider::new()
            .with_record("acme.io", serde_json::json!({"employees": 120}));
        let mut inputs = BTreeMap::new();
        inputs.insert("domain".to_string(), "acme.io".to_string());
        let request = EnrichmentRequest {
            provider: "clearbit".to_string(),
            inputs,
        };
        let record = provider.lookup(&request).await.unwrap();
        assert_eq!(record["employees"], 120);

        let missing = EnrichmentRequest {
            provider: "clearbit".to_string(),
            inputs: BTreeMap::new(),
        };
        assert!(provider.lookup(&missing).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_api_unknown_url_is_404() {
        let api = MockApiCaller::new().with_response("https://x.test/a", 200, "ok");
        let request = ApiRequest {
            method: enrich_core::HttpMethod::Get,
            url: "https://x.test/b".to_string(),
            headers: BTreeMap::new(),
            body: None,
        };
        assert_eq!(api.call(&request).await.unwrap().status, 404);
        assert_eq!(api.requests().len(), 1);
    }
}
