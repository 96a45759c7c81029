//! ENRICH LLM - Collaborator Layer
//!
//! Provider-agnostic traits for everything a computed column talks to:
//! model invocation, enrichment lookups, external HTTP APIs and fit
//! scoring. Concrete providers are registered explicitly in a
//! `ProviderRegistry`; nothing is auto-discovered.

mod cache;
mod catalog;
mod cost;
pub mod mock;
pub mod providers;
mod retry;
mod scoring;

pub use cache::{CachedModelInvoker, PromptCache};
pub use catalog::{ModelCatalog, ModelInfo};
pub use cost::CostTracker;
pub use mock::{MockApiCaller, MockEnrichmentProvider, MockFitScorer, MockModelInvoker};
pub use providers::{OpenAIClient, OpenAICompatibleModel, ReqwestApiCaller};
pub use retry::with_retry;
pub use scoring::{CampaignProfile, CompanySizeBand, FitBreakdown, HeuristicFitScorer};

use async_trait::async_trait;
use enrich_core::{
    CampaignId, EnrichError, EnrichResult, HttpMethod, ProviderError, RowValues,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// ============================================================================
// MODEL INVOCATION
// ============================================================================

/// Text returned by a model plus its token usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelReply {
    pub text: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
}

impl ModelReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }

    pub fn total_tokens(&self) -> i64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Hosted model invocation: `(prompt, model id) -> text | failure`.
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Run a single prompt against `model_id`.
    ///
    /// # Returns
    /// * `Ok(ModelReply)` - The model's answer
    /// * `Err(EnrichError::Provider)` - If the call failed
    async fn invoke(&self, prompt: &str, model_id: &str) -> EnrichResult<ModelReply>;

    /// Name used in logs and error messages.
    fn provider_name(&self) -> &str;
}

// ============================================================================
// ENRICHMENT
// ============================================================================

/// Parameters of an enrichment lookup, derived from a row's static fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentRequest {
    pub provider: String,
    /// Input values by placeholder key (e.g. `domain -> acme.io`)
    pub inputs: BTreeMap<String, String>,
}

/// Lookup against an enrichment data source. Retries, if any, are the
/// provider's concern.
#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    /// Fetch the record for the request's inputs.
    async fn lookup(&self, request: &EnrichmentRequest) -> EnrichResult<serde_json::Value>;
}

// ============================================================================
// EXTERNAL API
// ============================================================================

/// Fully interpolated HTTP call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

/// Raw HTTP response. Status interpretation is left to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Configurable HTTP collaborator.
#[async_trait]
pub trait ExternalApiCaller: Send + Sync {
    /// Perform the call. Transport failures are errors; any HTTP status is
    /// returned as a response.
    async fn call(&self, request: &ApiRequest) -> EnrichResult<ApiResponse>;
}

// ============================================================================
// FIT SCORING
// ============================================================================

/// Input to a fit scorer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoreRequest {
    /// The row's static field values
    pub values: RowValues,
    /// Ready outputs of the row's AI columns
    pub ai_outputs: Vec<String>,
    pub campaign_id: Option<CampaignId>,
}

/// Produces a suitability score, expected in `0..=100`.
#[async_trait]
pub trait FitScorer: Send + Sync {
    async fn score(&self, request: &ScoreRequest) -> EnrichResult<f64>;
}

// ============================================================================
// PROVIDER REGISTRY
// ============================================================================

/// Registry for collaborators.
/// Providers must be explicitly registered - no auto-discovery.
///
/// # Example
/// ```ignore
/// let mut registry = ProviderRegistry::new();
/// registry.register_model(Arc::new(OpenAICompatibleModel::from_config(&config.model, key)));
/// let reply = registry.model()?.invoke("Analyze Acme", "moonshotai/Kimi-K2-Instruct").await?;
/// ```
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    model: Option<Arc<dyn ModelInvoker>>,
    enrichment: Option<Arc<dyn EnrichmentProvider>>,
    external_api: Option<Arc<dyn ExternalApiCaller>>,
    fit_scorer: Option<Arc<dyn FitScorer>>,
}

fn not_configured(capability: &str) -> EnrichError {
    EnrichError::Provider(ProviderError::ProviderNotConfigured {
        capability: capability.to_string(),
    })
}

impl ProviderRegistry {
    /// Create a new empty provider registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the model invoker, replacing any previous one.
    pub fn register_model(&mut self, provider: Arc<dyn ModelInvoker>) {
        self.model = Some(provider);
    }

    /// Register the enrichment provider, replacing any previous one.
    pub fn register_enrichment(&mut self, provider: Arc<dyn EnrichmentProvider>) {
        self.enrichment = Some(provider);
    }

    /// Register the external API caller, replacing any previous one.
    pub fn register_external_api(&mut self, provider: Arc<dyn ExternalApiCaller>) {
        self.external_api = Some(provider);
    }

    /// Register the fit scorer, replacing any previous one.
    pub fn register_fit_scorer(&mut self, provider: Arc<dyn FitScorer>) {
        self.fit_scorer = Some(provider);
    }

    /// Get the registered model invoker.
    ///
    /// # Returns
    /// * `Err(EnrichError::Provider(ProviderError::ProviderNotConfigured))` - If none registered
    pub fn model(&self) -> EnrichResult<Arc<dyn ModelInvoker>> {
        self.model.clone().ok_or_else(|| not_configured("model"))
    }

    pub fn enrichment(&self) -> EnrichResult<Arc<dyn EnrichmentProvider>> {
        self.enrichment
            .clone()
            .ok_or_else(|| not_configured("enrichment"))
    }

    pub fn external_api(&self) -> EnrichResult<Arc<dyn ExternalApiCaller>> {
        self.external_api
            .clone()
            .ok_or_else(|| not_configured("external_api"))
    }

    pub fn fit_scorer(&self) -> EnrichResult<Arc<dyn FitScorer>> {
        self.fit_scorer
            .clone()
            .ok_or_else(|| not_configured("fit_score"))
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    pub fn has_enrichment(&self) -> bool {
        self.enrichment.is_some()
    }

    pub fn has_external_api(&self) -> bool {
        self.external_api.is_some()
    }

    pub fn has_fit_scorer(&self) -> bool {
        self.fit_scorer.is_some()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("model", &self.model.as_ref().map(|m| m.provider_name().to_string()))
            .field("enrichment", &self.enrichment.is_some())
            .field("external_api", &self.external_api.is_some())
            .field("fit_scorer", &self.fit_scorer.is_some())
            .finish()
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
