//! Column computation dispatcher.
//!
//! Maps a column's configuration plus a snapshot of its row onto the right
//! collaborator. Local kinds (formula, waterfall, merge) resolve on the
//! spot; collaborator kinds hand back a boxed future that the caller drives.
//! Every collaborator call runs under the configured timeout and retry
//! policy.

use enrich_core::{
    formula, interpolate, AiConfig, CampaignId, CellValue, Column, ColumnConfig, ColumnId,
    EnrichConfig, EnrichError, EnrichResult, EnrichmentConfig, ExternalApiConfig,
    FitScoreConfig, GridConfig, MergeConfig, OutputFormat, ProviderError, RetryConfig, RowId,
    RowValues, WaterfallConfig,
};
use enrich_llm::{
    with_retry, ApiRequest, CostTracker, EnrichmentRequest, ModelReply, ProviderRegistry,
    ScoreRequest,
};
use futures_util::future::BoxFuture;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// ROW CONTEXT
// ============================================================================

/// What a computation can see of its row, captured when it is requested.
#[derive(Debug, Clone)]
pub struct RowContext {
    pub row_id: RowId,
    /// Ready values by placeholder key, with the standard aliases filled in
    pub values: RowValues,
    /// Every static field by key, blank when unset
    pub static_values: RowValues,
    /// Ready values by column id
    pub ready: HashMap<ColumnId, CellValue>,
    /// Placeholder key of every column
    pub keys: HashMap<ColumnId, String>,
    /// Ready outputs of the row's AI columns, in display order
    pub ai_outputs: Vec<String>,
    /// The workspace's campaign
    pub campaign_id: Option<CampaignId>,
}

impl RowContext {
    pub fn empty(row_id: RowId) -> Self {
        Self {
            row_id,
            values: RowValues::new(),
            static_values: RowValues::new(),
            ready: HashMap::new(),
            keys: HashMap::new(),
            ai_outputs: Vec::new(),
            campaign_id: None,
        }
    }

    fn ready_value(&self, column_id: &ColumnId) -> Option<&CellValue> {
        self.ready.get(column_id)
    }
}

// ============================================================================
// COMPUTATION
// ============================================================================

/// A finished collaborator computation.
#[derive(Debug, Clone, PartialEq)]
pub struct Computed {
    pub value: CellValue,
    /// Model tokens spent, zero for non-model kinds
    pub tokens_used: i64,
}

impl Computed {
    fn value(value: CellValue) -> Self {
        Self {
            value,
            tokens_used: 0,
        }
    }
}

pub type PendingFuture = BoxFuture<'static, EnrichResult<Computed>>;

/// How a cell's computation proceeds.
pub enum Computation {
    /// Static fields are never computed.
    Unchanged,
    /// Resolved without suspending.
    Immediate(EnrichResult<CellValue>),
    /// Waiting on a collaborator.
    Deferred(PendingFuture),
}

impl std::fmt::Debug for Computation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Computation::Unchanged => f.write_str("Unchanged"),
            Computation::Immediate(result) => f.debug_tuple("Immediate").field(result).finish(),
            Computation::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Evaluate a kind that needs nothing beyond the row itself.
/// Returns `None` for kinds that go through a collaborator.
pub fn compute_local(config: &ColumnConfig, ctx: &RowContext) -> Option<EnrichResult<CellValue>> {
    match config {
        ColumnConfig::Formula(c) => {
            Some(formula::evaluate_str(&c.expression, &ctx.values).map_err(EnrichError::from))
        }
        ColumnConfig::Waterfall(c) => Some(Ok(waterfall(c, ctx))),
        ColumnConfig::Merge(c) => Some(Ok(merge(c, ctx))),
        ColumnConfig::StaticField
        | ColumnConfig::Enrichment(_)
        | ColumnConfig::AiGenerated(_)
        | ColumnConfig::ExternalApi(_)
        | ColumnConfig::FitScore(_) => None,
    }
}

/// First non-blank ready source value, empty text when none.
fn waterfall(config: &WaterfallConfig, ctx: &RowContext) -> CellValue {
    config
        .sources
        .iter()
        .filter_map(|id| ctx.ready_value(id))
        .find(|value| !value.is_blank())
        .cloned()
        .unwrap_or_else(|| CellValue::text(""))
}

fn merge(config: &MergeConfig, ctx: &RowContext) -> CellValue {
    let parts: Vec<String> = config
        .sources
        .iter()
        .filter_map(|id| ctx.ready_value(id))
        .filter(|value| !(config.skip_blank && value.is_blank()))
        .map(CellValue::display)
        .collect();
    CellValue::Text(parts.join(&config.separator))
}

/// JSON from a collaborator as a cell value. Scalars unwrap, null is blank.
pub fn json_to_cell(value: serde_json::Value) -> CellValue {
    match value {
        serde_json::Value::String(s) => CellValue::Text(s),
        serde_json::Value::Number(n) => match n.as_f64() {
            Some(f) => CellValue::Number(f),
            None => CellValue::Text(n.to_string()),
        },
        serde_json::Value::Null => CellValue::text(""),
        serde_json::Value::Bool(b) => CellValue::Text(b.to_string()),
        other => CellValue::Json(other),
    }
}

/// Model text with a surrounding markdown code fence removed.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    match rest.find('\n') {
        Some(newline) => rest[newline + 1..].trim(),
        None => rest.trim(),
    }
}

fn invalid(provider: &str, reason: impl Into<String>) -> EnrichError {
    EnrichError::Provider(ProviderError::InvalidResponse {
        provider: provider.to_string(),
        reason: reason.into(),
    })
}

/// Run `op` under a per-attempt deadline and the retry policy.
async fn guarded<T, F, Fut>(
    timeout: Duration,
    retry: &RetryConfig,
    provider: &str,
    mut op: F,
) -> EnrichResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EnrichResult<T>>,
{
    with_retry(retry, || {
        let attempt = op();
        let provider = provider.to_string();
        async move {
            match tokio::time::timeout(timeout, attempt).await {
                Ok(result) => result,
                Err(_) => Err(EnrichError::Provider(ProviderError::TimedOut {
                    provider,
                    timeout_ms: timeout.as_millis() as u64,
                })),
            }
        }
    })
    .await
}

// ============================================================================
// DISPATCHER
// ============================================================================

/// Routes column computations to collaborators.
pub struct Dispatcher {
    registry: ProviderRegistry,
    timeout: Duration,
    retry: RetryConfig,
    cost: Arc<CostTracker>,
}

impl Dispatcher {
    pub fn new(registry: ProviderRegistry, grid: &GridConfig, retry: RetryConfig) -> Self {
        Self {
            registry,
            timeout: grid.collaborator_timeout(),
            retry,
            cost: Arc::new(CostTracker::new()),
        }
    }

    pub fn from_config(registry: ProviderRegistry, config: &EnrichConfig) -> Self {
        Self::new(registry, &config.grid, config.retry.clone())
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Token usage across every model call made through this dispatcher.
    pub fn cost(&self) -> &Arc<CostTracker> {
        &self.cost
    }

    /// Start computing `column` for the row captured in `ctx`.
    pub fn compute(&self, column: &Column, ctx: &RowContext) -> Computation {
        if let Some(result) = compute_local(column.config(), ctx) {
            return Computation::Immediate(result);
        }
        match column.config() {
            ColumnConfig::StaticField => Computation::Unchanged,
            ColumnConfig::AiGenerated(c) => Computation::Deferred(self.ai(c, ctx)),
            ColumnConfig::Enrichment(c) => Computation::Deferred(self.enrichment(c, ctx)),
            ColumnConfig::ExternalApi(c) => Computation::Deferred(self.external_api(c, ctx)),
            ColumnConfig::FitScore(c) => Computation::Deferred(self.fit_score(c, ctx)),
            // resolved by compute_local above
            ColumnConfig::Formula(_) | ColumnConfig::Waterfall(_) | ColumnConfig::Merge(_) => {
                Computation::Unchanged
            }
        }
    }

    /// Invoke the model once with an already interpolated prompt.
    pub async fn invoke_model(&self, prompt: &str, model_id: &str) -> EnrichResult<ModelReply> {
        let model = self.registry.model()?;
        let reply = guarded(self.timeout, &self.retry, model.provider_name(), || {
            model.invoke(prompt, model_id)
        })
        .await?;
        self.cost
            .record_completion(reply.prompt_tokens, reply.completion_tokens);
        Ok(reply)
    }

    fn ai(&self, config: &AiConfig, ctx: &RowContext) -> PendingFuture {
        let model = self.registry.model();
        let prompt = interpolate(&config.prompt_template, &ctx.values);
        let model_id = config.model_id.clone();
        let output = config.output;
        let (timeout, retry, cost) = (self.timeout, self.retry.clone(), self.cost.clone());

        Box::pin(async move {
            let model = model?;
            let provider = model.provider_name().to_string();
            let reply = guarded(timeout, &retry, &provider, || model.invoke(&prompt, &model_id))
                .await?;
            cost.record_completion(reply.prompt_tokens, reply.completion_tokens);
            let tokens_used = reply.total_tokens();

            let value = match output {
                OutputFormat::Text => CellValue::Text(reply.text),
                OutputFormat::Json => {
                    let parsed: serde_json::Value =
                        serde_json::from_str(strip_code_fence(&reply.text)).map_err(|e| {
                            invalid(&provider, format!("model output is not valid JSON: {}", e))
                        })?;
                    CellValue::Json(parsed)
                }
            };
            Ok(Computed { value, tokens_used })
        })
    }

    fn enrichment(&self, config: &EnrichmentConfig, ctx: &RowContext) -> PendingFuture {
        let provider = self.registry.enrichment();
        let inputs: BTreeMap<String, String> = config
            .input_columns
            .iter()
            .filter_map(|id| {
                let value = ctx.ready_value(id).filter(|value| !value.is_blank())?;
                let key = ctx.keys.get(id).cloned().unwrap_or_else(|| id.to_string());
                Some((key, value.display()))
            })
            .collect();
        let request = EnrichmentRequest {
            provider: config.provider.clone(),
            inputs,
        };
        let field = config.field.clone();
        let (timeout, retry) = (self.timeout, self.retry.clone());

        Box::pin(async move {
            let provider = provider?;
            if request.inputs.is_empty() {
                return Err(invalid(&request.provider, "no input values on this row"));
            }
            let record = guarded(timeout, &retry, &request.provider, || {
                provider.lookup(&request)
            })
            .await?;
            let value = match field {
                Some(field) => {
                    let picked = if field.starts_with('/') {
                        record.pointer(&field).cloned()
                    } else {
                        record.get(&field).cloned()
                    };
                    json_to_cell(picked.unwrap_or(serde_json::Value::Null))
                }
                None => json_to_cell(record),
            };
            Ok(Computed::value(value))
        })
    }

    fn external_api(&self, config: &ExternalApiConfig, ctx: &RowContext) -> PendingFuture {
        let caller = self.registry.external_api();
        let request = ApiRequest {
            method: config.method,
            url: interpolate(&config.url_template, &ctx.values),
            headers: config
                .headers
                .iter()
                .map(|(name, template)| (name.clone(), interpolate(template, &ctx.values)))
                .collect(),
            body: config
                .body_template
                .as_ref()
                .map(|template| interpolate(template, &ctx.values)),
        };
        let pointer = config.response_pointer.clone();
        let (timeout, retry) = (self.timeout, self.retry.clone());

        Box::pin(async move {
            let caller = caller?;
            let response = guarded(timeout, &retry, "http", || caller.call(&request)).await?;
            if !response.is_success() {
                let snippet: String = response.body.chars().take(200).collect();
                return Err(EnrichError::Provider(ProviderError::RequestFailed {
                    provider: "http".to_string(),
                    status: response.status as i32,
                    message: snippet,
                }));
            }
            let value = match pointer {
                Some(pointer) => {
                    let body: serde_json::Value = serde_json::from_str(&response.body)
                        .map_err(|e| invalid("http", format!("response is not JSON: {}", e)))?;
                    let picked = body.pointer(&pointer).cloned().ok_or_else(|| {
                        invalid("http", format!("response has no value at {}", pointer))
                    })?;
                    json_to_cell(picked)
                }
                None => CellValue::Text(response.body.trim().to_string()),
            };
            Ok(Computed::value(value))
        })
    }

    fn fit_score(&self, config: &FitScoreConfig, ctx: &RowContext) -> PendingFuture {
        let scorer = self.registry.fit_scorer();
        let request = ScoreRequest {
            values: ctx.static_values.clone(),
            ai_outputs: ctx.ai_outputs.clone(),
            campaign_id: config.campaign_id.or(ctx.campaign_id),
        };
        let (timeout, retry) = (self.timeout, self.retry.clone());

        Box::pin(async move {
            let scorer = scorer?;
            let score = guarded(timeout, &retry, "fit_score", || scorer.score(&request)).await?;
            if !score.is_finite() || !(0.0..=100.0).contains(&score) {
                return Err(invalid(
                    "fit_score",
                    format!("score {} is outside 0..=100", score),
                ));
            }
            Ok(Computed::value(CellValue::Number(score)))
        })
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
