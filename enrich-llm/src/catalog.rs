//! Hosted models offered to AI columns.

use serde::Serialize;

/// One selectable model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub key: &'static str,
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub max_tokens: u32,
    pub context_window: u32,
    pub cost_per_1k_tokens: f64,
    pub recommended: bool,
}

const MODELS: &[ModelInfo] = &[
    ModelInfo {
        key: "kimi-k2",
        id: "moonshotai/Kimi-K2-Instruct",
        name: "Kimi K2",
        description: "Best for structured data extraction",
        max_tokens: 4096,
        context_window: 128_000,
        cost_per_1k_tokens: 0.001,
        recommended: true,
    },
    ModelInfo {
        key: "llama-3.3-70b",
        id: "meta-llama/Llama-3.3-70B-Instruct-Turbo",
        name: "Llama 3.3 70B",
        description: "Fast general-purpose analysis",
        max_tokens: 4096,
        context_window: 128_000,
        cost_per_1k_tokens: 0.0008,
        recommended: false,
    },
    ModelInfo {
        key: "qwen-2.5-72b",
        id: "Qwen/Qwen2.5-72B-Instruct-Turbo",
        name: "Qwen 2.5 72B",
        description: "Strong reasoning and multilingual output",
        max_tokens: 4096,
        context_window: 32_768,
        cost_per_1k_tokens: 0.0012,
        recommended: false,
    },
    ModelInfo {
        key: "deepseek-v3",
        id: "deepseek-ai/DeepSeek-V3",
        name: "DeepSeek V3",
        description: "Long-form research and summaries",
        max_tokens: 8192,
        context_window: 64_000,
        cost_per_1k_tokens: 0.0009,
        recommended: false,
    },
];

/// Static catalog of the models a workspace can pick from.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelCatalog;

impl ModelCatalog {
    pub fn all() -> &'static [ModelInfo] {
        MODELS
    }

    /// Find a model by catalog key or provider id.
    pub fn find(key_or_id: &str) -> Option<&'static ModelInfo> {
        MODELS
            .iter()
            .find(|m| m.key == key_or_id || m.id == key_or_id)
    }

    pub fn contains(key_or_id: &str) -> bool {
        Self::find(key_or_id).is_some()
    }

    pub fn recommended() -> &'static ModelInfo {
        MODELS.iter().find(|m| m.recommended).unwrap_or(&MODELS[0])
    }

    /// Estimated dollar cost of `tokens`. Unknown models are priced like
    /// the recommended one.
    pub fn estimate_cost(key_or_id: &str, tokens: i64) -> f64 {
        let model = Self::find(key_or_id).unwrap_or_else(Self::recommended);
        (tokens.max(0) as f64 / 1000.0) * model.cost_per_1k_tokens
    }
}
