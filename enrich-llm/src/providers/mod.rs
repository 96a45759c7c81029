//! Concrete collaborator implementations
//!
//! `openai` speaks the OpenAI-compatible chat completion protocol used by
//! Together and similar hosts; `http` backs external API columns.

pub mod http;
pub mod openai;

pub use http::ReqwestApiCaller;
pub use openai::{OpenAIClient, OpenAICompatibleModel};

use enrich_core::{EnrichError, ProviderError};

pub(crate) fn request_failed(
    provider: &str,
    status: i32,
    message: impl Into<String>,
) -> EnrichError {
    EnrichError::Provider(ProviderError::RequestFailed {
        provider: provider.to_string(),
        status,
        message: message.into(),
    })
}

pub(crate) fn rate_limited(provider: &str, retry_after_ms: i64) -> EnrichError {
    EnrichError::Provider(ProviderError::RateLimited {
        provider: provider.to_string(),
        retry_after_ms,
    })
}

pub(crate) fn invalid_response(provider: &str, reason: impl Into<String>) -> EnrichError {
    EnrichError::Provider(ProviderError::InvalidResponse {
        provider: provider.to_string(),
        reason: reason.into(),
    })
}
