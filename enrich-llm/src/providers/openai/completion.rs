//! Model invocation over the chat completions endpoint

use super::client::OpenAIClient;
use super::types::{CompletionRequest, CompletionResponse, Message};
use crate::providers::invalid_response;
use crate::{ModelCatalog, ModelInvoker, ModelReply};
use async_trait::async_trait;
use enrich_core::{EnrichResult, ModelConfig};

/// `ModelInvoker` backed by an OpenAI-compatible host.
#[derive(Debug)]
pub struct OpenAICompatibleModel {
    client: OpenAIClient,
    system_prompt: String,
    max_tokens: i32,
    temperature: f32,
}

impl OpenAICompatibleModel {
    /// Build from the `[model]` config section and a resolved API key.
    pub fn from_config(config: &ModelConfig, api_key: impl Into<String>) -> Self {
        Self {
            client: OpenAIClient::new(
                config.base_url.clone(),
                api_key,
                config.requests_per_minute,
            ),
            system_prompt: config.system_prompt.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    fn build_request(&self, prompt: &str, model_id: &str) -> CompletionRequest {
        let mut messages = Vec::with_capacity(2);
        if !self.system_prompt.trim().is_empty() {
            messages.push(Message::system(self.system_prompt.clone()));
        }
        messages.push(Message::user(prompt));

        CompletionRequest {
            // catalog keys resolve to the provider's model id
            model: ModelCatalog::find(model_id)
                .map(|m| m.id)
                .unwrap_or(model_id)
                .to_string(),
            messages,
            max_tokens: Some(self.max_tokens),
            temperature: Some(self.temperature),
        }
    }
}

#[async_trait]
impl ModelInvoker for OpenAICompatibleModel {
    async fn invoke(&self, prompt: &str, model_id: &str) -> EnrichResult<ModelReply> {
        let request = self.build_request(prompt, model_id);
        let response: CompletionResponse =
            self.client.request("chat/completions", request).await?;

        let text = response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .ok_or_else(|| invalid_response(self.client.provider(), "No completion in response"))?;

        let (prompt_tokens, completion_tokens) = match response.usage {
            Some(usage) => (
                usage.prompt_tokens,
                usage
                    .completion_tokens
                    .unwrap_or(usage.total_tokens - usage.prompt_tokens),
            ),
            None => (0, 0),
        };

        Ok(ModelReply {
            text,
            prompt_tokens,
            completion_tokens,
        })
    }

    fn provider_name(&self) -> &str {
        self.client.provider()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_carries_system_prompt_and_limits() {
        let config = ModelConfig::default();
        let model = OpenAICompatibleModel::from_config(&config, "key");
        let request = model.build_request("Analyze Acme", "deepseek-ai/DeepSeek-V3");

        assert_eq!(request.model, "deepseek-ai/DeepSeek-V3");
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, "system");
        assert_eq!(request.messages[1].content, "Analyze Acme");
        assert_eq!(request.max_tokens, Some(500));
        assert_eq!(model.provider_name(), "api.together.xyz");
    }

    #[test]
    fn test_blank_system_prompt_is_omitted() {
        let config = ModelConfig {
            system_prompt: "  ".to_string(),
            ..ModelConfig::default()
        };
        let model = OpenAICompatibleModel::from_config(&config, "key");
        let request = model.build_request("hi", "m");
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, "user");
    }

    #[test]
    fn test_catalog_key_resolves_to_model_id() {
        let model = OpenAICompatibleModel::from_config(&ModelConfig::default(), "key");
        let request = model.build_request("hi", "kimi-k2");
        assert_eq!(request.model, "moonshotai/Kimi-K2-Instruct");
    }
}
