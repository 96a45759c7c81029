//! Prompt-keyed reply cache.

use crate::{ModelInvoker, ModelReply};
use async_trait::async_trait;
use enrich_core::{CacheConfig, EnrichResult};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

struct CachedReply {
    text: String,
    inserted_at: Instant,
}

/// Cache for model replies keyed by `(model id, prompt)`.
/// Thread-safe via RwLock. Entries expire after `ttl`; when full, the
/// oldest entry is evicted.
pub struct PromptCache {
    cache: RwLock<HashMap<[u8; 32], CachedReply>>,
    max_size: usize,
    ttl: Duration,
}

impl PromptCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            max_size,
            ttl,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_entries, Duration::from_secs(config.ttl_secs))
    }

    /// SHA-256 over the model id and prompt.
    pub fn key(model_id: &str, prompt: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(model_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(prompt.as_bytes());
        hasher.finalize().into()
    }

    /// Get a cached reply if present and not expired.
    pub fn get(&self, model_id: &str, prompt: &str) -> Option<String> {
        let key = Self::key(model_id, prompt);
        let cache = self.cache.read().ok()?;
        let entry = cache.get(&key)?;
        if entry.inserted_at.elapsed() >= self.ttl {
            return None;
        }
        Some(entry.text.clone())
    }

    pub fn insert(&self, model_id: &str, prompt: &str, text: impl Into<String>) {
        if self.max_size == 0 {
            return;
        }
        let key = Self::key(model_id, prompt);
        if let Ok(mut cache) = self.cache.write() {
            let ttl = self.ttl;
            cache.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
            if cache.len() >= self.max_size && !cache.contains_key(&key) {
                let oldest = cache
                    .iter()
                    .min_by_key(|(_, entry)| entry.inserted_at)
                    .map(|(k, _)| *k);
                if let Some(oldest) = oldest {
                    cache.remove(&oldest);
                }
            }
            cache.insert(
                key,
                CachedReply {
                    text: text.into(),
                    inserted_at: Instant::now(),
                },
            );
        }
    }

    /// Clear all cached entries.
    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for PromptCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptCache")
            .field("max_size", &self.max_size)
            .field("ttl", &self.ttl)
            .field("current_size", &self.len())
            .finish()
    }
}

/// `ModelInvoker` decorator answering repeated prompts from a `PromptCache`.
/// Cached replies report zero tokens.
pub struct CachedModelInvoker {
    inner: Arc<dyn ModelInvoker>,
    cache: Arc<PromptCache>,
}

impl CachedModelInvoker {
    pub fn new(inner: Arc<dyn ModelInvoker>, cache: Arc<PromptCache>) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &Arc<PromptCache> {
        &self.cache
    }
}

#[async_trait]
impl ModelInvoker for CachedModelInvoker {
    async fn invoke(&self, prompt: &str, model_id: &str) -> EnrichResult<ModelReply> {
        if let Some(text) = self.cache.get(model_id, prompt) {
            tracing::debug!(model_id, "prompt cache hit");
            return Ok(ModelReply::text(text));
        }
        let reply = self.inner.invoke(prompt, model_id).await?;
        self.cache.insert(model_id, prompt, reply.text.clone());
        Ok(reply)
    }

    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }
}
