//! Configuration types
//!
//! Loaded from TOML. Every section has development defaults so a config file
//! only needs to name what it overrides; `validate()` runs after loading.

use crate::{ConfigError, EnrichError, EnrichResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Grid scheduling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GridConfig {
    /// Upper bound on in-flight computations during a run-for-all-rows
    pub max_concurrent_computations: usize,
    /// Deadline applied to every collaborator call
    pub collaborator_timeout_ms: u64,
    /// Re-run asynchronous dependents after a manual edit
    pub auto_rerun_dependents: bool,
    /// Maximum rows loaded into one grid
    pub row_limit: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            max_concurrent_computations: 5,
            collaborator_timeout_ms: 60_000,
            auto_rerun_dependents: false,
            row_limit: 500,
        }
    }
}

impl GridConfig {
    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }
}

/// OpenAI-compatible model endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ModelConfig {
    pub base_url: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub default_model: String,
    pub system_prompt: String,
    pub requests_per_minute: u32,
    pub max_tokens: i32,
    pub temperature: f32,
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a data enrichment tool. Your ONLY job is to \
return the requested data point or value. Return ONLY the answer, with no explanations, \
introductions or conversational filler. If the answer is unknown, return \"N/A\". \
Be factual and precise.";

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.together.xyz/v1".to_string(),
            api_key_env: "TOGETHER_API_KEY".to_string(),
            default_model: "moonshotai/Kimi-K2-Instruct".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            requests_per_minute: 600,
            max_tokens: 500,
            temperature: 0.7,
        }
    }
}

/// Retry policy for retryable collaborator failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 8_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff before retry number `attempt` (0-based), capped at `max_backoff_ms`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = (self.backoff_multiplier as f64).powi(attempt as i32);
        let ms = (self.initial_backoff_ms as f64 * factor).min(self.max_backoff_ms as f64);
        Duration::from_millis(ms.max(0.0) as u64)
    }
}

/// Model reply cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1_000,
            ttl_secs: 3_600,
        }
    }
}

/// Flat export settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ExportConfig {
    pub delimiter: char,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self { delimiter: ',' }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// Master configuration struct.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EnrichConfig {
    pub grid: GridConfig,
    pub model: ModelConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub export: ExportConfig,
    pub logging: LoggingConfig,
}

impl EnrichConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> EnrichResult<Self> {
        let config: EnrichConfig = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_path(path: &Path) -> EnrichResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> EnrichResult<()> {
        if self.grid.max_concurrent_computations == 0 {
            return Err(invalid(
                "grid.max_concurrent_computations",
                self.grid.max_concurrent_computations,
                "must be greater than 0",
            ));
        }

        if self.grid.collaborator_timeout_ms == 0 {
            return Err(invalid(
                "grid.collaborator_timeout_ms",
                self.grid.collaborator_timeout_ms,
                "must be greater than 0",
            ));
        }

        if self.grid.row_limit == 0 {
            return Err(invalid("grid.row_limit", self.grid.row_limit, "must be greater than 0"));
        }

        if self.model.base_url.trim().is_empty() {
            return Err(invalid("model.base_url", &self.model.base_url, "must not be empty"));
        }

        if self.model.default_model.trim().is_empty() {
            return Err(invalid(
                "model.default_model",
                &self.model.default_model,
                "must not be empty",
            ));
        }

        if self.model.requests_per_minute == 0 {
            return Err(invalid(
                "model.requests_per_minute",
                self.model.requests_per_minute,
                "must be greater than 0",
            ));
        }

        if self.model.max_tokens <= 0 {
            return Err(invalid("model.max_tokens", self.model.max_tokens, "must be greater than 0"));
        }

        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(invalid(
                "model.temperature",
                self.model.temperature,
                "must be between 0.0 and 2.0",
            ));
        }

        if self.retry.backoff_multiplier < 1.0 {
            return Err(invalid(
                "retry.backoff_multiplier",
                self.retry.backoff_multiplier,
                "must be at least 1.0",
            ));
        }

        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            return Err(invalid(
                "retry.max_backoff_ms",
                self.retry.max_backoff_ms,
                "must not be less than retry.initial_backoff_ms",
            ));
        }

        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(invalid(
                "cache.max_entries",
                self.cache.max_entries,
                "must be greater than 0 when the cache is enabled",
            ));
        }

        let d = self.export.delimiter;
        if !d.is_ascii() || d == '"' || d == '\n' || d == '\r' {
            return Err(invalid(
                "export.delimiter",
                d.escape_default(),
                "must be a single ASCII character other than a quote or newline",
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, value: impl std::fmt::Display, reason: &str) -> EnrichError {
    EnrichError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}
