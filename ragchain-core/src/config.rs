//! Configuration system for Ragchain.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from `~/.config/ragchain/config.toml` and/or `.ragchain/config.toml`
//! in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::combine::{CombineStrategy, OverflowPolicy};
use crate::error::ChainError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub retriever: RetrieverSettings,
}

/// Generator (language model) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Provider name. Only OpenAI-compatible endpoints ship with the library.
    pub provider: String,
    /// Model identifier (e.g., "gpt-4o-mini", "llama3.1:8b").
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Inline API key; takes precedence over `api_key_env`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Optional base URL override for the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Sampling temperature.
    pub temperature: f32,
    /// Context window size for the model.
    pub context_window: usize,
    /// Per-request timeout.
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            api_key: None,
            base_url: None,
            max_tokens: 1024,
            temperature: 0.0,
            context_window: 128_000,
            timeout_secs: 60,
            retry: RetryConfig::default(),
        }
    }
}

impl GeneratorConfig {
    /// Validate this generator config and return any warnings.
    ///
    /// Returns an empty Vec if the config is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.max_tokens >= self.context_window {
            warnings.push(format!(
                "max_tokens ({}) >= context_window ({}); no room is left for the prompt",
                self.max_tokens, self.context_window
            ));
        }
        if self.temperature < 0.0 || self.temperature > 2.0 {
            warnings.push(format!(
                "temperature ({}) is outside the typical range 0.0-2.0",
                self.temperature
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            warnings.push(format!(
                "retry.backoff_multiplier ({}) < 1.0 shrinks the backoff on each attempt",
                self.retry.backoff_multiplier
            ));
        }
        warnings
    }
}

/// Retry policy for transient generator failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Pipeline construction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// `stuff_documents_chain` or `map_reduce_documents_chain`.
    pub chain_type: String,
    /// Input key for the question. Defaults per pipeline variant when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_key: Option<String>,
    pub output_key: String,
    pub return_source_documents: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_generator_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qa_template: Option<String>,
    /// Upper bound on concurrent map calls. Unset means all at once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_concurrency: Option<usize>,
    /// What the stuff strategy does when the prompt exceeds the limit.
    pub overflow: OverflowPolicy,
    /// Explicit prompt token limit for the stuff strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_context_tokens: Option<usize>,
    /// Offer the chat history to the answer prompt as well as the rewrite prompt.
    pub history_in_answer: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            chain_type: CombineStrategy::Stuff.as_str().to_string(),
            input_key: None,
            output_key: "result".to_string(),
            return_source_documents: false,
            question_generator_template: None,
            qa_template: None,
            map_concurrency: None,
            overflow: OverflowPolicy::Error,
            max_context_tokens: None,
            history_in_answer: true,
        }
    }
}

impl PipelineSettings {
    /// Resolve the configured chain type, failing on unknown values.
    pub fn strategy(&self) -> Result<CombineStrategy, ChainError> {
        self.chain_type.parse()
    }
}

/// Settings for the bundled in-memory retriever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieverSettings {
    pub top_k: usize,
    pub min_score: f32,
    pub dimensions: usize,
}

impl Default for RetrieverSettings {
    fn default() -> Self {
        Self {
            top_k: 4,
            min_score: 0.05,
            dimensions: 512,
        }
    }
}

/// Load configuration from files, environment, and optional overrides.
///
/// `overrides` is a partial document such as `{"retriever": {"top_k": 2}}`:
/// only the keys it names replace the merged values, everything else keeps
/// what the files and environment set.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&serde_json::Value>,
) -> Result<RagConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(RagConfig::default()));

    // User-level config
    if let Some(config_dir) = directories::ProjectDirs::from("dev", "ragchain", "ragchain") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = ws.join(".ragchain").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Environment variables (RAGCHAIN_GENERATOR__MODEL, RAGCHAIN_PIPELINE__CHAIN_TYPE, etc.)
    figment = figment.merge(Env::prefixed("RAGCHAIN_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Check whether any configuration file exists (user-level or workspace-level).
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if let Some(config_dir) = directories::ProjectDirs::from("dev", "ragchain", "ragchain")
        && config_dir.config_dir().join("config.toml").exists()
    {
        return true;
    }

    workspace.is_some_and(|ws| ws.join(".ragchain").join("config.toml").exists())
}
