//! OpenAI-compatible generator.
//!
//! Supports OpenAI, Azure OpenAI, Ollama, vLLM, LM Studio, and any
//! endpoint that follows the OpenAI chat completions API format.

use crate::config::{GeneratorConfig, RetryConfig};
use crate::error::GenerationError;
use crate::generator::Generator;
use crate::providers::with_retry;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible chat-completions generator.
pub struct OpenAiGenerator {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
    context_window: usize,
    timeout_secs: u64,
    retry: RetryConfig,
}

impl OpenAiGenerator {
    /// Create a new generator from configuration.
    ///
    /// Reads the API key from `config.api_key` or the environment variable named
    /// by `config.api_key_env`. Local endpoints may run without a key.
    pub fn new(config: &GeneratorConfig) -> Result<Self, GenerationError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let is_local = base_url.contains("localhost") || base_url.contains("127.0.0.1");

        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(&config.api_key_env).ok())
            .or_else(|| {
                if is_local {
                    debug!("No API key set for local provider; using dummy bearer token");
                    Some("local".to_string())
                } else {
                    None
                }
            })
            .ok_or_else(|| GenerationError::AuthFailed {
                provider: format!("OpenAI-compatible: env var '{}' not set", config.api_key_env),
            })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GenerationError::Connection {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url,
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            context_window: config.context_window,
            timeout_secs: config.timeout_secs,
            retry: config.retry.clone(),
        })
    }

    fn request_body(&self, prompt: &str) -> Value {
        json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": false,
        })
    }

    /// Extract the first choice's text from a chat-completions response.
    fn parse_response(body: &Value) -> Result<String, GenerationError> {
        let choice = body
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| GenerationError::ResponseParse {
                message: "No choices in response".to_string(),
            })?;

        choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .or_else(|| choice.get("text").and_then(|t| t.as_str()))
            .map(|s| s.trim().to_string())
            .ok_or_else(|| GenerationError::ResponseParse {
                message: "No text content in choice".to_string(),
            })
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> GenerationError {
        match status.as_u16() {
            401 | 403 => {
                debug!(body = %body, "Authentication failed ({})", status);
                GenerationError::AuthFailed {
                    provider: "OpenAI-compatible".to_string(),
                }
            }
            429 => {
                // "Rate limit reached ... Please try again in 20s."
                let retry_secs = serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|v| {
                        v.get("error")?
                            .get("message")?
                            .as_str()
                            .map(|s| s.to_string())
                    })
                    .and_then(|msg| {
                        msg.split("in ")
                            .last()
                            .map(|s| s.trim_end_matches('.').trim_end_matches('s').to_string())
                            .and_then(|s| s.parse::<u64>().ok())
                    })
                    .unwrap_or(5);
                GenerationError::RateLimited {
                    retry_after_secs: retry_secs,
                }
            }
            status if status >= 500 => GenerationError::Connection {
                message: format!("Server error ({}): {}", status, body),
            },
            _ => GenerationError::ApiRequest {
                message: format!("HTTP {}: {}", status, body),
            },
        }
    }

    async fn complete_once(&self, prompt: &str) -> Result<String, GenerationError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(url = %url, model = %self.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout {
                        timeout_secs: self.timeout_secs,
                    }
                } else {
                    GenerationError::Connection {
                        message: format!("Request failed: {}", e),
                    }
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GenerationError::ApiRequest {
                message: format!("Failed to read response body: {}", e),
            })?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &body));
        }

        let json: Value = serde_json::from_str(&body).map_err(|e| GenerationError::ResponseParse {
            message: format!("Invalid JSON: {}", e),
        })?;
        Self::parse_response(&json)
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        with_retry(&self.retry, || self.complete_once(prompt)).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn context_window(&self) -> Option<usize> {
        Some(self.context_window)
    }

    fn max_output_tokens(&self) -> usize {
        self.max_tokens
    }
}
