//! The generator capability: a filled prompt in, generated text out.
//!
//! Concrete language-model clients live in [`crate::providers`]. This module
//! holds the trait, token estimation, and the mock used throughout the tests.

use crate::error::GenerationError;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Trait for text generation backends.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate a single completion for the given prompt.
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;

    /// Return the model name.
    fn model_name(&self) -> &str;

    /// Total input + output tokens the model accepts, if known.
    fn context_window(&self) -> Option<usize> {
        None
    }

    /// Tokens reserved for the completion, subtracted from the context window.
    fn max_output_tokens(&self) -> usize {
        0
    }

    /// Largest prompt this generator will accept, if it advertises a limit.
    fn max_input_tokens(&self) -> Option<usize> {
        self.context_window()
            .map(|w| w.saturating_sub(self.max_output_tokens()))
    }
}

/// Token counter using tiktoken-rs for BPE tokenization.
///
/// Falls back to four characters per token when no encoding can be loaded.
pub struct TokenCounter {
    bpe: Option<tiktoken_rs::CoreBPE>,
}

impl TokenCounter {
    /// Create a token counter for the given model.
    /// Falls back to cl100k_base if the model isn't recognized.
    pub fn for_model(model: &str) -> Self {
        let bpe = tiktoken_rs::get_bpe_from_model(model)
            .or_else(|_| tiktoken_rs::cl100k_base())
            .ok();
        if bpe.is_none() {
            debug!(model, "No BPE available; using character estimate");
        }
        Self { bpe }
    }

    /// Count the number of tokens in a string.
    pub fn count(&self, text: &str) -> usize {
        match &self.bpe {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => text.len().div_ceil(4),
        }
    }
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter")
            .field("bpe", &self.bpe.is_some())
            .finish()
    }
}

/// A mock generator for testing.
///
/// Returns queued responses in order, then falls back to a fixed default.
/// Every prompt is recorded. Responses, delays and failures can also be keyed
/// by a substring of the prompt, which is how tests steer concurrent calls.
pub struct MockGenerator {
    model: String,
    context_window: Option<usize>,
    default_response: Mutex<String>,
    responses: Mutex<Vec<String>>,
    rules: Mutex<Vec<MockRule>>,
    prompts: Mutex<Vec<String>>,
}

struct MockRule {
    needle: String,
    response: Option<String>,
    delay: Option<Duration>,
    failure: Option<String>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            context_window: None,
            default_response: Mutex::new(
                "I'm a mock generator. No queued responses available.".to_string(),
            ),
            responses: Mutex::new(Vec::new()),
            rules: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock that answers every prompt with the given text.
    pub fn with_response(text: &str) -> Self {
        let generator = Self::new();
        *generator.default_response.lock().unwrap() = text.to_string();
        generator
    }

    /// Advertise a context window so local overflow checks engage.
    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window = Some(tokens);
        self
    }

    /// Queue a response to be returned by the next unmatched call.
    pub fn queue_response(&self, text: &str) {
        self.responses.lock().unwrap().push(text.to_string());
    }

    /// Answer prompts containing `needle` with `response`.
    pub fn respond_when(&self, needle: &str, response: &str) {
        self.rules.lock().unwrap().insert(
            0,
            MockRule {
                needle: needle.to_string(),
                response: Some(response.to_string()),
                delay: None,
                failure: None,
            },
        );
    }

    /// Delay prompts containing `needle` before answering.
    pub fn delay_when(&self, needle: &str, delay: Duration) {
        self.rules.lock().unwrap().insert(
            0,
            MockRule {
                needle: needle.to_string(),
                response: None,
                delay: Some(delay),
                failure: None,
            },
        );
    }

    /// Fail prompts containing `needle` with an API error.
    pub fn fail_when(&self, needle: &str, message: &str) {
        self.rules.lock().unwrap().insert(
            0,
            MockRule {
                needle: needle.to_string(),
                response: None,
                delay: None,
                failure: Some(message.to_string()),
            },
        );
    }

    /// All prompts received so far, in arrival order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    fn plan(&self, prompt: &str) -> (Option<Duration>, Result<String, GenerationError>) {
        let rules = self.rules.lock().unwrap();
        let matching = || rules.iter().filter(|r| prompt.contains(&r.needle));

        let delay = matching().find_map(|r| r.delay);
        if let Some(message) = matching().find_map(|r| r.failure.clone()) {
            return (delay, Err(GenerationError::ApiRequest { message }));
        }
        if let Some(response) = matching().find_map(|r| r.response.clone()) {
            return (delay, Ok(response));
        }

        let mut queued = self.responses.lock().unwrap();
        if !queued.is_empty() {
            return (delay, Ok(queued.remove(0)));
        }
        (delay, Ok(self.default_response.lock().unwrap().clone()))
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let (delay, result) = self.plan(prompt);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn context_window(&self) -> Option<usize> {
        self.context_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_queue_then_default() {
        let generator = MockGenerator::with_response("default");
        generator.queue_response("first");
        assert_eq!(generator.generate("a").await.unwrap(), "first");
        assert_eq!(generator.generate("b").await.unwrap(), "default");
        assert_eq!(generator.prompts(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_rules_take_priority() {
        let generator = MockGenerator::new();
        generator.queue_response("queued");
        generator.respond_when("Breyer", "retiring justice");
        assert_eq!(
            generator.generate("about Breyer").await.unwrap(),
            "retiring justice"
        );
        assert_eq!(generator.generate("other").await.unwrap(), "queued");
    }

    #[tokio::test]
    async fn test_mock_failure() {
        let generator = MockGenerator::new();
        generator.fail_when("boom", "quota exceeded");
        let err = generator.generate("boom now").await.unwrap_err();
        assert!(matches!(err, GenerationError::ApiRequest { .. }));
        assert_eq!(generator.call_count(), 1);
    }

    #[test]
    fn test_max_input_tokens_from_window() {
        let generator = MockGenerator::new().with_context_window(1000);
        assert_eq!(generator.max_input_tokens(), Some(1000));
        assert_eq!(MockGenerator::new().max_input_tokens(), None);
    }

    #[test]
    fn test_token_counter_counts() {
        let counter = TokenCounter::for_model("gpt-4o");
        let short = counter.count("hello");
        let long = counter.count(&"hello world ".repeat(50));
        assert!(short >= 1);
        assert!(long > short);
    }
}
