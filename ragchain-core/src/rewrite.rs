//! Condenses a follow-up question plus conversation history into a standalone question.

use crate::chain::{Chain, LlmChain};
use crate::error::{ChainError, Result};
use crate::generator::Generator;
use crate::history::ChatHistory;
use crate::prompt::{PromptTemplate, QUESTION_GENERATOR_TEMPLATE};
use crate::types::ChainValues;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Rewrites follow-up questions through an inner chain.
///
/// The inner chain receives `question` and `chat_history` and must produce
/// exactly one output value.
pub struct QuestionRewriter {
    chain: Arc<dyn Chain>,
}

impl QuestionRewriter {
    pub fn new(chain: Arc<dyn Chain>) -> Self {
        Self { chain }
    }

    /// Build over an [`LlmChain`] using `template`, or the default
    /// question-generator prompt when `None`.
    pub fn from_generator(generator: Arc<dyn Generator>, template: Option<&str>) -> Self {
        let prompt = PromptTemplate::from_template(template.unwrap_or(QUESTION_GENERATOR_TEMPLATE));
        Self::new(Arc::new(LlmChain::new(prompt, generator)))
    }

    /// Return the standalone question. Empty history returns `question`
    /// unchanged without touching the inner chain.
    pub async fn rewrite(&self, question: &str, history: &ChatHistory) -> Result<String> {
        if history.is_empty() {
            return Ok(question.to_string());
        }

        let inputs = ChainValues::new()
            .with("question", question)
            .with("chat_history", history.to_transcript());
        let outputs = self.chain.call(inputs).await?;

        let mut entries = outputs.into_iter();
        let standalone = match (entries.next(), entries.next()) {
            (Some((_, Value::String(text))), None) => text,
            (Some((_, other)), None) => other.to_string(),
            (first, second) => {
                let keys = first
                    .into_iter()
                    .chain(second)
                    .chain(entries)
                    .map(|(key, _)| key)
                    .collect();
                return Err(ChainError::AmbiguousRewriteOutput { keys }.into());
            }
        };
        debug!(original = question, standalone = %standalone, "Rewrote follow-up question");
        Ok(standalone)
    }
}
