//! The envelope-level chain capability and the basic prompt → generation chain.

use crate::error::{ChainError, Result};
use crate::generator::Generator;
use crate::prompt::PromptTemplate;
use crate::types::ChainValues;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// A stage that maps an input envelope to an output envelope.
#[async_trait]
pub trait Chain: Send + Sync {
    /// Keys the chain requires in its input envelope.
    fn input_keys(&self) -> Vec<String>;

    /// Keys the chain writes to its output envelope.
    fn output_keys(&self) -> Vec<String>;

    /// Stable identifier of the chain kind.
    fn chain_type(&self) -> &'static str;

    /// Run the chain. Implementations validate their input keys before any
    /// collaborator is invoked.
    async fn call(&self, inputs: ChainValues) -> Result<ChainValues>;
}

/// Check every key up front, reporting the first one missing.
pub(crate) fn validate_inputs(inputs: &ChainValues, keys: &[String]) -> Result<()> {
    let wanted: Vec<&str> = keys.iter().map(String::as_str).collect();
    if let Some(missing) = inputs.missing_keys(&wanted).first() {
        return Err(ChainError::missing_key(*missing).into());
    }
    Ok(())
}

/// Formats a prompt from the input envelope and issues one generation call.
pub struct LlmChain {
    prompt: PromptTemplate,
    generator: Arc<dyn Generator>,
    output_key: String,
}

impl LlmChain {
    pub fn new(prompt: PromptTemplate, generator: Arc<dyn Generator>) -> Self {
        Self {
            prompt,
            generator,
            output_key: "text".to_string(),
        }
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = key.into();
        self
    }

    pub fn prompt(&self) -> &PromptTemplate {
        &self.prompt
    }

    /// Format and generate, returning the raw completion text.
    pub async fn predict(&self, inputs: &ChainValues) -> Result<String> {
        let prompt = self.prompt.format_values(inputs)?;
        debug!(
            model = self.generator.model_name(),
            prompt_chars = prompt.len(),
            "LLM chain generating"
        );
        Ok(self.generator.generate(&prompt).await?)
    }
}

#[async_trait]
impl Chain for LlmChain {
    fn input_keys(&self) -> Vec<String> {
        self.prompt.input_variables().to_vec()
    }

    fn output_keys(&self) -> Vec<String> {
        vec![self.output_key.clone()]
    }

    fn chain_type(&self) -> &'static str {
        "llm_chain"
    }

    async fn call(&self, inputs: ChainValues) -> Result<ChainValues> {
        validate_inputs(&inputs, &self.input_keys())?;
        let text = self.predict(&inputs).await?;
        Ok(ChainValues::new().with(self.output_key.clone(), text))
    }
}
