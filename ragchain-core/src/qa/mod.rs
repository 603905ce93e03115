//! Question-answering pipelines: single-turn retrieval QA and conversational QA.
//!
//! Both pipelines are wired once (retriever + combiner, plus a rewriter for the
//! conversational variant) and are then reused across any number of stateless,
//! concurrent calls. Typed entry points (`run`) take request structs; the
//! [`Chain`](crate::chain::Chain) implementation is the envelope boundary that
//! validates keys and delegates to `run`.

pub mod conversational;
pub mod retrieval;

use crate::combine::{CombineStrategy, CombinerOptions, OverflowPolicy};
use crate::config::PipelineSettings;
use crate::error::{ChainError, Result};
use crate::history::ChatHistory;
use crate::types::{ChainValues, Document, SOURCE_DOCUMENTS_KEY};
use serde::{Deserialize, Serialize};

pub use conversational::ConversationalRetrievalQaChain;
pub use retrieval::RetrievalQaChain;

/// Default output key for both pipelines.
pub const DEFAULT_OUTPUT_KEY: &str = "result";

/// The envelope keys a pipeline exposes, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub input_key: String,
    pub output_key: String,
    pub return_source_documents: bool,
}

impl PipelineConfig {
    pub fn new(input_key: impl Into<String>) -> Self {
        Self {
            input_key: input_key.into(),
            output_key: DEFAULT_OUTPUT_KEY.to_string(),
            return_source_documents: false,
        }
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = key.into();
        self
    }

    pub fn with_source_documents(mut self, enabled: bool) -> Self {
        self.return_source_documents = enabled;
        self
    }

    pub(crate) fn output_keys(&self) -> Vec<String> {
        let mut keys = vec![self.output_key.clone()];
        if self.return_source_documents {
            keys.push(SOURCE_DOCUMENTS_KEY.to_string());
        }
        keys
    }
}

/// A single-turn question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaRequest {
    pub query: String,
}

impl QaRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
        }
    }
}

/// A follow-up question with the conversation so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationalRequest {
    pub question: String,
    #[serde(default)]
    pub chat_history: ChatHistory,
}

impl ConversationalRequest {
    pub fn new(question: impl Into<String>, chat_history: impl Into<ChatHistory>) -> Self {
        Self {
            question: question.into(),
            chat_history: chat_history.into(),
        }
    }
}

/// The answer, plus the retrieved documents when the pipeline returns them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaResponse {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_documents: Option<Vec<Document>>,
}

impl QaResponse {
    /// Render into an output envelope keyed per `config`.
    pub fn into_values(self, config: &PipelineConfig) -> Result<ChainValues> {
        let mut values = ChainValues::new().with(config.output_key.clone(), self.text);
        if let Some(documents) = &self.source_documents {
            values.insert_documents(documents)?;
        }
        Ok(values)
    }
}

/// Options for the `from_llm` factories.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QaOptions {
    /// `stuff_documents_chain` or `map_reduce_documents_chain`.
    pub chain_type: String,
    pub input_key: Option<String>,
    pub output_key: Option<String>,
    pub return_source_documents: bool,
    /// Conversational only.
    pub question_generator_template: Option<String>,
    pub qa_template: Option<String>,
    pub map_concurrency: Option<usize>,
    pub overflow: OverflowPolicy,
    pub max_context_tokens: Option<usize>,
    /// Conversational only.
    pub history_in_answer: bool,
}

impl Default for QaOptions {
    fn default() -> Self {
        Self {
            chain_type: CombineStrategy::Stuff.as_str().to_string(),
            input_key: None,
            output_key: None,
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

impl QaOptions {
    pub fn with_chain_type(mut self, chain_type: impl Into<String>) -> Self {
        self.chain_type = chain_type.into();
        self
    }

    pub fn with_source_documents(mut self, enabled: bool) -> Self {
        self.return_source_documents = enabled;
        self
    }

    pub(crate) fn strategy(&self) -> std::result::Result<CombineStrategy, ChainError> {
        self.chain_type.parse()
    }

    pub(crate) fn combiner_options(&self) -> CombinerOptions {
        CombinerOptions {
            qa_template: self.qa_template.clone(),
            map_concurrency: self.map_concurrency,
            overflow: self.overflow,
            max_context_tokens: self.max_context_tokens,
        }
    }

    pub(crate) fn pipeline_config(&self, default_input_key: &str) -> PipelineConfig {
        PipelineConfig::new(
            self.input_key
                .clone()
                .unwrap_or_else(|| default_input_key.to_string()),
        )
        .with_output_key(
            self.output_key
                .clone()
                .unwrap_or_else(|| DEFAULT_OUTPUT_KEY.to_string()),
        )
        .with_source_documents(self.return_source_documents)
    }
}

impl From<&PipelineSettings> for QaOptions {
    fn from(settings: &PipelineSettings) -> Self {
        Self {
            chain_type: settings.chain_type.clone(),
            input_key: settings.input_key.clone(),
            output_key: Some(settings.output_key.clone()),
            return_source_documents: settings.return_source_documents,
            question_generator_template: settings.question_generator_template.clone(),
            qa_template: settings.qa_template.clone(),
            map_concurrency: settings.map_concurrency,
            overflow: settings.overflow,
            max_context_tokens: settings.max_context_tokens,
            history_in_answer: settings.history_in_answer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_response_envelope_without_sources() {
        let config = PipelineConfig::new("query");
        let values = QaResponse {
            text: "answer".into(),
            source_documents: None,
        }
        .into_values(&config)
        .unwrap();
        assert_eq!(values.keys().collect::<Vec<_>>(), vec!["result"]);
    }

    #[test]
    fn test_response_envelope_with_sources() {
        let config = PipelineConfig::new("query")
            .with_output_key("answer")
            .with_source_documents(true);
        let docs = vec![Document::new("a")];
        let values = QaResponse {
            text: "x".into(),
            source_documents: Some(docs.clone()),
        }
        .into_values(&config)
        .unwrap();
        assert_eq!(
            values.keys().collect::<Vec<_>>(),
            vec!["answer", SOURCE_DOCUMENTS_KEY]
        );
        assert_eq!(values.source_documents().unwrap().unwrap(), docs);
    }

    #[test]
    fn test_options_from_settings() {
        let settings = PipelineSettings {
            chain_type: "map_reduce_documents_chain".into(),
            map_concurrency: Some(4),
            history_in_answer: false,
            ..Default::default()
        };
        let options = QaOptions::from(&settings);
        assert_eq!(options.strategy().unwrap(), CombineStrategy::MapReduce);
        assert_eq!(options.combiner_options().map_concurrency, Some(4));
        assert!(!options.history_in_answer);

        let config = options.pipeline_config("query");
        assert_eq!(config.input_key, "query");
        assert_eq!(config.output_key, "result");
    }

    #[test]
    fn test_output_keys_include_sources_when_enabled() {
        let config = PipelineConfig::new("q").with_source_documents(true);
        assert_eq!(
            config.output_keys(),
            vec!["result".to_string(), SOURCE_DOCUMENTS_KEY.to_string()]
        );
    }
}
