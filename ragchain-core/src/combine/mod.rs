//! Document-combination strategies.
//!
//! A combiner turns a question plus retrieved documents into one answer:
//! - `Stuff` concatenates every document into a single prompt (one generation call).
//! - `MapReduce` extracts from each document independently, then reduces the
//!   extracts into an answer (`N + 1` generation calls).
//!
//! The strategy is chosen once at construction via [`CombineStrategy`].

pub mod map_reduce;
pub mod stuff;

use crate::chain::{Chain, validate_inputs};
use crate::error::{ChainError, Result};
use crate::generator::Generator;
use crate::history::ChatHistory;
use crate::prompt::PromptTemplate;
use crate::types::{ChainValues, Document};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

pub use map_reduce::MapReduceDocumentsChain;
pub use stuff::StuffDocumentsChain;

/// Envelope key carrying the documents into a combination chain.
pub const INPUT_DOCUMENTS_KEY: &str = "input_documents";

/// Separator placed between documents and between map outputs.
pub const DOCUMENT_SEPARATOR: &str = "\n\n";

/// Which combination algorithm a pipeline uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CombineStrategy {
    #[serde(rename = "stuff_documents_chain")]
    Stuff,
    #[serde(rename = "map_reduce_documents_chain")]
    MapReduce,
}

impl CombineStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CombineStrategy::Stuff => "stuff_documents_chain",
            CombineStrategy::MapReduce => "map_reduce_documents_chain",
        }
    }
}

impl std::fmt::Display for CombineStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CombineStrategy {
    type Err = ChainError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "stuff_documents_chain" => Ok(CombineStrategy::Stuff),
            "map_reduce_documents_chain" => Ok(CombineStrategy::MapReduce),
            other => Err(ChainError::UnknownChainType {
                chain_type: other.to_string(),
            }),
        }
    }
}

/// What the stuff strategy does when the prompt exceeds the token limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Fail with `ContextTooLarge` before calling the generator.
    #[default]
    Error,
    /// Drop trailing documents until the prompt fits.
    Truncate,
}

/// Inputs to a single combination.
#[derive(Debug, Clone, Copy)]
pub struct CombineRequest<'a> {
    pub question: &'a str,
    pub documents: &'a [Document],
    /// Transcript offered to the prompt as `{chat_history}`, if any.
    pub chat_history: Option<&'a str>,
}

impl<'a> CombineRequest<'a> {
    pub fn new(question: &'a str, documents: &'a [Document]) -> Self {
        Self {
            question,
            documents,
            chat_history: None,
        }
    }

    pub fn with_history(mut self, chat_history: &'a str) -> Self {
        self.chat_history = Some(chat_history);
        self
    }

    /// Resolve a prompt variable: `question`, `chat_history`, or `extra`.
    pub(crate) fn lookup(&self, name: &str, extra: (&str, &str)) -> Option<String> {
        match name {
            "question" => Some(self.question.to_string()),
            "chat_history" => Some(self.chat_history.unwrap_or_default().to_string()),
            n if n == extra.0 => Some(extra.1.to_string()),
            _ => None,
        }
    }
}

/// Trait for document-combination strategies.
#[async_trait]
pub trait Combiner: Send + Sync {
    /// Produce the answer text for a question over the given documents.
    async fn combine(&self, request: CombineRequest<'_>) -> Result<String>;

    /// Stable identifier of the strategy.
    fn chain_type(&self) -> &'static str;
}

/// Options shared by both strategies when built through [`DocumentCombiner::build`].
#[derive(Debug, Clone, Default)]
pub struct CombinerOptions {
    /// Replaces the stuff prompt, or the map prompt for map-reduce.
    pub qa_template: Option<String>,
    pub map_concurrency: Option<usize>,
    pub overflow: OverflowPolicy,
    pub max_context_tokens: Option<usize>,
}

/// Tagged-variant dispatch over the built-in strategies.
pub enum DocumentCombiner {
    Stuff(StuffDocumentsChain),
    MapReduce(MapReduceDocumentsChain),
}

impl DocumentCombiner {
    /// Build the combiner for `strategy`, bound to `generator`.
    pub fn build(
        strategy: CombineStrategy,
        generator: Arc<dyn Generator>,
        options: &CombinerOptions,
    ) -> Self {
        let qa_prompt = options
            .qa_template
            .as_deref()
            .map(PromptTemplate::from_template);
        match strategy {
            CombineStrategy::Stuff => {
                let mut chain = StuffDocumentsChain::new(generator)
                    .with_overflow(options.overflow, options.max_context_tokens);
                if let Some(prompt) = qa_prompt {
                    chain = chain.with_prompt(prompt);
                }
                DocumentCombiner::Stuff(chain)
            }
            CombineStrategy::MapReduce => {
                let mut chain =
                    MapReduceDocumentsChain::new(generator).with_concurrency(options.map_concurrency);
                if let Some(prompt) = qa_prompt {
                    chain = chain.with_map_prompt(prompt);
                }
                DocumentCombiner::MapReduce(chain)
            }
        }
    }

    pub fn strategy(&self) -> CombineStrategy {
        match self {
            DocumentCombiner::Stuff(_) => CombineStrategy::Stuff,
            DocumentCombiner::MapReduce(_) => CombineStrategy::MapReduce,
        }
    }
}

#[async_trait]
impl Combiner for DocumentCombiner {
    async fn combine(&self, request: CombineRequest<'_>) -> Result<String> {
        match self {
            DocumentCombiner::Stuff(chain) => chain.combine(request).await,
            DocumentCombiner::MapReduce(chain) => chain.combine(request).await,
        }
    }

    fn chain_type(&self) -> &'static str {
        self.strategy().as_str()
    }
}

/// Exposes any combiner at the envelope boundary.
///
/// Input keys: `question`, `input_documents` (a JSON array of documents), and
/// optionally `chat_history`. Output key: `text`.
pub struct CombineDocumentsChain<C> {
    combiner: C,
}

impl<C: Combiner> CombineDocumentsChain<C> {
    pub fn new(combiner: C) -> Self {
        Self { combiner }
    }
}

#[async_trait]
impl<C: Combiner> Chain for CombineDocumentsChain<C> {
    fn input_keys(&self) -> Vec<String> {
        vec!["question".to_string(), INPUT_DOCUMENTS_KEY.to_string()]
    }

    fn output_keys(&self) -> Vec<String> {
        vec!["text".to_string()]
    }

    fn chain_type(&self) -> &'static str {
        self.combiner.chain_type()
    }

    async fn call(&self, inputs: ChainValues) -> Result<ChainValues> {
        validate_inputs(&inputs, &self.input_keys())?;
        let question = inputs.require_str("question")?;
        let documents: Vec<Document> =
            serde_json::from_value(inputs.require(INPUT_DOCUMENTS_KEY)?.clone()).map_err(|e| {
                ChainError::InvalidInput {
                    key: INPUT_DOCUMENTS_KEY.to_string(),
                    reason: e.to_string(),
                }
            })?;
        let history = inputs
            .get("chat_history")
            .map(|value| ChatHistory::from_value("chat_history", value))
            .transpose()?
            .map(|history| history.to_transcript());

        let mut request = CombineRequest::new(question, &documents);
        if let Some(h) = history.as_deref() {
            request = request.with_history(h);
        }
        let text = self.combiner.combine(request).await?;
        Ok(ChainValues::new().with("text", text))
    }
}
