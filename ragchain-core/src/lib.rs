//! # Ragchain Core
//!
//! Core library for Ragchain retrieval-augmented question answering.
//! Provides the single-turn and conversational QA pipelines, the stuff and
//! map-reduce document combiners, question rewriting, the generator and
//! retriever capabilities, configuration, and fundamental types.

pub mod chain;
pub mod combine;
pub mod config;
pub mod error;
pub mod generator;
pub mod history;
pub mod prompt;
pub mod providers;
pub mod qa;
pub mod retriever;
pub mod rewrite;
pub mod types;

// Re-export commonly used types at the crate root.
pub use chain::{Chain, LlmChain};
pub use combine::{
    CombineDocumentsChain, CombineRequest, CombineStrategy, Combiner, CombinerOptions,
    DocumentCombiner, MapReduceDocumentsChain, OverflowPolicy, StuffDocumentsChain,
};
pub use config::{RagConfig, load_config};
pub use error::{ChainError, GenerationError, RagError, Result, RetrievalError};
pub use generator::{Generator, MockGenerator, TokenCounter};
pub use history::{ChatHistory, ConversationTurn};
pub use prompt::PromptTemplate;
pub use providers::{OpenAiGenerator, create_generator};
pub use qa::{
    ConversationalRequest, ConversationalRetrievalQaChain, PipelineConfig, QaOptions, QaRequest,
    QaResponse, RetrievalQaChain,
};
pub use retriever::{InMemoryRetriever, Retriever, StaticRetriever};
pub use rewrite::QuestionRewriter;
pub use types::{ChainValues, Document, SOURCE_DOCUMENTS_KEY};
