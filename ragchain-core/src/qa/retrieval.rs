//! Single-turn retrieval QA: retrieve, combine, answer.

use super::{PipelineConfig, QaOptions, QaRequest, QaResponse};
use crate::chain::{Chain, validate_inputs};
use crate::combine::{CombineRequest, Combiner, DocumentCombiner};
use crate::config::RagConfig;
use crate::error::{ChainError, Result};
use crate::generator::Generator;
use crate::retriever::Retriever;
use crate::types::ChainValues;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_INPUT_KEY: &str = "query";

/// Answers a standalone query over documents from a retriever.
pub struct RetrievalQaChain {
    retriever: Arc<dyn Retriever>,
    combiner: Box<dyn Combiner>,
    config: PipelineConfig,
}

impl RetrievalQaChain {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        combiner: impl Combiner + 'static,
        config: PipelineConfig,
    ) -> Self {
        Self {
            retriever,
            combiner: Box::new(combiner),
            config,
        }
    }

    /// Wire a pipeline around `generator`. An unknown chain type fails here,
    /// before any call can be made.
    pub fn from_llm(
        generator: Arc<dyn Generator>,
        retriever: Arc<dyn Retriever>,
        options: &QaOptions,
    ) -> Result<Self> {
        let strategy = options.strategy()?;
        let combiner = DocumentCombiner::build(strategy, generator, &options.combiner_options());
        Ok(Self::new(
            retriever,
            combiner,
            options.pipeline_config(DEFAULT_INPUT_KEY),
        ))
    }

    /// Wire a pipeline from loaded configuration.
    pub fn from_config(
        config: &RagConfig,
        generator: Arc<dyn Generator>,
        retriever: Arc<dyn Retriever>,
    ) -> Result<Self> {
        Self::from_llm(generator, retriever, &QaOptions::from(&config.pipeline))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one query through retrieval and combination.
    #[tracing::instrument(skip_all, fields(strategy = self.combiner.chain_type()))]
    pub async fn run(&self, request: QaRequest) -> Result<QaResponse> {
        let documents = self.retriever.get_relevant_documents(&request.query).await?;
        debug!(documents = documents.len(), "Retrieved documents");

        let text = self
            .combiner
            .combine(CombineRequest::new(&request.query, &documents))
            .await?;
        info!(documents = documents.len(), "Retrieval QA complete");

        Ok(QaResponse {
            text,
            source_documents: self.config.return_source_documents.then_some(documents),
        })
    }

    /// Persisting a configured pipeline is unsupported.
    pub fn serialize(&self) -> Result<Value> {
        Err(ChainError::not_implemented("serialize").into())
    }

    /// Restoring a pipeline from data is unsupported.
    pub fn deserialize(_data: &Value) -> Result<Self> {
        Err(ChainError::not_implemented("deserialize").into())
    }
}

#[async_trait]
impl Chain for RetrievalQaChain {
    fn input_keys(&self) -> Vec<String> {
        vec![self.config.input_key.clone()]
    }

    fn output_keys(&self) -> Vec<String> {
        self.config.output_keys()
    }

    fn chain_type(&self) -> &'static str {
        "retrieval_qa"
    }

    async fn call(&self, inputs: ChainValues) -> Result<ChainValues> {
        validate_inputs(&inputs, &self.input_keys())?;
        let query = inputs.require_str(&self.config.input_key)?;
        let response = self.run(QaRequest::new(query)).await?;
        response.into_values(&self.config)
    }
}
