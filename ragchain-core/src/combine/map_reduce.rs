//! Map-reduce strategy: extract per document concurrently, then reduce once.

use super::{CombineRequest, Combiner, DOCUMENT_SEPARATOR};
use crate::error::Result;
use crate::generator::Generator;
use crate::prompt::{MAP_QA_TEMPLATE, PromptTemplate, REDUCE_QA_TEMPLATE};
use crate::types::Document;
use async_trait::async_trait;
use futures::future::try_join_all;
use futures::{StreamExt, TryStreamExt, stream};
use std::sync::Arc;
use tracing::debug;

/// Runs one map call per document, then a single reduce call over the extracts.
///
/// Map calls are independent and run concurrently; their outputs are joined in
/// document order regardless of completion order. The first failure aborts the
/// combination and drops the remaining in-flight calls.
pub struct MapReduceDocumentsChain {
    generator: Arc<dyn Generator>,
    map_prompt: PromptTemplate,
    reduce_prompt: PromptTemplate,
    max_concurrency: Option<usize>,
}

impl MapReduceDocumentsChain {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self {
            generator,
            map_prompt: PromptTemplate::from_template(MAP_QA_TEMPLATE),
            reduce_prompt: PromptTemplate::from_template(REDUCE_QA_TEMPLATE),
            max_concurrency: None,
        }
    }

    pub fn with_map_prompt(mut self, prompt: PromptTemplate) -> Self {
        self.map_prompt = prompt;
        self
    }

    pub fn with_reduce_prompt(mut self, prompt: PromptTemplate) -> Self {
        self.reduce_prompt = prompt;
        self
    }

    /// Bound the number of map calls in flight. `None` or `0` means unbounded.
    pub fn with_concurrency(mut self, limit: Option<usize>) -> Self {
        self.max_concurrency = limit.filter(|n| *n > 0);
        self
    }

    async fn map_one(
        &self,
        request: &CombineRequest<'_>,
        index: usize,
        document: &Document,
    ) -> Result<String> {
        let prompt = self
            .map_prompt
            .format_with(|name| request.lookup(name, ("context", document.content())))?;
        debug!(index, "Map call");
        Ok(self.generator.generate(&prompt).await?)
    }

    /// Run the map phase, returning one extract per document in document order.
    pub async fn map_phase(&self, request: &CombineRequest<'_>) -> Result<Vec<String>> {
        let calls = request
            .documents
            .iter()
            .enumerate()
            .map(|(i, doc)| self.map_one(request, i, doc))
            .collect::<Vec<_>>();

        match self.max_concurrency {
            Some(limit) => stream::iter(calls).buffered(limit).try_collect().await,
            None => try_join_all(calls).await,
        }
    }

    /// Run the reduce phase over the ordered map outputs.
    pub async fn reduce_phase(
        &self,
        request: &CombineRequest<'_>,
        summaries: &[String],
    ) -> Result<String> {
        let joined = summaries.join(DOCUMENT_SEPARATOR);
        let prompt = self
            .reduce_prompt
            .format_with(|name| request.lookup(name, ("summaries", joined.as_str())))?;
        debug!(summaries = summaries.len(), "Reduce call");
        Ok(self.generator.generate(&prompt).await?)
    }
}

#[async_trait]
impl Combiner for MapReduceDocumentsChain {
    async fn combine(&self, request: CombineRequest<'_>) -> Result<String> {
        let summaries = self.map_phase(&request).await?;
        self.reduce_phase(&request, &summaries).await
    }

    fn chain_type(&self) -> &'static str {
        "map_reduce_documents_chain"
    }
}
