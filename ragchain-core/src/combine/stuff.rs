//! Stuff strategy: every document in one prompt, one generation call.

use super::{CombineRequest, Combiner, DOCUMENT_SEPARATOR, OverflowPolicy};
use crate::error::{ChainError, Result};
use crate::generator::{Generator, TokenCounter};
use crate::prompt::{PromptTemplate, STUFF_QA_TEMPLATE};
use crate::types::Document;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Concatenates documents into `{context}` and answers in a single call.
pub struct StuffDocumentsChain {
    generator: Arc<dyn Generator>,
    prompt: PromptTemplate,
    document_variable: String,
    overflow: OverflowPolicy,
    max_context_tokens: Option<usize>,
    token_counter: TokenCounter,
}

impl StuffDocumentsChain {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        let token_counter = TokenCounter::for_model(generator.model_name());
        Self {
            generator,
            prompt: PromptTemplate::from_template(STUFF_QA_TEMPLATE),
            document_variable: "context".to_string(),
            overflow: OverflowPolicy::Error,
            max_context_tokens: None,
            token_counter,
        }
    }

    pub fn with_prompt(mut self, prompt: PromptTemplate) -> Self {
        self.prompt = prompt;
        self
    }

    /// Name of the prompt variable that receives the joined documents.
    pub fn with_document_variable(mut self, name: impl Into<String>) -> Self {
        self.document_variable = name.into();
        self
    }

    /// Set the overflow policy and an explicit token limit. Without a limit the
    /// generator's advertised input capacity is used, if any.
    pub fn with_overflow(
        mut self,
        policy: OverflowPolicy,
        max_context_tokens: Option<usize>,
    ) -> Self {
        self.overflow = policy;
        self.max_context_tokens = max_context_tokens;
        self
    }

    fn token_limit(&self) -> Option<usize> {
        self.max_context_tokens
            .or_else(|| self.generator.max_input_tokens())
    }

    fn render(&self, request: &CombineRequest<'_>, documents: &[Document]) -> Result<String> {
        let context = join_documents(documents);
        let extra = (self.document_variable.as_str(), context.as_str());
        Ok(self.prompt.format_with(|name| request.lookup(name, extra))?)
    }

    /// Build the final prompt, enforcing the token limit per the overflow policy.
    pub fn build_prompt(&self, request: &CombineRequest<'_>) -> Result<String> {
        let prompt = self.render(request, request.documents)?;
        let Some(limit) = self.token_limit() else {
            return Ok(prompt);
        };

        let used = self.token_counter.count(&prompt);
        if used <= limit {
            return Ok(prompt);
        }

        match self.overflow {
            OverflowPolicy::Error => Err(ChainError::ContextTooLarge { used, limit }.into()),
            OverflowPolicy::Truncate => {
                let mut keep = request.documents.len();
                while keep > 0 {
                    keep -= 1;
                    let candidate = self.render(request, &request.documents[..keep])?;
                    if self.token_counter.count(&candidate) <= limit {
                        warn!(
                            kept = keep,
                            dropped = request.documents.len() - keep,
                            limit,
                            "Truncated documents to fit the context window"
                        );
                        return Ok(candidate);
                    }
                }
                let used = self.token_counter.count(&self.render(request, &[])?);
                Err(ChainError::ContextTooLarge { used, limit }.into())
            }
        }
    }
}

/// Join document contents with the standard separator.
pub fn join_documents(documents: &[Document]) -> String {
    documents
        .iter()
        .map(Document::content)
        .collect::<Vec<_>>()
        .join(DOCUMENT_SEPARATOR)
}

#[async_trait]
impl Combiner for StuffDocumentsChain {
    async fn combine(&self, request: CombineRequest<'_>) -> Result<String> {
        let prompt = self.build_prompt(&request)?;
        debug!(
            documents = request.documents.len(),
            prompt_chars = prompt.len(),
            "Stuff combination"
        );
        Ok(self.generator.generate(&prompt).await?)
    }

    fn chain_type(&self) -> &'static str {
        "stuff_documents_chain"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagError;
    use crate::generator::MockGenerator;

    fn docs(texts: &[&str]) -> Vec<Document> {
        texts.iter().map(|t| Document::new(*t)).collect()
    }

    #[tokio::test]
    async fn test_single_call_with_all_documents() {
        let generator = Arc::new(MockGenerator::with_response("final"));
        let chain = StuffDocumentsChain::new(generator.clone());
        let documents = docs(&["one", "two", "three"]);
        let answer = chain
            .combine(CombineRequest::new("Which?", &documents))
            .await
            .unwrap();
        assert_eq!(answer, "final");
        let prompts = generator.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("one\n\ntwo\n\nthree"));
        assert!(prompts[0].contains("Question: Which?"));
    }

    #[tokio::test]
    async fn test_empty_documents_still_generates() {
        let generator = Arc::new(MockGenerator::with_response("I don't know."));
        let chain = StuffDocumentsChain::new(generator.clone());
        let answer = chain.combine(CombineRequest::new("q", &[])).await.unwrap();
        assert_eq!(answer, "I don't know.");
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_overflow_error_skips_generation() {
        let generator = Arc::new(MockGenerator::new().with_context_window(50));
        let chain = StuffDocumentsChain::new(generator.clone());
        let big = "word ".repeat(200);
        let documents = docs(&[big.as_str()]);
        let err = chain
            .combine(CombineRequest::new("q", &documents))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RagError::Chain(ChainError::ContextTooLarge { limit: 50, .. })
        ));
        assert_eq!(generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_overflow_truncate_drops_trailing_documents() {
        let generator = Arc::new(MockGenerator::with_response("ok"));
        let chain = StuffDocumentsChain::new(generator.clone())
            .with_prompt(PromptTemplate::from_template("{context}|{question}"))
            .with_overflow(OverflowPolicy::Truncate, Some(60));
        let filler = "filler ".repeat(100);
        let documents = docs(&["keep me", filler.as_str()]);
        chain
            .combine(CombineRequest::new("q", &documents))
            .await
            .unwrap();
        let prompt = &generator.prompts()[0];
        assert!(prompt.contains("keep me"));
        assert!(!prompt.contains("filler"));
    }

    #[test]
    fn test_truncate_still_fails_when_nothing_fits() {
        let chain = StuffDocumentsChain::new(Arc::new(MockGenerator::new()))
            .with_overflow(OverflowPolicy::Truncate, Some(1));
        let documents = docs(&["a"]);
        let err = chain
            .build_prompt(&CombineRequest::new("q", &documents))
            .unwrap_err();
        assert!(matches!(
            err,
            RagError::Chain(ChainError::ContextTooLarge { limit: 1, .. })
        ));
    }

    #[test]
    fn test_history_and_custom_variable() {
        let chain = StuffDocumentsChain::new(Arc::new(MockGenerator::new()))
            .with_prompt(PromptTemplate::from_template(
                "{chat_history}\n{summaries}\n{question}",
            ))
            .with_document_variable("summaries");
        let documents = docs(&["d"]);
        let prompt = chain
            .build_prompt(&CombineRequest::new("q", &documents).with_history("Human: hi"))
            .unwrap();
        assert_eq!(prompt, "Human: hi\nd\nq");
    }
}
