//! Conversational retrieval QA: rewrite the follow-up, retrieve, combine with history.

use super::{ConversationalRequest, PipelineConfig, QaOptions, QaResponse};
use crate::chain::{Chain, validate_inputs};
use crate::combine::{CombineRequest, Combiner, DocumentCombiner};
use crate::config::RagConfig;
use crate::error::{ChainError, Result};
use crate::generator::Generator;
use crate::history::ChatHistory;
use crate::retriever::Retriever;
use crate::rewrite::QuestionRewriter;
use crate::types::ChainValues;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_INPUT_KEY: &str = "question";
pub const CHAT_HISTORY_KEY: &str = "chat_history";

pub struct ConversationalRetrievalQaChain {
    retriever: Arc<dyn Retriever>,
    combiner: Box<dyn Combiner>,
    rewriter: QuestionRewriter,
    config: PipelineConfig,
    history_in_answer: bool,
}

impl ConversationalRetrievalQaChain {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        combiner: impl Combiner + 'static,
        rewriter: QuestionRewriter,
        config: PipelineConfig,
    ) -> Self {
        Self {
            retriever,
            combiner: Box::new(combiner),
            rewriter,
            config,
            history_in_answer: true,
        }
    }

    /// Whether the answer prompt also sees the chat history. On by default.
    pub fn with_history_in_answer(mut self, enabled: bool) -> Self {
        self.history_in_answer = enabled;
        self
    }

    /// Wire the rewriter and combiner around one generator. An unknown chain
    /// type fails here, before any call can be made.
    pub fn from_llm(
        generator: Arc<dyn Generator>,
        retriever: Arc<dyn Retriever>,
        options: &QaOptions,
    ) -> Result<Self> {
        let strategy = options.strategy()?;
        let rewriter = QuestionRewriter::from_generator(
            generator.clone(),
            options.question_generator_template.as_deref(),
        );
        let combiner = DocumentCombiner::build(strategy, generator, &options.combiner_options());
        Ok(Self::new(
            retriever,
            combiner,
            rewriter,
            options.pipeline_config(DEFAULT_INPUT_KEY),
        )
        .with_history_in_answer(options.history_in_answer))
    }

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

    /// Answer a follow-up question in the context of `chat_history`.
    ///
    /// Empty history skips the rewrite and the question is retrieved verbatim.
    #[tracing::instrument(skip_all, fields(strategy = self.combiner.chain_type()))]
    pub async fn run(&self, request: ConversationalRequest) -> Result<QaResponse> {
        let history = &request.chat_history;
        let standalone = self.rewriter.rewrite(&request.question, history).await?;

        let documents = self.retriever.get_relevant_documents(&standalone).await?;
        debug!(documents = documents.len(), "Retrieved documents");

        let transcript = history.to_transcript();
        let mut combine = CombineRequest::new(&standalone, &documents);
        if self.history_in_answer {
            combine = combine.with_history(&transcript);
        }
        let text = self.combiner.combine(combine).await?;
        info!(
            documents = documents.len(),
            rewritten = !history.is_empty(),
            "Conversational QA complete"
        );

        Ok(QaResponse {
            text,
            source_documents: self.config.return_source_documents.then_some(documents),
        })
    }

    pub fn serialize(&self) -> Result<Value> {
        Err(ChainError::not_implemented("serialize").into())
    }

    pub fn deserialize(_data: &Value) -> Result<Self> {
        Err(ChainError::not_implemented("deserialize").into())
    }
}

#[async_trait]
impl Chain for ConversationalRetrievalQaChain {
    fn input_keys(&self) -> Vec<String> {
        vec![self.config.input_key.clone(), CHAT_HISTORY_KEY.to_string()]
    }

    fn output_keys(&self) -> Vec<String> {
        self.config.output_keys()
    }

    fn chain_type(&self) -> &'static str {
        "conversational_retrieval_chain"
    }

    async fn call(&self, inputs: ChainValues) -> Result<ChainValues> {
        validate_inputs(&inputs, &self.input_keys())?;
        let question = inputs.require_str(&self.config.input_key)?;
        let chat_history = ChatHistory::from_value(CHAT_HISTORY_KEY, inputs.require(CHAT_HISTORY_KEY)?)?;
        let response = self
            .run(ConversationalRequest::new(question, chat_history))
            .await?;
        response.into_values(&self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagError;
    use crate::generator::MockGenerator;
    use crate::history::ConversationTurn;
    use crate::retriever::StaticRetriever;
    use crate::types::Document;
    use serde_json::json;

    fn pipeline(
        generator: Arc<MockGenerator>,
        retriever: Arc<StaticRetriever>,
        options: QaOptions,
    ) -> ConversationalRetrievalQaChain {
        ConversationalRetrievalQaChain::from_llm(generator, retriever, &options).unwrap()
    }

    fn retriever() -> Arc<StaticRetriever> {
        Arc::new(StaticRetriever::new(vec![Document::new(
            "Justice Breyer served on the Supreme Court.",
        )]))
    }

    #[tokio::test]
    async fn test_empty_history_skips_rewrite() {
        let generator = Arc::new(MockGenerator::with_response("answer"));
        let retriever = retriever();
        let chain = pipeline(generator.clone(), retriever.clone(), QaOptions::default());

        let out = chain
            .call(
                ChainValues::new()
                    .with("question", "Who is Breyer?")
                    .with("chat_history", json!([])),
            )
            .await
            .unwrap();
        assert_eq!(out.get("result").unwrap(), "answer");
        assert_eq!(retriever.queries(), vec!["Who is Breyer?".to_string()]);
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_history_triggers_one_rewrite_before_retrieval() {
        let generator = Arc::new(MockGenerator::with_response("answer"));
        generator.queue_response("Was Justice Breyer confirmed?");
        let retriever = retriever();
        let chain = pipeline(generator.clone(), retriever.clone(), QaOptions::default());

        let history = vec![ConversationTurn::new("Who is Breyer?", "A justice.")];
        let response = chain
            .run(ConversationalRequest::new("Was he confirmed?", history))
            .await
            .unwrap();
        assert_eq!(response.text, "answer");
        assert_eq!(
            retriever.queries(),
            vec!["Was Justice Breyer confirmed?".to_string()]
        );

        let prompts = generator.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].contains("Follow Up Input: Was he confirmed?"));
        assert!(prompts[1].contains("Question: Was Justice Breyer confirmed?"));
    }

    #[tokio::test]
    async fn test_history_reaches_answer_prompt() {
        let generator = Arc::new(MockGenerator::with_response("answer"));
        generator.queue_response("standalone");
        let options = QaOptions {
            qa_template: Some("[{chat_history}] {context} :: {question}".into()),
            ..Default::default()
        };
        let chain = pipeline(generator.clone(), retriever(), options);
        chain
            .run(ConversationalRequest::new("q", "Human: hi\nAssistant: hello"))
            .await
            .unwrap();
        let prompts = generator.prompts();
        assert!(prompts[1].starts_with("[Human: hi\nAssistant: hello]"));
        assert!(prompts[1].ends_with(":: standalone"));
    }

    #[tokio::test]
    async fn test_history_withheld_from_answer_when_disabled() {
        let generator = Arc::new(MockGenerator::with_response("answer"));
        generator.queue_response("standalone");
        let options = QaOptions {
            qa_template: Some("[{chat_history}] {question}".into()),
            history_in_answer: false,
            ..Default::default()
        };
        let chain = pipeline(generator.clone(), retriever(), options);
        chain
            .run(ConversationalRequest::new("q", "Human: hi"))
            .await
            .unwrap();
        assert_eq!(generator.prompts()[1], "[] standalone");
    }

    #[tokio::test]
    async fn test_each_missing_key_reported() {
        let generator = Arc::new(MockGenerator::new());
        let retriever = retriever();
        let chain = pipeline(generator.clone(), retriever.clone(), QaOptions::default());

        let err = chain
            .call(ChainValues::new().with("chat_history", ""))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Chain error: Missing input key: question");

        let err = chain
            .call(ChainValues::new().with("question", "q"))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Chain error: Missing input key: chat_history"
        );

        assert_eq!(retriever.call_count(), 0);
        assert_eq!(generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_history_rejected_before_calls() {
        let generator = Arc::new(MockGenerator::new());
        let retriever = retriever();
        let chain = pipeline(generator.clone(), retriever.clone(), QaOptions::default());
        let err = chain
            .call(
                ChainValues::new()
                    .with("question", "q")
                    .with("chat_history", 5),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RagError::Chain(ChainError::InvalidInput { .. })
        ));
        assert_eq!(retriever.call_count(), 0);
    }

    #[tokio::test]
    async fn test_null_history_rejected_before_calls() {
        let generator = Arc::new(MockGenerator::with_response("answer"));
        let retriever = retriever();
        let chain = pipeline(generator.clone(), retriever.clone(), QaOptions::default());
        let err = chain
            .call(
                ChainValues::new()
                    .with("question", "q")
                    .with("chat_history", Value::Null),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RagError::Chain(ChainError::InvalidInput { ref key, .. }) if key == "chat_history"
        ));
        assert_eq!(retriever.call_count(), 0);
        assert_eq!(generator.call_count(), 0);
    }

    #[test]
    fn test_keys_and_type() {
        let chain = pipeline(
            Arc::new(MockGenerator::new()),
            retriever(),
            QaOptions::default().with_source_documents(true),
        );
        assert_eq!(
            chain.input_keys(),
            vec!["question".to_string(), "chat_history".to_string()]
        );
        assert_eq!(chain.output_keys().len(), 2);
        assert_eq!(chain.chain_type(), "conversational_retrieval_chain");
        assert!(chain.serialize().is_err());
    }

    #[test]
    fn test_bogus_chain_type() {
        let result = ConversationalRetrievalQaChain::from_llm(
            Arc::new(MockGenerator::new()),
            retriever(),
            &QaOptions::default().with_chain_type("bogus"),
        );
        assert!(matches!(
            result,
            Err(RagError::Chain(ChainError::UnknownChainType { .. }))
        ));
    }
}
