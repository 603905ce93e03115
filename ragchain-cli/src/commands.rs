//! CLI subcommand handlers.

use crate::documents::load_directory;
use crate::{Commands, ConfigAction};
use anyhow::Context;
use ragchain_core::config::{RagConfig, load_config};
use ragchain_core::error::ConfigError;
use ragchain_core::qa::{
    ConversationalRequest, ConversationalRetrievalQaChain, PipelineConfig, RetrievalQaChain,
};
use ragchain_core::{
    Chain, ChainValues, ChatHistory, ConversationTurn, InMemoryRetriever, Retriever,
    create_generator,
};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Ask {
            query,
            docs,
            chain_type,
            sources,
            json,
        } => handle_ask(workspace, &query, docs.as_deref(), chain_type, sources, json).await,
        Commands::Chat { docs, chain_type } => {
            handle_chat(workspace, docs.as_deref(), chain_type).await
        }
        Commands::Config { action } => handle_config(action, workspace).await,
    }
}

/// Load configuration and apply command-line overrides. The chain type is
/// checked here so a bad value fails before any client is built.
fn prepare_config(workspace: &Path, chain_type: Option<String>) -> anyhow::Result<RagConfig> {
    let mut config = load_config(Some(workspace), None).map_err(ConfigError::from)?;
    if let Some(chain_type) = chain_type {
        config.pipeline.chain_type = chain_type;
    }
    config.pipeline.strategy()?;
    for warning in config.generator.validate() {
        warn!("{}", warning);
    }
    Ok(config)
}

async fn build_retriever(
    workspace: &Path,
    docs: Option<&Path>,
    config: &RagConfig,
) -> anyhow::Result<Arc<dyn Retriever>> {
    let mut store = InMemoryRetriever::from_settings(&config.retriever);
    match docs {
        Some(dir) => {
            let dir = workspace.join(dir);
            let documents = load_directory(&dir)
                .await
                .with_context(|| format!("Failed to load documents from {}", dir.display()))?;
            info!(count = documents.len(), "Indexed documents");
            store.add_documents(documents);
        }
        None => warn!("No --docs directory given; answering without retrieved context"),
    }
    Ok(Arc::new(store))
}

async fn handle_ask(
    workspace: &Path,
    query: &str,
    docs: Option<&Path>,
    chain_type: Option<String>,
    sources: bool,
    json: bool,
) -> anyhow::Result<()> {
    let mut config = prepare_config(workspace, chain_type)?;
    if sources {
        config.pipeline.return_source_documents = true;
    }

    let generator = create_generator(&config.generator)?;
    let retriever = build_retriever(workspace, docs, &config).await?;
    let chain = RetrievalQaChain::from_config(&config, generator, retriever)?;

    let inputs = ChainValues::new().with(chain.config().input_key.clone(), query);
    let outputs = chain.call(inputs).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outputs)?);
    } else {
        println!("{}", render_answer(&outputs, chain.config())?);
    }
    Ok(())
}

/// Format an output envelope for the terminal: the answer, then any sources.
fn render_answer(outputs: &ChainValues, config: &PipelineConfig) -> anyhow::Result<String> {
    let mut rendered = outputs.get_text(&config.output_key).unwrap_or_default();
    if let Some(documents) = outputs.source_documents() {
        let documents = documents?;
        rendered.push_str("\n\nSources:");
        for doc in &documents {
            let label = match doc.meta("source").and_then(|v| v.as_str()) {
                Some(source) => source.to_string(),
                None => doc.content().chars().take(60).collect(),
            };
            rendered.push_str(&format!("\n  - {}", label));
        }
    }
    Ok(rendered)
}

async fn handle_chat(
    workspace: &Path,
    docs: Option<&Path>,
    chain_type: Option<String>,
) -> anyhow::Result<()> {
    let config = prepare_config(workspace, chain_type)?;
    let generator = create_generator(&config.generator)?;
    let retriever = build_retriever(workspace, docs, &config).await?;
    let chain = ConversationalRetrievalQaChain::from_config(&config, generator, retriever)?;

    println!("Ask a question (type 'exit' to quit).");
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    let history = run_chat(&chain, stdin, &mut stdout).await?;
    info!(turns = turn_count(&history), "Chat session ended");
    Ok(())
}

/// Read questions line by line, answering each with the accumulated history.
///
/// A failed turn is reported and left out of the history; the session goes on.
pub async fn run_chat<R, W>(
    chain: &ConversationalRetrievalQaChain,
    input: R,
    out: &mut W,
) -> anyhow::Result<ChatHistory>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut history = ChatHistory::empty();
    let mut lines = input.lines();

    write!(out, "> ")?;
    out.flush()?;
    while let Some(line) = lines.next_line().await? {
        let question = line.trim();
        if matches!(question, "exit" | "quit") {
            break;
        }
        if !question.is_empty() {
            let request = ConversationalRequest::new(question, history.clone());
            match chain.run(request).await {
                Ok(response) => {
                    writeln!(out, "{}\n", response.text)?;
                    history.push_turn(ConversationTurn::new(question, response.text));
                }
                Err(e) => {
                    warn!(error = %e, "Chat turn failed");
                    writeln!(out, "Error: {}\n", e)?;
                }
            }
        }
        write!(out, "> ")?;
        out.flush()?;
    }
    Ok(history)
}

fn turn_count(history: &ChatHistory) -> usize {
    match history {
        ChatHistory::Turns(turns) => turns.len(),
        ChatHistory::Transcript(text) => text.matches("Human: ").count(),
    }
}

async fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".ragchain");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&RagConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(Some(workspace), None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use ragchain_core::qa::QaOptions;
    use ragchain_core::{Document, MockGenerator, StaticRetriever};
    use serde_json::json;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn chat_chain(generator: Arc<MockGenerator>) -> ConversationalRetrievalQaChain {
        ConversationalRetrievalQaChain::from_llm(
            generator,
            Arc::new(StaticRetriever::new(vec![Document::new("Breyer retired.")])),
            &QaOptions::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_run_chat_accumulates_history() {
        let generator = Arc::new(MockGenerator::with_response("He retired."));
        let chain = chat_chain(generator.clone());
        let input: &[u8] = b"Who is Breyer?\n\nDid he retire?\nexit\nignored\n";
        let mut out = Vec::new();

        let history = run_chat(&chain, input, &mut out).await.unwrap();

        assert_eq!(turn_count(&history), 2);
        // First question: answer only. Second: rewrite + answer.
        assert_eq!(generator.call_count(), 3);
        let printed = String::from_utf8(out).unwrap();
        assert_eq!(printed.matches("He retired.").count(), 2);
        assert!(!printed.contains("ignored"));
    }

    #[tokio::test]
    async fn test_run_chat_reports_errors_and_continues() {
        let generator = Arc::new(MockGenerator::with_response("fine"));
        generator.fail_when("Question: boom", "quota exceeded");
        let chain = chat_chain(generator.clone());
        let input: &[u8] = b"boom\nok\n";
        let mut out = Vec::new();

        let history = run_chat(&chain, input, &mut out).await.unwrap();

        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("Error: Generation error: API request failed: quota exceeded"));
        assert_eq!(turn_count(&history), 1);
    }

    #[test]
    fn test_render_answer_with_sources() {
        let mut meta = HashMap::new();
        meta.insert("source".to_string(), json!("speech.txt"));
        let docs = vec![
            Document::with_metadata("Breyer text", meta),
            Document::new("unlabelled passage"),
        ];
        let mut outputs = ChainValues::new().with("result", "The answer.");
        outputs.insert_documents(&docs).unwrap();

        let rendered = render_answer(&outputs, &PipelineConfig::new("query")).unwrap();
        assert_eq!(
            rendered,
            "The answer.\n\nSources:\n  - speech.txt\n  - unlabelled passage"
        );
    }

    #[tokio::test]
    async fn test_ask_rejects_unknown_chain_type() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Ask {
            query: "q".into(),
            docs: None,
            chain_type: Some("bogus".into()),
            sources: false,
            json: false,
        };
        let err = handle_command(command, dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("Unknown chain type bogus"));
    }

    #[tokio::test]
    async fn test_config_init_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();

        handle_command(
            Commands::Config {
                action: ConfigAction::Init,
            },
            workspace,
        )
        .await
        .unwrap();
        let config_path = workspace.join(".ragchain").join("config.toml");
        std::fs::write(&config_path, "[pipeline]\nchain_type = \"map_reduce_documents_chain\"\n")
            .unwrap();

        handle_command(
            Commands::Config {
                action: ConfigAction::Init,
            },
            workspace,
        )
        .await
        .unwrap();
        let content = std::fs::read_to_string(&config_path).unwrap();
        assert!(content.contains("map_reduce_documents_chain"));
    }

    #[tokio::test]
    async fn test_config_show_defaults() {
        let dir = TempDir::new().unwrap();
        let result = handle_command(
            Commands::Config {
                action: ConfigAction::Show,
            },
            dir.path(),
        )
        .await;
        assert!(result.is_ok());
    }
}
