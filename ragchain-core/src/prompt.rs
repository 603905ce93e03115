//! Prompt templates with `{variable}` placeholders.
//!
//! `{{` and `}}` render as literal braces. Variables are collected in order of
//! first appearance so callers can tell which inputs a template consumes.

use crate::error::ChainError;
use crate::types::ChainValues;
use handlebars::{Handlebars, RenderErrorReason};
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// Rewrites a follow-up question into a standalone question.
pub const QUESTION_GENERATOR_TEMPLATE: &str = "Given the following conversation and a follow up question, rephrase the follow up question to be a standalone question.

Chat History:
{chat_history}
Follow Up Input: {question}
Standalone question:";

/// Answers a question over the full concatenated context.
pub const STUFF_QA_TEMPLATE: &str = "Use the following pieces of context to answer the question at the end. If you don't know the answer, just say that you don't know, don't try to make up an answer.

{context}

Question: {question}
Helpful Answer:";

/// Extracts the relevant part of a single document.
pub const MAP_QA_TEMPLATE: &str = "Use the following portion of a long document to see if any of the text is relevant to answer the question.
Return any relevant text verbatim.
{context}
Question: {question}
Relevant text, if any:";

/// Combines per-document extracts into a final answer.
pub const REDUCE_QA_TEMPLATE: &str = "Given the following extracted parts of a long document and a question, create a final answer.
If you don't know the answer, just say that you don't know. Don't try to make up an answer.

QUESTION: {question}
=========
{summaries}
=========
FINAL ANSWER:";

/// Renders every template. Strict mode turns an absent variable into an error
/// instead of an empty string, and prompts are plain text so nothing is escaped.
static REGISTRY: LazyLock<Handlebars<'static>> = LazyLock::new(|| {
    let mut registry = Handlebars::new();
    registry.set_strict_mode(true);
    registry.register_escape_fn(handlebars::no_escape);
    registry
});

/// A parsed prompt template.
///
/// The `{var}` syntax is compiled to a handlebars source once. Literal runs
/// that contain braces or backslashes are passed in as render data so they can
/// never be read as handlebars syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
    source: String,
    literals: Vec<(String, String)>,
    input_variables: Vec<String>,
}

impl PromptTemplate {
    /// Parse a template string.
    ///
    /// An unmatched `{` is kept literally rather than rejected, so prose that
    /// happens to contain a brace still formats.
    pub fn from_template(template: impl Into<String>) -> Self {
        let template = template.into();
        let mut compiled = Self {
            template: String::new(),
            source: String::new(),
            literals: Vec::new(),
            input_variables: Vec::new(),
        };
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for n in chars.by_ref() {
                        if n == '}' {
                            closed = true;
                            break;
                        }
                        name.push(n);
                    }
                    let valid = closed
                        && !name.is_empty()
                        && name.chars().all(|ch| ch.is_alphanumeric() || ch == '_');
                    if valid {
                        compiled.push_literal(std::mem::take(&mut literal));
                        compiled.push_variable(name);
                    } else {
                        literal.push('{');
                        literal.push_str(&name);
                        if closed {
                            literal.push('}');
                        }
                    }
                }
                other => literal.push(other),
            }
        }
        compiled.push_literal(literal);
        compiled.template = template;
        compiled
    }

    fn push_literal(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        if text.contains(['{', '}', '\\']) {
            let key = format!("literal-{}", self.literals.len());
            self.source.push_str(&format!("{{{{[{key}]}}}}"));
            self.literals.push((key, text));
        } else {
            self.source.push_str(&text);
        }
    }

    fn push_variable(&mut self, name: String) {
        self.source.push_str(&format!("{{{{[{name}]}}}}"));
        if !self.input_variables.contains(&name) {
            self.input_variables.push(name);
        }
    }

    /// The raw template text.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Variables referenced by the template, in order of first appearance.
    pub fn input_variables(&self) -> &[String] {
        &self.input_variables
    }

    pub fn uses(&self, variable: &str) -> bool {
        self.input_variables.iter().any(|v| v == variable)
    }

    /// Fill the template, looking each variable up through `lookup`.
    pub fn format_with<F>(&self, lookup: F) -> Result<String, ChainError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut data = Map::with_capacity(self.input_variables.len() + self.literals.len());
        for name in &self.input_variables {
            let value = lookup(name).ok_or_else(|| ChainError::MissingPromptVariable {
                variable: name.clone(),
            })?;
            data.insert(name.clone(), Value::String(value));
        }
        for (key, text) in &self.literals {
            data.insert(key.clone(), Value::String(text.clone()));
        }

        REGISTRY
            .render_template(&self.source, &data)
            .map_err(|e| match e.reason() {
                RenderErrorReason::MissingVariable(path) => ChainError::MissingPromptVariable {
                    variable: path
                        .as_deref()
                        .unwrap_or_default()
                        .trim_matches(['[', ']'])
                        .to_string(),
                },
                _ => ChainError::Template {
                    message: e.to_string(),
                },
            })
    }

    /// Fill the template from `(name, value)` pairs. Extra pairs are ignored.
    pub fn format(&self, values: &[(&str, &str)]) -> Result<String, ChainError> {
        self.format_with(|name| {
            values
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| (*v).to_string())
        })
    }

    /// Fill the template from an envelope.
    pub fn format_values(&self, values: &ChainValues) -> Result<String, ChainError> {
        self.format_with(|name| values.get_text(name))
    }
}

impl std::fmt::Display for PromptTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.template)
    }
}
