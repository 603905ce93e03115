//! Fundamental data types: retrieved documents and the chain value envelope.

use crate::error::ChainError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Envelope key under which source documents are returned.
pub const SOURCE_DOCUMENTS_KEY: &str = "sourceDocuments";

/// An immutable unit of retrieved content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "pageContent")]
    page_content: String,
    #[serde(default)]
    metadata: HashMap<String, Value>,
}

impl Document {
    /// Create a document with no metadata.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            page_content: content.into(),
            metadata: HashMap::new(),
        }
    }

    /// Create a document with metadata.
    pub fn with_metadata(content: impl Into<String>, metadata: HashMap<String, Value>) -> Self {
        Self {
            page_content: content.into(),
            metadata,
        }
    }

    pub fn content(&self) -> &str {
        &self.page_content
    }

    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }

    /// Look up a metadata value by key.
    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }
}

/// Ordered mapping from string keys to arbitrary values.
///
/// Used as the input and output envelope for every chain. Insertion order is
/// preserved so that output envelopes render deterministically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainValues {
    inner: Map<String, Value>,
}

impl ChainValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.inner.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.inner.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.inner.shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.inner.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Fetch a required key, failing with `MissingInputKey` if absent.
    pub fn require(&self, key: &str) -> Result<&Value, ChainError> {
        self.inner.get(key).ok_or_else(|| ChainError::missing_key(key))
    }

    /// Fetch a required key that must hold a string.
    pub fn require_str(&self, key: &str) -> Result<&str, ChainError> {
        self.require(key)?
            .as_str()
            .ok_or_else(|| ChainError::InvalidInput {
                key: key.to_string(),
                reason: "expected a string".to_string(),
            })
    }

    /// Fetch an optional key as a string, rendering non-string values as JSON.
    pub fn get_text(&self, key: &str) -> Option<String> {
        self.inner.get(key).map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Every key from `keys` that is not present, in the given order.
    pub fn missing_keys<'a>(&self, keys: &[&'a str]) -> Vec<&'a str> {
        keys.iter()
            .copied()
            .filter(|k| !self.inner.contains_key(*k))
            .collect()
    }

    /// Merge another envelope into this one; later keys overwrite earlier ones.
    pub fn extend(&mut self, other: ChainValues) {
        for (k, v) in other.inner {
            self.inner.insert(k, v);
        }
    }

    /// Attach documents under [`SOURCE_DOCUMENTS_KEY`].
    pub fn insert_documents(&mut self, documents: &[Document]) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(documents)?;
        self.inner.insert(SOURCE_DOCUMENTS_KEY.to_string(), value);
        Ok(())
    }

    /// Read documents back from [`SOURCE_DOCUMENTS_KEY`], if present.
    pub fn source_documents(&self) -> Option<Result<Vec<Document>, serde_json::Error>> {
        self.inner
            .get(SOURCE_DOCUMENTS_KEY)
            .map(|v| serde_json::from_value(v.clone()))
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.inner
    }
}

impl From<Map<String, Value>> for ChainValues {
    fn from(inner: Map<String, Value>) -> Self {
        Self { inner }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ChainValues {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut values = ChainValues::new();
        for (k, v) in iter {
            values.insert(k, v);
        }
        values
    }
}

impl IntoIterator for ChainValues {
    type Item = (String, Value);
    type IntoIter = serde_json::map::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_document_accessors() {
        let mut meta = HashMap::new();
        meta.insert("source".to_string(), json!("speech.txt"));
        let doc = Document::with_metadata("Justice Breyer", meta);
        assert_eq!(doc.content(), "Justice Breyer");
        assert_eq!(doc.meta("source"), Some(&json!("speech.txt")));
        assert!(doc.meta("page").is_none());
    }

    #[test]
    fn test_document_serializes_page_content() {
        let doc = Document::new("hello");
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value, json!({"pageContent": "hello", "metadata": {}}));
    }

    #[test]
    fn test_require_missing_key() {
        let values = ChainValues::new().with("question", "hi");
        let err = values.require("query").unwrap_err();
        assert!(matches!(err, ChainError::MissingInputKey { ref key } if key == "query"));
    }

    #[test]
    fn test_require_str_rejects_non_string() {
        let values = ChainValues::new().with("query", 42);
        let err = values.require_str("query").unwrap_err();
        assert!(matches!(err, ChainError::InvalidInput { .. }));
    }

    #[test]
    fn test_missing_keys_reports_each() {
        let values = ChainValues::new().with("other", 1);
        assert_eq!(
            values.missing_keys(&["question", "chat_history"]),
            vec!["question", "chat_history"]
        );
    }

    #[test]
    fn test_insertion_order_preserved() {
        let values = ChainValues::new()
            .with("zeta", 1)
            .with("alpha", 2)
            .with("mid", 3);
        let keys: Vec<&str> = values.keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_source_documents_roundtrip() {
        let docs = vec![Document::new("a"), Document::new("b")];
        let mut values = ChainValues::new();
        values.insert_documents(&docs).unwrap();
        let back = values.source_documents().unwrap().unwrap();
        assert_eq!(back, docs);
    }

    #[test]
    fn test_get_text_renders_json() {
        let values = ChainValues::new().with("n", 3).with("s", "x");
        assert_eq!(values.get_text("n").as_deref(), Some("3"));
        assert_eq!(values.get_text("s").as_deref(), Some("x"));
        assert!(values.get_text("missing").is_none());
    }
}
