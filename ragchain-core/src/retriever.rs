//! The retriever capability and two reference implementations.
//!
//! Real deployments plug in a vector store behind [`Retriever`]. The in-memory
//! retriever here uses a hashed bag-of-words embedding with cosine similarity,
//! which is enough for small local corpora and for exercising the pipelines.

use crate::error::RetrievalError;
use crate::types::Document;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Trait for document retrieval backends.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Return documents relevant to `query`, most relevant first.
    async fn get_relevant_documents(&self, query: &str) -> Result<Vec<Document>, RetrievalError>;
}

// ---------------------------------------------------------------------------
// Static retriever
// ---------------------------------------------------------------------------

/// Returns the same documents for every query and records each query.
#[derive(Default)]
pub struct StaticRetriever {
    documents: Vec<Document>,
    queries: Mutex<Vec<String>>,
    failure: Option<String>,
}

impl StaticRetriever {
    pub fn new(documents: Vec<Document>) -> Self {
        Self {
            documents,
            queries: Mutex::new(Vec::new()),
            failure: None,
        }
    }

    /// A retriever whose every call fails with a backend error.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            documents: Vec::new(),
            queries: Mutex::new(Vec::new()),
            failure: Some(message.into()),
        }
    }

    /// Queries received so far, in arrival order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn get_relevant_documents(&self, query: &str) -> Result<Vec<Document>, RetrievalError> {
        self.queries.lock().unwrap().push(query.to_string());
        if let Some(message) = &self.failure {
            return Err(RetrievalError::Backend {
                message: message.clone(),
            });
        }
        Ok(self.documents.clone())
    }
}

// ---------------------------------------------------------------------------
// In-memory similarity retriever
// ---------------------------------------------------------------------------

/// A minimal bag-of-words embedder using term frequency.
#[derive(Debug, Clone)]
pub struct SimpleEmbedder {
    dimensions: usize,
}

impl SimpleEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// Generate an embedding from text.
    ///
    /// Each word is hashed to a dimension index and its TF is accumulated.
    /// The resulting vector is L2-normalised.
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        let lowered = text.to_lowercase();
        let mut tf: HashMap<&str, usize> = HashMap::new();
        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            *tf.entry(word).or_insert(0) += 1;
        }
        if tf.is_empty() {
            return vector;
        }

        for (term, count) in &tf {
            let idx = simple_hash(term) % self.dimensions;
            vector[idx] += *count as f32;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

fn simple_hash(s: &str) -> usize {
    let mut hash: usize = 5381;
    for b in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(b as usize);
    }
    hash
}

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Holds documents in memory and ranks them against the query by cosine similarity.
pub struct InMemoryRetriever {
    embedder: SimpleEmbedder,
    entries: Vec<(Document, Vec<f32>)>,
    top_k: usize,
    min_score: f32,
}

impl InMemoryRetriever {
    pub fn new(top_k: usize, min_score: f32, dimensions: usize) -> Self {
        Self {
            embedder: SimpleEmbedder::new(dimensions),
            entries: Vec::new(),
            top_k,
            min_score,
        }
    }

    pub fn from_settings(settings: &crate::config::RetrieverSettings) -> Self {
        Self::new(settings.top_k, settings.min_score, settings.dimensions)
    }

    pub fn add_document(&mut self, document: Document) {
        let embedding = self.embedder.embed(document.content());
        self.entries.push((document, embedding));
    }

    pub fn add_documents(&mut self, documents: impl IntoIterator<Item = Document>) {
        for doc in documents {
            self.add_document(doc);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rank stored documents against `query`, returning `(index, score)` pairs.
    ///
    /// Ties keep insertion order.
    pub fn score(&self, query: &str) -> Vec<(usize, f32)> {
        let q = self.embedder.embed(query);
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, (_, emb))| (i, cosine_similarity(&q, emb)))
            .filter(|(_, s)| *s >= self.min_score)
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(self.top_k);
        scored
    }
}

#[async_trait]
impl Retriever for InMemoryRetriever {
    async fn get_relevant_documents(&self, query: &str) -> Result<Vec<Document>, RetrievalError> {
        if query.trim().is_empty() {
            return Err(RetrievalError::InvalidQuery {
                reason: "query is empty".to_string(),
            });
        }
        let ranked = self.score(query);
        debug!(
            candidates = self.entries.len(),
            returned = ranked.len(),
            "In-memory retrieval"
        );
        Ok(ranked
            .into_iter()
            .map(|(i, _)| self.entries[i].0.clone())
            .collect())
    }
}
