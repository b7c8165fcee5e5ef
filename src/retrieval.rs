//! Query-time retrieval and prompt-context rendering.
//!
//! The rendered block format is consumed verbatim inside completion
//! prompts: a numbered `Trecho` header with pipe-delimited provenance,
//! the raw chunk content, and a dashed rule between blocks. Treat it as a
//! wire format, not display formatting.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::providers::embeddings::EmbeddingProvider;
use crate::stores::{KnowledgeStore, ScoredChunk};
use crate::types::TutorError;

/// Fixed sentinel returned when retrieval finds nothing; callers can
/// compare against it to distinguish "no grounding" from real context.
pub const EMPTY_CONTEXT: &str =
    "Nenhum trecho relevante foi encontrado na base de conhecimento.";

const RULE_WIDTH: usize = 80;

/// Thin query-time wrapper: embed the query, fetch the nearest chunks.
pub struct Retriever {
    embeddings: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn KnowledgeStore>,
}

impl Retriever {
    pub fn new(embeddings: Arc<dyn EmbeddingProvider>, store: Arc<dyn KnowledgeStore>) -> Self {
        Self { embeddings, store }
    }

    /// Top-`k` chunks nearest to `query`, ascending by distance.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>, TutorError> {
        let vectors = self.embeddings.embed_batch(&[query.to_string()]).await?;
        let query_vector = vectors
            .first()
            .ok_or_else(|| TutorError::upstream("embedding", "no vector returned for query"))?;
        let results = self.store.search_similar(query_vector, k).await?;
        debug!(k, hits = results.len(), "retrieved context");
        Ok(results)
    }
}

/// Renders retrieval results into the grounding-context string.
pub fn render_context(results: &[ScoredChunk]) -> String {
    if results.is_empty() {
        return EMPTY_CONTEXT.to_string();
    }

    let blocks: Vec<String> = results
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let metadata = normalized_metadata(&chunk.metadata);
            let mut header = vec![format!("Trecho {}", i + 1)];
            if let Some(title) = non_empty_field(&metadata, "title") {
                header.push(format!("título: {title}"));
            }
            if let Some(source) = non_empty_field(&metadata, "source") {
                header.push(format!("fonte: {source}"));
            }
            if let Some(doc_type) = non_empty_field(&metadata, "type") {
                header.push(format!("tipo: {doc_type}"));
            }
            format!("{}\n{}", header.join(" | "), chunk.content)
        })
        .collect();

    let rule = format!("\n{}\n\n", "-".repeat(RULE_WIDTH));
    format!("\n\n{}", blocks.join(&rule))
}

/// Metadata may arrive double-encoded as a JSON string; unwrap it.
fn normalized_metadata(metadata: &Value) -> Value {
    match metadata {
        Value::String(raw) => serde_json::from_str(raw).unwrap_or(Value::Null),
        other => other.clone(),
    }
}

fn non_empty_field(metadata: &Value, key: &str) -> Option<String> {
    metadata
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
