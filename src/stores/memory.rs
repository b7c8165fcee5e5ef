//! In-memory backend with the same ordering semantics as the SQLite store.
//!
//! Nearest-neighbor search is a brute-force L2 scan with insertion-order
//! tie-break, which keeps test assertions deterministic.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{ContentRow, KnowledgeStore, LearningStore, ScoredChunk};
use crate::types::{Turn, TutorError};

#[derive(Default)]
struct Inner {
    docs: Vec<DocRow>,
    next_doc_id: i64,
    conversations: HashMap<i64, Vec<Turn>>,
    next_conversation_id: i64,
    profiles: Vec<ProfileRow>,
    contents: Vec<ContentRow>,
}

struct DocRow {
    id: i64,
    content: String,
    metadata: Value,
    embedding: Vec<f32>,
}

#[allow(dead_code)]
struct ProfileRow {
    id: i64,
    conversation_id: i64,
    preferred_format: Option<String>,
    raw_history: Value,
    assessments: Value,
}

/// Both store seams over process memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted content rows; test visibility.
    pub fn content_rows(&self) -> usize {
        self.inner.lock().contents.len()
    }

    /// Number of persisted analysis profiles; test visibility.
    pub fn profile_rows(&self) -> usize {
        self.inner.lock().profiles.len()
    }
}

#[async_trait]
impl KnowledgeStore for MemoryStore {
    async fn insert_chunk(
        &self,
        content: &str,
        metadata: &Value,
        embedding: &[f32],
    ) -> Result<i64, TutorError> {
        let mut inner = self.inner.lock();
        inner.next_doc_id += 1;
        let id = inner.next_doc_id;
        inner.docs.push(DocRow {
            id,
            content: content.to_string(),
            metadata: metadata.clone(),
            embedding: embedding.to_vec(),
        });
        Ok(id)
    }

    async fn has_source(&self, source: &str, doc_type: &str) -> Result<bool, TutorError> {
        let inner = self.inner.lock();
        Ok(inner
            .docs
            .iter()
            .any(|doc| doc.metadata["source"] == source && doc.metadata["type"] == doc_type))
    }

    async fn search_similar(
        &self,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, TutorError> {
        let inner = self.inner.lock();
        let mut scored: Vec<ScoredChunk> = inner
            .docs
            .iter()
            .map(|doc| ScoredChunk {
                id: doc.id,
                content: doc.content.clone(),
                metadata: doc.metadata.clone(),
                distance: l2_distance(&doc.embedding, embedding),
            })
            .collect();
        scored.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn count(&self) -> Result<usize, TutorError> {
        Ok(self.inner.lock().docs.len())
    }
}

#[async_trait]
impl LearningStore for MemoryStore {
    async fn create_conversation(&self) -> Result<i64, TutorError> {
        let mut inner = self.inner.lock();
        inner.next_conversation_id += 1;
        let id = inner.next_conversation_id;
        inner.conversations.insert(id, Vec::new());
        Ok(id)
    }

    async fn load_history(&self, conversation_id: i64) -> Result<Option<Vec<Turn>>, TutorError> {
        Ok(self.inner.lock().conversations.get(&conversation_id).cloned())
    }

    async fn save_history(&self, conversation_id: i64, history: &[Turn]) -> Result<(), TutorError> {
        let mut inner = self.inner.lock();
        match inner.conversations.get_mut(&conversation_id) {
            Some(stored) => {
                *stored = history.to_vec();
                Ok(())
            }
            None => Err(TutorError::Storage(format!(
                "conversation {conversation_id} does not exist"
            ))),
        }
    }

    async fn insert_profile(
        &self,
        conversation_id: i64,
        preferred_format: Option<&str>,
        raw_history: &Value,
        assessments: &Value,
    ) -> Result<i64, TutorError> {
        let mut inner = self.inner.lock();
        let id = inner.profiles.len() as i64 + 1;
        inner.profiles.push(ProfileRow {
            id,
            conversation_id,
            preferred_format: preferred_format.map(str::to_string),
            raw_history: raw_history.clone(),
            assessments: assessments.clone(),
        });
        Ok(id)
    }

    async fn insert_content(&self, row: &ContentRow) -> Result<i64, TutorError> {
        let mut inner = self.inner.lock();
        let id = inner.contents.len() as i64 + 1;
        inner.contents.push(row.clone());
        Ok(id)
    }
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn search_orders_by_distance_with_insertion_tie_break() {
        let store = MemoryStore::new();
        store
            .insert_chunk("longe", &json!({"source": "a", "type": "text"}), &[10.0, 0.0])
            .await
            .unwrap();
        store
            .insert_chunk("perto", &json!({"source": "a", "type": "text"}), &[1.0, 0.0])
            .await
            .unwrap();
        store
            .insert_chunk("empate", &json!({"source": "a", "type": "text"}), &[1.0, 0.0])
            .await
            .unwrap();

        let hits = store.search_similar(&[0.0, 0.0], 3).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].content, "perto");
        assert_eq!(hits[1].content, "empate");
        assert_eq!(hits[2].content, "longe");
        assert!(hits[0].distance <= hits[1].distance);
        assert!(hits[0].id < hits[1].id);

        let truncated = store.search_similar(&[0.0, 0.0], 1).await.unwrap();
        assert_eq!(truncated.len(), 1);
    }

    #[tokio::test]
    async fn has_source_matches_on_the_natural_key() {
        let store = MemoryStore::new();
        store
            .insert_chunk("x", &json!({"source": "aula.pdf", "type": "pdf"}), &[0.0])
            .await
            .unwrap();

        assert!(store.has_source("aula.pdf", "pdf").await.unwrap());
        assert!(!store.has_source("aula.pdf", "text").await.unwrap());
        assert!(!store.has_source("outra.pdf", "pdf").await.unwrap());
    }

    #[tokio::test]
    async fn history_round_trips_and_unknown_ids_are_none() {
        let store = MemoryStore::new();
        let id = store.create_conversation().await.unwrap();
        assert_eq!(store.load_history(id).await.unwrap(), Some(vec![]));

        let history = vec![Turn::new("p1", "r1"), Turn::new("p2", "r2")];
        store.save_history(id, &history).await.unwrap();
        assert_eq!(store.load_history(id).await.unwrap(), Some(history));

        assert_eq!(store.load_history(999).await.unwrap(), None);
        assert!(store.save_history(999, &[]).await.is_err());
    }
}
