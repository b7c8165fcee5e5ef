//! Storage backends for the knowledge base and the learning records.
//!
//! Two seams cover everything the pipeline persists:
//!
//! ```text
//!              ┌──────────────────┐   ┌──────────────────┐
//!              │  KnowledgeStore  │   │  LearningStore   │
//!              │ chunks + vectors │   │ conversations /  │
//!              │ nearest-neighbor │   │ profiles /       │
//!              └────────┬─────────┘   │ contents         │
//!                       │             └────────┬─────────┘
//!            ┌──────────┴─────────┐            │
//!            ▼                    ▼            ▼
//!     ┌─────────────┐      ┌─────────────────────┐
//!     │ SqliteStore │      │     MemoryStore     │
//!     │ sqlite-vec  │      │ brute-force L2,     │
//!     │             │      │ tests/embedded use  │
//!     └─────────────┘      └─────────────────────┘
//! ```
//!
//! `SqliteStore` implements both seams over one database file. Chunk rows
//! are immutable once written; conversation history is the only mutable
//! record and is always rewritten whole.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde_json::Value;

use crate::types::{Turn, TutorError};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// One nearest-neighbor hit, ascending `distance` means more relevant.
#[derive(Clone, Debug)]
pub struct ScoredChunk {
    pub id: i64,
    pub content: String,
    pub metadata: Value,
    pub distance: f32,
}

/// Insert payload for one personalized content row.
#[derive(Clone, Debug)]
pub struct ContentRow {
    pub conversation_id: i64,
    pub analysis_id: i64,
    pub subtopic: String,
    pub level: String,
    pub content_format: String,
    pub title: String,
    pub script: String,
    pub extra_metadata: Value,
}

/// Vector-search-capable chunk store.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Persists one chunk with its embedding; inserts are independent of
    /// each other (no batch transaction).
    async fn insert_chunk(
        &self,
        content: &str,
        metadata: &Value,
        embedding: &[f32],
    ) -> Result<i64, TutorError>;

    /// Dedup probe on the `(source, type)` natural key: `true` when at
    /// least one chunk of this source and type already exists.
    async fn has_source(&self, source: &str, doc_type: &str) -> Result<bool, TutorError>;

    /// The `k` nearest chunks to `embedding`, ascending by distance.
    async fn search_similar(
        &self,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, TutorError>;

    async fn count(&self) -> Result<usize, TutorError>;
}

/// Relational records: conversations, analysis profiles, generated content.
#[async_trait]
pub trait LearningStore: Send + Sync {
    async fn create_conversation(&self) -> Result<i64, TutorError>;

    /// `None` when the conversation id does not resolve.
    async fn load_history(&self, conversation_id: i64) -> Result<Option<Vec<Turn>>, TutorError>;

    /// Full overwrite of the stored history.
    async fn save_history(&self, conversation_id: i64, history: &[Turn]) -> Result<(), TutorError>;

    async fn insert_profile(
        &self,
        conversation_id: i64,
        preferred_format: Option<&str>,
        raw_history: &Value,
        assessments: &Value,
    ) -> Result<i64, TutorError>;

    async fn insert_content(&self, row: &ContentRow) -> Result<i64, TutorError>;
}
