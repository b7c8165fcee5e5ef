//! ```text
//! Source files ──► extract::MediaExtractor ──► (text, metadata)
//!                                   │
//! (text) ──► chunking::Chunker ──► chunk strings
//!                                   │
//! chunk strings ──► providers::embeddings ──► vectors ──► stores::KnowledgeStore
//!
//! Learner question ──► retrieval::Retriever ──► context blocks
//!                                   │
//! context + history ──► conversation::ConversationManager ──► next turn
//!                                   │
//! full history ──► analysis::AnalysisEngine ──► competence assessments
//!                                   │
//! weakest tier ──► content::ContentGenerator ──► personalized scripts
//!
//! orchestrator::Orchestrator sequences ingest / chat / analyze-and-generate.
//! ```
//!
pub mod analysis;
pub mod chunking;
pub mod config;
pub mod content;
pub mod conversation;
pub mod extract;
pub mod ingestion;
pub mod orchestrator;
pub mod providers;
pub mod retrieval;
pub mod stores;
pub mod types;

pub use analysis::AnalysisEngine;
pub use chunking::{Chunker, ChunkerConfig};
pub use config::Settings;
pub use content::ContentGenerator;
pub use conversation::{ChatOutcome, ConversationManager};
pub use extract::{DocKind, Extraction, Extractor, MediaExtractor};
pub use ingestion::{IngestReport, IngestionPipeline, SkipReason};
pub use orchestrator::{AnalysisOutcome, Orchestrator};
pub use retrieval::Retriever;
pub use types::TutorError;
