//! Ingestion pipeline: classify, dedup, extract, chunk, embed, persist.
//!
//! Re-ingestion is idempotent at the granularity of "this source file
//! already has at least one chunk of this type". The probe runs before
//! any extraction so duplicate uploads never pay for transcription.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::chunking::Chunker;
use crate::extract::{DocKind, Extractor, file_name, source_metadata};
use crate::providers::embeddings::EmbeddingProvider;
use crate::stores::KnowledgeStore;
use crate::types::TutorError;

/// Why an ingest call persisted nothing. None of these are errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyIngested,
    NoTextExtracted,
    NoChunksGenerated,
}

/// Outcome of one ingest call.
#[derive(Clone, Debug, Serialize)]
pub struct IngestReport {
    pub skipped: bool,
    pub reason: Option<SkipReason>,
    pub inserted_chunks: usize,
    pub metadata: Value,
}

impl IngestReport {
    fn skip(reason: SkipReason, metadata: Value) -> Self {
        Self {
            skipped: true,
            reason: Some(reason),
            inserted_chunks: 0,
            metadata,
        }
    }
}

/// Turns one source file into persisted, embedded chunks.
pub struct IngestionPipeline {
    extractor: Arc<dyn Extractor>,
    embeddings: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn KnowledgeStore>,
    chunker: Chunker,
}

impl IngestionPipeline {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        embeddings: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn KnowledgeStore>,
    ) -> Self {
        Self {
            extractor,
            embeddings,
            store,
            chunker: Chunker::default(),
        }
    }

    #[must_use]
    pub fn with_chunker(mut self, chunker: Chunker) -> Self {
        self.chunker = chunker;
        self
    }

    /// Ingests `path`, reporting either the inserted chunk count or the
    /// reason nothing was persisted.
    pub async fn ingest(
        &self,
        path: &Path,
        title: Option<&str>,
    ) -> Result<IngestReport, TutorError> {
        let kind = DocKind::classify(path)?;
        let source = file_name(path);

        // The dedup key is (source filename, type) only; same name with
        // different content is skipped.
        if self.store.has_source(&source, kind.as_str()).await? {
            debug!(source, kind = kind.as_str(), "already ingested");
            return Ok(IngestReport::skip(
                SkipReason::AlreadyIngested,
                source_metadata(path, title, kind),
            ));
        }

        let extraction = self.extractor.extract(path, title).await?;
        let text = extraction.text.trim();
        if text.is_empty() {
            return Ok(IngestReport::skip(
                SkipReason::NoTextExtracted,
                extraction.metadata,
            ));
        }

        let chunks = self.chunker.split(text);
        if chunks.is_empty() {
            return Ok(IngestReport::skip(
                SkipReason::NoChunksGenerated,
                extraction.metadata,
            ));
        }

        // One batch call, order-preserving; a failure here aborts before
        // anything is written.
        let vectors = self.embeddings.embed_batch(&chunks).await?;

        // Inserts are independent; a mid-batch failure leaves the chunks
        // already written in place.
        let mut inserted = 0usize;
        for (chunk, vector) in chunks.iter().zip(&vectors) {
            self.store
                .insert_chunk(chunk, &extraction.metadata, vector)
                .await?;
            inserted += 1;
        }

        info!(source, kind = kind.as_str(), inserted, "ingested source");
        Ok(IngestReport {
            skipped: false,
            reason: None,
            inserted_chunks: inserted,
            metadata: extraction.metadata,
        })
    }
}
