//! Facade sequencing the three user-facing operations: ingest, chat, and
//! analyze-and-generate. The HTTP layer (external to this crate) calls
//! these and translates the error taxonomy into responses.

use std::path::Path;
use std::sync::Arc;

use tracing::instrument;

use crate::analysis::AnalysisEngine;
use crate::config::Settings;
use crate::content::ContentGenerator;
use crate::conversation::{ChatOutcome, ConversationManager};
use crate::extract::{Extractor, MediaExtractor};
use crate::ingestion::{IngestReport, IngestionPipeline};
use crate::providers::completion::{CompletionProvider, GroqCompletions};
use crate::providers::embeddings::{EmbeddingProvider, OpenRouterEmbeddings};
use crate::retrieval::Retriever;
use crate::stores::{KnowledgeStore, LearningStore, SqliteStore};
use crate::types::{CompetenceAssessment, PersonalizedContent, TutorError};

/// Result of `analyze_and_generate`.
#[derive(Clone, Debug)]
pub struct AnalysisOutcome {
    pub analysis_id: i64,
    pub assessments: Vec<CompetenceAssessment>,
    pub contents: Vec<PersonalizedContent>,
}

/// Wires the pipeline components over injected capability seams.
pub struct Orchestrator {
    ingestion: IngestionPipeline,
    conversations: ConversationManager,
    analysis: AnalysisEngine,
    generator: ContentGenerator,
    learning: Arc<dyn LearningStore>,
}

impl Orchestrator {
    /// Assembles the pipeline from explicit seams. The two completion
    /// providers carry the conversational and the content model
    /// respectively.
    pub fn new(
        extractor: Arc<dyn Extractor>,
        embeddings: Arc<dyn EmbeddingProvider>,
        chat_completions: Arc<dyn CompletionProvider>,
        content_completions: Arc<dyn CompletionProvider>,
        knowledge: Arc<dyn KnowledgeStore>,
        learning: Arc<dyn LearningStore>,
    ) -> Self {
        let retriever = Arc::new(Retriever::new(embeddings.clone(), knowledge.clone()));
        Self {
            ingestion: IngestionPipeline::new(extractor, embeddings, knowledge),
            conversations: ConversationManager::new(
                retriever.clone(),
                chat_completions.clone(),
                learning.clone(),
            ),
            analysis: AnalysisEngine::new(chat_completions),
            generator: ContentGenerator::new(retriever, content_completions, learning.clone()),
            learning,
        }
    }

    /// Builds the production stack: media extractor, OpenRouter embeddings,
    /// Groq completions, SQLite storage.
    pub async fn connect(settings: Arc<Settings>) -> Result<Self, TutorError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .build()
            .map_err(|err| TutorError::upstream("http-client", err))?;

        let store = Arc::new(
            SqliteStore::open(&settings.database_path, settings.embedding_dim).await?,
        );
        let extractor = Arc::new(MediaExtractor::new(client.clone(), settings.clone()));
        let embeddings = Arc::new(OpenRouterEmbeddings::new(client.clone(), settings.clone()));
        let chat = Arc::new(GroqCompletions::new(
            client.clone(),
            settings.clone(),
            settings.chat_model.clone(),
        ));
        let content = Arc::new(GroqCompletions::new(
            client,
            settings.clone(),
            settings.content_model.clone(),
        ));

        Ok(Self::new(
            extractor,
            embeddings,
            chat,
            content,
            store.clone(),
            store,
        ))
    }

    /// Ingests one source file into the knowledge base.
    #[instrument(skip(self, path, title))]
    pub async fn ingest(
        &self,
        path: impl AsRef<Path>,
        title: Option<&str>,
    ) -> Result<IngestReport, TutorError> {
        self.ingestion.ingest(path.as_ref(), title).await
    }

    /// Creates an empty conversation and returns its id.
    pub async fn start_conversation(&self) -> Result<i64, TutorError> {
        self.learning.create_conversation().await
    }

    /// Runs one conversation turn; `conversation_id = None` starts a new
    /// conversation implicitly.
    pub async fn chat(
        &self,
        conversation_id: Option<i64>,
        message: &str,
        top_k: usize,
    ) -> Result<ChatOutcome, TutorError> {
        self.conversations.step(conversation_id, message, top_k).await
    }

    /// Assesses the conversation and generates remedial content for its
    /// weakest tier. Fails with [`TutorError::EmptyHistory`] when the
    /// conversation has no turns.
    #[instrument(skip(self, preferred_format))]
    pub async fn analyze_and_generate(
        &self,
        conversation_id: i64,
        preferred_format: Option<&str>,
    ) -> Result<AnalysisOutcome, TutorError> {
        let history = self
            .learning
            .load_history(conversation_id)
            .await?
            .ok_or(TutorError::ConversationNotFound(conversation_id))?;
        if history.is_empty() {
            return Err(TutorError::EmptyHistory(conversation_id));
        }

        let assessments = self.analysis.analyze(&history).await?;

        let raw_history = serde_json::to_value(&history)
            .map_err(|err| TutorError::Storage(err.to_string()))?;
        let assessments_json = serde_json::to_value(&assessments)
            .map_err(|err| TutorError::Storage(err.to_string()))?;
        let analysis_id = self
            .learning
            .insert_profile(
                conversation_id,
                preferred_format,
                &raw_history,
                &assessments_json,
            )
            .await?;

        let contents = self
            .generator
            .generate(conversation_id, analysis_id, &assessments, preferred_format)
            .await?;

        Ok(AnalysisOutcome {
            analysis_id,
            assessments,
            contents,
        })
    }
}
