//! Diagnostic conversation loop.
//!
//! Each step retrieves grounding context for the learner's question,
//! replays the full prior history into the prompt, and appends the new
//! turn. Mutations on one conversation id are serialized by a per-key
//! async lock held from history load through the final overwrite.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::providers::completion::CompletionProvider;
use crate::retrieval::{Retriever, render_context};
use crate::stores::LearningStore;
use crate::types::{Turn, TutorError};

/// Fixed answer for questions with no retrievable grounding; no completion
/// call is made on this path.
pub const NO_CONTEXT_ANSWER: &str =
    "Não encontrei nada relevante na base de conhecimento para responder à sua pergunta.";

const NO_HISTORY_LINE: &str = "Nenhum histórico anterior. Esta é a primeira interação.";

const SYSTEM_PROMPT: &str = "\
Você é um assistente conversacional especializado em interagir APENAS com base no contexto fornecido.
Se a resposta não estiver claramente contida nesse contexto, diga que não sabe com base nesse material.
Use o conteúdo para conduzir uma conversa fluida com o objetivo de identificar lacunas de conhecimento
do usuário sobre os temas do contexto.

Comece com perguntas mais fáceis e vá aumentando a complexidade quando perceber que o usuário domina o tema.
Não revele que está usando esse contexto como base de conhecimento.
Não dê aulas completas; seu foco é identificar lacunas, não ensinar tudo.
Responda em português do Brasil.";

/// Result of one conversation step.
#[derive(Clone, Debug)]
pub struct ChatOutcome {
    pub conversation_id: i64,
    pub answer: String,
    pub history: Vec<Turn>,
}

/// Owns the per-conversation turn loop.
pub struct ConversationManager {
    retriever: Arc<Retriever>,
    completions: Arc<dyn CompletionProvider>,
    store: Arc<dyn LearningStore>,
    locks: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl ConversationManager {
    pub fn new(
        retriever: Arc<Retriever>,
        completions: Arc<dyn CompletionProvider>,
        store: Arc<dyn LearningStore>,
    ) -> Self {
        Self {
            retriever,
            completions,
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Runs one turn: create-or-load, retrieve, answer, append, persist.
    ///
    /// `conversation_id = None` starts a new conversation. An id that does
    /// not resolve fails with [`TutorError::ConversationNotFound`].
    pub async fn step(
        &self,
        conversation_id: Option<i64>,
        question: &str,
        k: usize,
    ) -> Result<ChatOutcome, TutorError> {
        let id = match conversation_id {
            Some(id) => id,
            None => self.store.create_conversation().await?,
        };

        let _guard = self.lock_for(id).await;

        let mut history = self
            .store
            .load_history(id)
            .await?
            .ok_or(TutorError::ConversationNotFound(id))?;

        let results = self.retriever.retrieve(question, k).await?;
        let answer = if results.is_empty() {
            debug!(conversation = id, "empty retrieval, skipping completion");
            NO_CONTEXT_ANSWER.to_string()
        } else {
            let context = render_context(&results);
            let payload = build_user_payload(&history, &context, question);
            self.completions
                .complete(SYSTEM_PROMPT, &payload, 0.2)
                .await?
        };

        history.push(Turn::new(question, answer.clone()));
        self.store.save_history(id, &history).await?;

        Ok(ChatOutcome {
            conversation_id: id,
            answer,
            history,
        })
    }

    async fn lock_for(&self, id: i64) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .entry(id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}

/// Serializes prior turns for prompt replay; insertion order is
/// conversation order.
fn render_history(history: &[Turn]) -> String {
    if history.is_empty() {
        return NO_HISTORY_LINE.to_string();
    }
    history
        .iter()
        .enumerate()
        .map(|(i, turn)| {
            format!(
                "Turno {}:\nUsuário: {}\nAssistente: {}",
                i + 1,
                turn.question,
                turn.answer
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn build_user_payload(history: &[Turn], context: &str, question: &str) -> String {
    format!(
        "Histórico da conversa até agora:\n{}\n\n\
         Contexto (única fonte de informação nesta rodada):\n{}\n\n\
         Pergunta atual do usuário:\n{}",
        render_history(history),
        context,
        question
    )
}
