//! Chat-completion capability: one system prompt, one user payload, one
//! text response. Conversation answering, analysis, and content scripting
//! all go through this seam with their own prompts and temperatures.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;

use crate::config::Settings;
use crate::types::TutorError;

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f64,
    ) -> Result<String, TutorError>;
}

/// Groq-compatible chat completions client, bound to one model name.
///
/// The pipeline holds two instances: one on the conversational model (chat
/// and analysis) and one on the content model (remedial scripting).
pub struct GroqCompletions {
    client: reqwest::Client,
    settings: Arc<Settings>,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl GroqCompletions {
    pub fn new(client: reqwest::Client, settings: Arc<Settings>, model: impl Into<String>) -> Self {
        Self {
            client,
            settings,
            model: model.into(),
        }
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionProvider for GroqCompletions {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f64,
    ) -> Result<String, TutorError> {
        let payload = json!({
            "model": self.model,
            "temperature": temperature,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let response = self
            .client
            .post(&self.settings.chat_completions_endpoint)
            .bearer_auth(&self.settings.groq_api_key)
            .json(&payload)
            .timeout(self.settings.completion_timeout)
            .send()
            .await
            .map_err(|err| TutorError::upstream("completion", err))?
            .error_for_status()
            .map_err(|err| TutorError::upstream("completion", err))?;

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|err| TutorError::upstream("completion", err))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| TutorError::upstream("completion", "response carried no choices"))?;
        Ok(choice.message.content.trim().to_string())
    }
}

/// One recorded call against a [`MockCompletionProvider`].
#[derive(Clone, Debug)]
pub struct RecordedCompletion {
    pub system: String,
    pub user: String,
    pub temperature: f64,
}

/// Scripted completion provider for tests.
///
/// Responses are drained in FIFO order; every call is recorded so tests can
/// assert on the assembled prompts. An exhausted script is an upstream
/// failure, which keeps tests honest about how many calls they expect.
#[derive(Default)]
pub struct MockCompletionProvider {
    responses: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<RecordedCompletion>>,
}

impl MockCompletionProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_responses(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let provider = Self::new();
        for response in responses {
            provider.push_response(response);
        }
        provider
    }

    pub fn push_response(&self, response: impl Into<String>) {
        self.responses.lock().push_back(response.into());
    }

    pub fn calls(&self) -> Vec<RecordedCompletion> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CompletionProvider for MockCompletionProvider {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f64,
    ) -> Result<String, TutorError> {
        self.calls.lock().push(RecordedCompletion {
            system: system.to_string(),
            user: user.to_string(),
            temperature,
        });
        self.responses
            .lock()
            .pop_front()
            .ok_or_else(|| TutorError::upstream("completion", "mock script exhausted"))
    }
}
