//! Embedding gateway: text in, fixed-dimension vectors out.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::Settings;
use crate::types::TutorError;

/// Maps text batches to embedding vectors, one vector per input, in input
/// order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, TutorError>;
}

/// OpenRouter-compatible embeddings client.
pub struct OpenRouterEmbeddings {
    client: reqwest::Client,
    settings: Arc<Settings>,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl OpenRouterEmbeddings {
    pub fn new(client: reqwest::Client, settings: Arc<Settings>) -> Self {
        Self { client, settings }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenRouterEmbeddings {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, TutorError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let payload = json!({
            "model": self.settings.embedding_model,
            "input": texts,
        });

        let mut request = self
            .client
            .post(&self.settings.embeddings_endpoint)
            .bearer_auth(&self.settings.openrouter_api_key)
            .json(&payload)
            .timeout(self.settings.embed_timeout);
        if !self.settings.openrouter_site_url.is_empty() {
            request = request.header("HTTP-Referer", &self.settings.openrouter_site_url);
        }
        if !self.settings.openrouter_app_name.is_empty() {
            request = request.header("X-Title", &self.settings.openrouter_app_name);
        }

        let response = request
            .send()
            .await
            .map_err(|err| TutorError::upstream("embedding", err))?
            .error_for_status()
            .map_err(|err| TutorError::upstream("embedding", err))?;

        let body: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|err| TutorError::upstream("embedding", err))?;

        if body.data.len() != texts.len() {
            return Err(TutorError::upstream(
                "embedding",
                format!(
                    "expected {} vectors, received {}",
                    texts.len(),
                    body.data.len()
                ),
            ));
        }

        debug!(batch = texts.len(), "embedded batch");
        Ok(body.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Deterministic embedding provider for tests and offline runs.
///
/// Each text is hashed word-by-word into a fixed-dimension histogram and
/// L2-normalized, so identical texts map to identical vectors and texts
/// sharing vocabulary land closer together than unrelated ones.
#[derive(Clone, Debug)]
pub struct MockEmbeddingProvider {
    dimension: usize,
}

impl MockEmbeddingProvider {
    #[must_use]
    pub fn new() -> Self {
        Self { dimension: 32 }
    }

    #[must_use]
    pub fn with_dimension(dimension: usize) -> Self {
        Self { dimension }
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for word in text.split_whitespace() {
            let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
            for byte in word.to_lowercase().bytes() {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
            }
            vector[(hash % self.dimension as u64) as usize] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, TutorError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}
