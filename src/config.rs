//! Process configuration, resolved once at startup.
//!
//! [`Settings`] is constructed from the environment (a `.env` file is
//! honored via `dotenvy`) and then passed by reference into component
//! constructors. No component performs ambient environment lookups of its
//! own.

use std::env;
use std::time::Duration;

/// Resolved configuration for every external capability the pipeline uses.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Path of the SQLite database backing both the vector table and the
    /// relational tables.
    pub database_path: String,

    // OpenRouter (embeddings)
    pub openrouter_api_key: String,
    pub openrouter_site_url: String,
    pub openrouter_app_name: String,
    pub embeddings_endpoint: String,
    pub embedding_model: String,
    pub embedding_dim: usize,

    // Groq (completions, transcription, vision)
    pub groq_api_key: String,
    pub chat_completions_endpoint: String,
    pub chat_model: String,
    pub content_model: String,
    pub transcription_endpoint: String,
    pub transcription_model: String,
    pub vision_model: String,

    // Fixed per-capability timeouts. Media extraction gets a much longer
    // budget than text round trips.
    pub embed_timeout: Duration,
    pub completion_timeout: Duration,
    pub media_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: "./tutorsmith.db".to_string(),
            openrouter_api_key: String::new(),
            openrouter_site_url: String::new(),
            openrouter_app_name: "tutorsmith".to_string(),
            embeddings_endpoint: "https://openrouter.ai/api/v1/embeddings".to_string(),
            embedding_model: "openai/text-embedding-3-small".to_string(),
            embedding_dim: 1536,
            groq_api_key: String::new(),
            chat_completions_endpoint: "https://api.groq.com/openai/v1/chat/completions"
                .to_string(),
            chat_model: "openai/gpt-oss-120b".to_string(),
            content_model: "llama-3.3-70b-versatile".to_string(),
            transcription_endpoint: "https://api.groq.com/openai/v1/audio/transcriptions"
                .to_string(),
            transcription_model: "whisper-large-v3-turbo".to_string(),
            vision_model: "meta-llama/llama-4-maverick-17b-128e-instruct".to_string(),
            embed_timeout: Duration::from_secs(60),
            completion_timeout: Duration::from_secs(120),
            media_timeout: Duration::from_secs(600),
        }
    }
}

impl Settings {
    /// Builds settings from the environment, falling back to defaults for
    /// anything unset. A `.env` file in the working directory is loaded
    /// first when present.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Settings::default();
        Settings {
            database_path: var_or("DATABASE_PATH", defaults.database_path),
            openrouter_api_key: var_or("OPENROUTER_API_KEY", defaults.openrouter_api_key),
            openrouter_site_url: var_or("OPENROUTER_SITE_URL", defaults.openrouter_site_url),
            openrouter_app_name: var_or("OPENROUTER_APP_NAME", defaults.openrouter_app_name),
            embeddings_endpoint: var_or("EMBEDDINGS_ENDPOINT", defaults.embeddings_endpoint),
            embedding_model: var_or("EMBEDDING_MODEL_NAME", defaults.embedding_model),
            embedding_dim: var_or_parsed("EMBEDDING_DIM", defaults.embedding_dim),
            groq_api_key: var_or("GROQ_API_KEY", defaults.groq_api_key),
            chat_completions_endpoint: var_or(
                "GROQ_CHAT_COMPLETIONS_ENDPOINT",
                defaults.chat_completions_endpoint,
            ),
            chat_model: var_or("GROQ_CHAT_MODEL", defaults.chat_model),
            content_model: var_or("LEARNING_CONTENT_MODEL", defaults.content_model),
            transcription_endpoint: var_or(
                "GROQ_TRANSCRIPTION_ENDPOINT",
                defaults.transcription_endpoint,
            ),
            transcription_model: var_or("TRANSCRIPTION_MODEL_NAME", defaults.transcription_model),
            vision_model: var_or("VISION_MODEL_NAME", defaults.vision_model),
            embed_timeout: Duration::from_secs(var_or_parsed(
                "EMBED_TIMEOUT_SECS",
                defaults.embed_timeout.as_secs(),
            )),
            completion_timeout: Duration::from_secs(var_or_parsed(
                "COMPLETION_TIMEOUT_SECS",
                defaults.completion_timeout.as_secs(),
            )),
            media_timeout: Duration::from_secs(var_or_parsed(
                "MEDIA_TIMEOUT_SECS",
                defaults.media_timeout.as_secs(),
            )),
        }
    }
}

fn var_or(key: &str, default: String) -> String {
    env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or(default)
}

fn var_or_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.embedding_dim, 1536);
        assert!(settings.media_timeout > settings.completion_timeout);
        assert!(settings.completion_timeout > settings.embed_timeout);
    }
}
