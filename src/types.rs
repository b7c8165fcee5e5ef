//! Shared domain types and the crate-wide error taxonomy.
//!
//! Everything that crosses more than one pipeline stage lives here: the
//! [`TutorError`] taxonomy, conversation turns, competence assessments and
//! their ordinal levels, content formats, and the [`ModelJson`] typed result
//! for JSON-shaped model output.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error taxonomy for the tutoring pipeline.
///
/// Upstream failures (extraction, embedding, completion, storage) are fatal
/// and surfaced to the caller without retries. Degraded model-output parses
/// are deliberately *not* represented here; they are handled locally via
/// [`ModelJson`] so the pipeline keeps making forward progress.
#[derive(Debug, Error)]
pub enum TutorError {
    /// File extension not recognized by ingestion.
    #[error("unsupported file extension for ingestion: {0}")]
    UnsupportedFormat(String),

    /// Conversation id did not resolve to a stored conversation.
    #[error("conversation {0} not found")]
    ConversationNotFound(i64),

    /// Analysis requested for a conversation with zero recorded turns.
    #[error("conversation {0} has no recorded turns to analyze")]
    EmptyHistory(i64),

    /// Non-2xx response, timeout, or malformed payload from an external
    /// capability. Never retried inside the core.
    #[error("{capability} request failed: {message}")]
    Upstream {
        capability: &'static str,
        message: String,
    },

    /// Knowledge store or relational table failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Local media-to-text extraction failure.
    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TutorError {
    /// Shorthand for upstream capability failures.
    pub fn upstream(capability: &'static str, message: impl fmt::Display) -> Self {
        TutorError::Upstream {
            capability,
            message: message.to_string(),
        }
    }
}

/// One question/answer exchange within a conversation.
///
/// The wire field names (`pergunta`/`resposta`) are part of the stored
/// history format and of the prompt contract, so they are fixed here rather
/// than derived from the Rust field names.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    #[serde(rename = "pergunta")]
    pub question: String,
    #[serde(rename = "resposta")]
    pub answer: String,
}

impl Turn {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

/// Judged proficiency for one sub-topic, as produced by the analysis model.
///
/// `level` is kept as the raw model string: ranking parses it into a
/// [`CompetenceLevel`] on demand and ignores anything unmappable, which is
/// exactly the tolerance the selection rule requires.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompetenceAssessment {
    #[serde(rename = "subtema", default)]
    pub subtopic: String,
    #[serde(rename = "nivel", default)]
    pub level: String,
    #[serde(rename = "justificativa", default)]
    pub justification: String,
}

/// The four allowed competence levels, ordered weakest to strongest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompetenceLevel {
    Basico,
    Intermediario,
    Avancado,
    Domina,
}

impl CompetenceLevel {
    /// Ordinal rank used to pick the weakest tier for remediation.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            CompetenceLevel::Basico => 1,
            CompetenceLevel::Intermediario => 2,
            CompetenceLevel::Avancado => 3,
            CompetenceLevel::Domina => 4,
        }
    }

    /// Canonical wire label (Portuguese, as the rubric demands).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CompetenceLevel::Basico => "básico",
            CompetenceLevel::Intermediario => "intermediário",
            CompetenceLevel::Avancado => "avançado",
            CompetenceLevel::Domina => "domina",
        }
    }

    /// Case- and diacritic-insensitive parse; `None` for unmapped labels.
    pub fn parse(raw: &str) -> Option<Self> {
        match fold_diacritics(raw.trim()).to_lowercase().as_str() {
            "basico" => Some(CompetenceLevel::Basico),
            "intermediario" => Some(CompetenceLevel::Intermediario),
            "avancado" => Some(CompetenceLevel::Avancado),
            "domina" => Some(CompetenceLevel::Domina),
            _ => None,
        }
    }
}

impl fmt::Display for CompetenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remedial content archetypes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContentFormat {
    Video,
    Audio,
    Texto,
}

impl ContentFormat {
    pub const ALL: [ContentFormat; 3] =
        [ContentFormat::Video, ContentFormat::Audio, ContentFormat::Texto];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ContentFormat::Video => "video",
            ContentFormat::Audio => "audio",
            ContentFormat::Texto => "texto",
        }
    }

    /// Human-readable archetype handed to the generation rubric.
    #[must_use]
    pub fn archetype(self) -> &'static str {
        match self {
            ContentFormat::Video => "roteiro de vídeo curto explicativo",
            ContentFormat::Audio => "roteiro de áudio/podcast curto",
            ContentFormat::Texto => "texto explicativo curto",
        }
    }

    /// Parses a preferred-format hint; anything unrecognized yields `None`,
    /// which callers treat as "generate every format".
    pub fn parse(raw: &str) -> Option<Self> {
        match fold_diacritics(raw.trim()).to_lowercase().as_str() {
            "video" => Some(ContentFormat::Video),
            "audio" => Some(ContentFormat::Audio),
            "texto" => Some(ContentFormat::Texto),
            _ => None,
        }
    }
}

impl fmt::Display for ContentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted remedial content row, one per (sub-topic × format) pair.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersonalizedContent {
    pub id: i64,
    pub conversation_id: i64,
    pub analysis_id: i64,
    pub subtopic: String,
    pub level: String,
    pub content_format: String,
    pub title: String,
    pub script: String,
    pub extra_metadata: serde_json::Value,
}

/// Typed result for model output that was required to be JSON.
///
/// Callers decide what the degraded branch means: the analysis engine
/// substitutes a synthetic low-confidence assessment, the content generator
/// reuses the raw text as the script body. Neither path is an error.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelJson<T> {
    Parsed(T),
    Unparsed(String),
}

/// Parses model output as JSON after stripping an optional ```-fence.
pub fn parse_model_json<T: serde::de::DeserializeOwned>(raw: &str) -> ModelJson<T> {
    let cleaned = strip_code_fence(raw.trim());
    match serde_json::from_str(cleaned) {
        Ok(value) => ModelJson::Parsed(value),
        Err(_) => ModelJson::Unparsed(raw.to_string()),
    }
}

/// Removes a surrounding triple-backtick fence (with optional `json` tag).
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let inner = trimmed.trim_matches('`').trim();
    if let Some(rest) = inner.strip_prefix("json") {
        rest.trim()
    } else if let Some(rest) = inner.strip_prefix("JSON") {
        rest.trim()
    } else {
        inner
    }
}

/// Folds the Portuguese diacritics that appear in level and format labels.
pub(crate) fn fold_diacritics(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'Á' | 'À' | 'Â' | 'Ã' => 'a',
            'é' | 'ê' | 'É' | 'Ê' => 'e',
            'í' | 'Í' => 'i',
            'ó' | 'ô' | 'õ' | 'Ó' | 'Ô' | 'Õ' => 'o',
            'ú' | 'Ú' => 'u',
            'ç' | 'Ç' => 'c',
            other => other,
        })
        .collect()
}
