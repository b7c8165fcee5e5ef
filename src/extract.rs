//! Media-to-text extraction.
//!
//! Files are classified into a closed set of document kinds by extension;
//! each kind has exactly one handler. Plain text, JSON, and PDF are handled
//! locally; audio and video are transcribed and images are described via
//! the remote media endpoints. The [`Extractor`] trait is the seam the
//! ingestion pipeline depends on.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use tokio::fs;
use tracing::debug;

use crate::config::Settings;
use crate::types::TutorError;

const AUDIO_EXTS: &[&str] = &["wav", "mp3"];
const VIDEO_EXTS: &[&str] = &["mp4", "mpeg", "mov", "webm"];
const IMAGE_EXTS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp", "gif", "tiff"];

/// Closed set of ingestible document kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DocKind {
    Pdf,
    Text,
    Json,
    Audio,
    Video,
    Image,
}

impl DocKind {
    /// Classifies a file by extension; unknown extensions are rejected.
    pub fn classify(path: &Path) -> Result<Self, TutorError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Ok(DocKind::Pdf),
            "txt" => Ok(DocKind::Text),
            "json" => Ok(DocKind::Json),
            e if AUDIO_EXTS.contains(&e) => Ok(DocKind::Audio),
            e if VIDEO_EXTS.contains(&e) => Ok(DocKind::Video),
            e if IMAGE_EXTS.contains(&e) => Ok(DocKind::Image),
            other => Err(TutorError::UnsupportedFormat(format!(".{other}"))),
        }
    }

    /// Stored `type` label, one of the natural-key components for dedup.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DocKind::Pdf => "pdf",
            DocKind::Text => "text",
            DocKind::Json => "json",
            DocKind::Audio => "audio",
            DocKind::Video => "video",
            DocKind::Image => "image",
        }
    }
}

/// Result of extracting one source file.
#[derive(Clone, Debug)]
pub struct Extraction {
    pub text: String,
    pub metadata: Value,
}

/// Seam for turning a source file into text plus provenance metadata.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, path: &Path, title: Option<&str>) -> Result<Extraction, TutorError>;
}

/// Production extractor: local handling for pdf/text/json, remote
/// transcription for audio/video, remote vision description for images.
pub struct MediaExtractor {
    client: reqwest::Client,
    settings: Arc<Settings>,
}

/// Base provenance record for a source file: the `(source, type)` natural
/// key plus title and original format. Extraction handlers extend it with
/// provider-specific fields.
pub fn source_metadata(path: &Path, title: Option<&str>, kind: DocKind) -> Value {
    let source = file_name(path);
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    let original_format = if kind == DocKind::Pdf { "pdf".to_string() } else { ext };
    json!({
        "source": source,
        "title": title,
        "type": kind.as_str(),
        "original_format": original_format,
    })
}

impl MediaExtractor {
    pub fn new(client: reqwest::Client, settings: Arc<Settings>) -> Self {
        Self { client, settings }
    }

    async fn extract_pdf(&self, path: &Path) -> Result<String, TutorError> {
        let owned = path.to_path_buf();
        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text(&owned))
            .await
            .map_err(|err| TutorError::Extraction(err.to_string()))?
            .map_err(|err| TutorError::Extraction(err.to_string()))?;
        // pdf-extract separates pages with form feeds; blank lines keep the
        // page boundary visible to the paragraph splitter.
        let pages: Vec<String> = text
            .split('\x0c')
            .map(|page| page.trim().to_string())
            .filter(|page| !page.is_empty())
            .collect();
        Ok(pages.join("\n\n"))
    }

    async fn extract_json(&self, path: &Path) -> Result<String, TutorError> {
        let raw = read_lossy(path).await?;
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => serde_json::to_string_pretty(&value)
                .map_err(|err| TutorError::Extraction(err.to_string())),
            // Not valid JSON after all: index it as plain text.
            Err(_) => Ok(raw),
        }
    }

    async fn transcribe(&self, path: &Path) -> Result<String, TutorError> {
        let bytes = fs::read(path).await?;
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name(path));
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.settings.transcription_model.clone())
            .text("temperature", "0")
            .text("response_format", "json")
            .text("language", "pt");

        let response = self
            .client
            .post(&self.settings.transcription_endpoint)
            .bearer_auth(&self.settings.groq_api_key)
            .multipart(form)
            .timeout(self.settings.media_timeout)
            .send()
            .await
            .map_err(|err| TutorError::upstream("transcription", err))?
            .error_for_status()
            .map_err(|err| TutorError::upstream("transcription", err))?;

        let body: Value = response
            .json()
            .await
            .map_err(|err| TutorError::upstream("transcription", err))?;
        Ok(body["text"].as_str().unwrap_or_default().trim().to_string())
    }

    async fn describe_image(&self, path: &Path) -> Result<String, TutorError> {
        let bytes = fs::read(path).await?;
        let mime = guess_image_mime(path);
        let data_url = format!("data:{mime};base64,{}", BASE64.encode(&bytes));

        let system_prompt = "Você é um assistente que analisa imagens.\n\
            Responda SEMPRE em português do Brasil.\n\
            1) Descreva em detalhes o que aparece na imagem.\n\
            2) Se houver texto legível, transcreva-o.\n\
            3) Se for documento, faça um resumo estrutural.";
        let user_prompt = "Analise cuidadosamente a imagem enviada. \
            Descreva o conteúdo visual e transcreva qualquer texto legível.";

        let payload = json!({
            "model": self.settings.vision_model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": [
                    {"type": "text", "text": user_prompt},
                    {"type": "image_url", "image_url": {"url": data_url, "detail": "high"}},
                ]},
            ],
            "temperature": 0.2,
            "max_tokens": 2048,
        });

        let response = self
            .client
            .post(&self.settings.chat_completions_endpoint)
            .bearer_auth(&self.settings.groq_api_key)
            .json(&payload)
            .timeout(self.settings.media_timeout)
            .send()
            .await
            .map_err(|err| TutorError::upstream("vision", err))?
            .error_for_status()
            .map_err(|err| TutorError::upstream("vision", err))?;

        let body: Value = response
            .json()
            .await
            .map_err(|err| TutorError::upstream("vision", err))?;
        Ok(body["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .trim()
            .to_string())
    }
}

#[async_trait]
impl Extractor for MediaExtractor {
    async fn extract(&self, path: &Path, title: Option<&str>) -> Result<Extraction, TutorError> {
        let kind = DocKind::classify(path)?;
        let mut metadata = source_metadata(path, title, kind);
        debug!(kind = kind.as_str(), source = %file_name(path), "extracting");

        let text = match kind {
            DocKind::Pdf => self.extract_pdf(path).await?,
            DocKind::Text => read_lossy(path).await?,
            DocKind::Json => self.extract_json(path).await?,
            DocKind::Audio | DocKind::Video => {
                merge(
                    &mut metadata,
                    json!({
                        "transcription_model": self.settings.transcription_model,
                        "transcription_provider": "groq",
                    }),
                );
                self.transcribe(path).await?
            }
            DocKind::Image => {
                let size = fs::metadata(path).await?.len();
                merge(
                    &mut metadata,
                    json!({
                        "vision_model": self.settings.vision_model,
                        "vision_provider": "groq",
                        "file_size_bytes": size,
                    }),
                );
                self.describe_image(path).await?
            }
        };

        Ok(Extraction { text, metadata })
    }
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

async fn read_lossy(path: &Path) -> Result<String, TutorError> {
    let bytes = fs::read(path).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn guess_image_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default()
        .as_str()
    {
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => "image/jpeg",
    }
}

fn merge(metadata: &mut Value, extra: Value) {
    if let (Some(target), Some(source)) = (metadata.as_object_mut(), extra.as_object()) {
        for (key, value) in source {
            target.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn classification_covers_every_supported_extension() {
        let cases = [
            ("deck.pdf", DocKind::Pdf),
            ("notes.TXT", DocKind::Text),
            ("data.json", DocKind::Json),
            ("talk.mp3", DocKind::Audio),
            ("talk.wav", DocKind::Audio),
            ("lecture.mp4", DocKind::Video),
            ("lecture.webm", DocKind::Video),
            ("board.png", DocKind::Image),
            ("board.jpeg", DocKind::Image),
        ];
        for (name, expected) in cases {
            assert_eq!(DocKind::classify(&PathBuf::from(name)).unwrap(), expected);
        }
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = DocKind::classify(&PathBuf::from("slides.pptx")).unwrap_err();
        assert!(matches!(err, TutorError::UnsupportedFormat(ext) if ext == ".pptx"));
        assert!(DocKind::classify(&PathBuf::from("noext")).is_err());
    }

    #[test]
    fn source_metadata_carries_the_dedup_key() {
        let meta = source_metadata(
            &PathBuf::from("/tmp/aula01.mp4"),
            Some("Aula 1"),
            DocKind::Video,
        );
        assert_eq!(meta["source"], "aula01.mp4");
        assert_eq!(meta["type"], "video");
        assert_eq!(meta["title"], "Aula 1");
        assert_eq!(meta["original_format"], "mp4");
    }

    #[tokio::test]
    async fn json_files_are_pretty_printed_or_passed_through() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(Settings::default());
        let extractor = MediaExtractor::new(reqwest::Client::new(), settings);

        let valid = dir.path().join("data.json");
        tokio::fs::write(&valid, r#"{"tema":"frações","nivel":1}"#)
            .await
            .unwrap();
        let out = extractor.extract(&valid, None).await.unwrap();
        assert!(out.text.contains("\"tema\""));
        assert!(out.text.contains('\n'), "expected pretty-printed JSON");

        let invalid = dir.path().join("broken.json");
        tokio::fs::write(&invalid, "{not json").await.unwrap();
        let out = extractor.extract(&invalid, None).await.unwrap();
        assert_eq!(out.text, "{not json");
    }

    #[tokio::test]
    async fn text_files_are_read_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apostila.txt");
        tokio::fs::write(&path, "Frações representam partes de um todo.")
            .await
            .unwrap();
        let extractor = MediaExtractor::new(reqwest::Client::new(), Arc::new(Settings::default()));
        let out = extractor.extract(&path, Some("Apostila")).await.unwrap();
        assert_eq!(out.text, "Frações representam partes de um todo.");
        assert_eq!(out.metadata["type"], "text");
        assert_eq!(out.metadata["source"], "apostila.txt");
    }
}
