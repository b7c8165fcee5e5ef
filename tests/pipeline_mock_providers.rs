//! End-to-end pipeline tests over the in-memory store and mock providers.
//!
//! These exercise the orchestrator-facing operations without any network
//! or database dependency: deterministic mock embeddings, scripted mock
//! completions, and real extraction for plain-text fixtures.

use std::sync::Arc;

use tutorsmith::analysis::FALLBACK_SUBTOPIC;
use tutorsmith::content::{ContentGenerator, SELECTION_CRITERION};
use tutorsmith::conversation::NO_CONTEXT_ANSWER;
use tutorsmith::extract::MediaExtractor;
use tutorsmith::ingestion::SkipReason;
use tutorsmith::providers::completion::MockCompletionProvider;
use tutorsmith::providers::embeddings::{EmbeddingProvider, MockEmbeddingProvider};
use tutorsmith::retrieval::Retriever;
use tutorsmith::stores::{KnowledgeStore, LearningStore, MemoryStore};
use tutorsmith::types::{CompetenceAssessment, TutorError};
use tutorsmith::{Orchestrator, Settings};

struct Harness {
    orchestrator: Orchestrator,
    store: Arc<MemoryStore>,
    chat: Arc<MockCompletionProvider>,
    content: Arc<MockCompletionProvider>,
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

fn harness() -> Harness {
    init_tracing();
    let settings = Arc::new(Settings::default());
    let store = Arc::new(MemoryStore::new());
    let chat = Arc::new(MockCompletionProvider::new());
    let content = Arc::new(MockCompletionProvider::new());
    let extractor = Arc::new(MediaExtractor::new(reqwest::Client::new(), settings));
    let embeddings = Arc::new(MockEmbeddingProvider::new());

    let orchestrator = Orchestrator::new(
        extractor,
        embeddings,
        chat.clone(),
        content.clone(),
        store.clone(),
        store.clone(),
    );
    Harness {
        orchestrator,
        store,
        chat,
        content,
    }
}

fn assessment(subtopic: &str, level: &str, justification: &str) -> CompetenceAssessment {
    CompetenceAssessment {
        subtopic: subtopic.to_string(),
        level: level.to_string(),
        justification: justification.to_string(),
    }
}

async fn write_fixture(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    tokio::fs::write(&path, content).await.unwrap();
    path
}

fn fraction_notes() -> String {
    "Frações representam partes iguais de um todo. O numerador indica quantas \
     partes são consideradas e o denominador indica em quantas partes o todo \
     foi dividido. Frações equivalentes representam a mesma quantidade com \
     numeradores e denominadores diferentes. Para somar frações com o mesmo \
     denominador basta somar os numeradores e conservar o denominador."
        .to_string()
}

// ==========================================================================
// Ingestion
// ==========================================================================

#[tokio::test]
async fn reingesting_the_same_file_is_idempotent() {
    let h = harness();
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(&dir, "apostila.txt", &fraction_notes()).await;

    let first = h.orchestrator.ingest(&path, Some("Apostila")).await.unwrap();
    assert!(!first.skipped);
    assert_eq!(first.inserted_chunks, 1);
    assert_eq!(first.metadata["source"], "apostila.txt");
    assert_eq!(h.store.count().await.unwrap(), 1);

    let second = h.orchestrator.ingest(&path, Some("Apostila")).await.unwrap();
    assert!(second.skipped);
    assert_eq!(second.reason, Some(SkipReason::AlreadyIngested));
    assert_eq!(second.inserted_chunks, 0);
    assert_eq!(h.store.count().await.unwrap(), 1, "no additional chunks");
}

#[tokio::test]
async fn reingesting_changed_content_under_same_name_is_skipped() {
    // Known limitation: the dedup key is (source filename, type), not a
    // content hash, so a same-named file with new content is skipped.
    let h = harness();
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(&dir, "apostila.txt", &fraction_notes()).await;
    h.orchestrator.ingest(&path, None).await.unwrap();

    tokio::fs::write(&path, "Conteúdo completamente novo sobre outro assunto.")
        .await
        .unwrap();
    let report = h.orchestrator.ingest(&path, None).await.unwrap();
    assert!(report.skipped);
    assert_eq!(report.reason, Some(SkipReason::AlreadyIngested));
    assert_eq!(h.store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn unknown_extension_is_a_fatal_error() {
    let h = harness();
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(&dir, "slides.pptx", "whatever").await;

    let err = h.orchestrator.ingest(&path, None).await.unwrap_err();
    assert!(matches!(err, TutorError::UnsupportedFormat(_)));
}

#[tokio::test]
async fn empty_file_skips_with_no_text_extracted() {
    let h = harness();
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(&dir, "vazio.txt", "   \n\n  ").await;

    let report = h.orchestrator.ingest(&path, None).await.unwrap();
    assert!(report.skipped);
    assert_eq!(report.reason, Some(SkipReason::NoTextExtracted));
    assert_eq!(h.store.count().await.unwrap(), 0);
}

// ==========================================================================
// Conversation
// ==========================================================================

#[tokio::test]
async fn chat_on_empty_store_returns_sentinel_and_still_persists_the_turn() {
    let h = harness();
    // The chat mock has no scripted responses: a completion call would fail,
    // proving the empty-retrieval short-circuit makes none.
    let outcome = h
        .orchestrator
        .chat(None, "O que é uma fração?", 5)
        .await
        .unwrap();

    assert_eq!(outcome.answer, NO_CONTEXT_ANSWER);
    assert_eq!(outcome.history.len(), 1);
    assert_eq!(outcome.history[0].question, "O que é uma fração?");
    assert_eq!(outcome.history[0].answer, NO_CONTEXT_ANSWER);

    let stored = h
        .store
        .load_history(outcome.conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, outcome.history);
    assert!(h.chat.calls().is_empty());
}

#[tokio::test]
async fn chat_grounds_the_prompt_in_context_and_replays_history() {
    let h = harness();
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(&dir, "fracoes.txt", &fraction_notes()).await;
    h.orchestrator.ingest(&path, Some("Frações")).await.unwrap();

    h.chat.push_response("O que você sabe sobre numeradores?");
    h.chat.push_response("E como você somaria frações?");

    let first = h
        .orchestrator
        .chat(None, "Quero estudar frações e denominadores", 5)
        .await
        .unwrap();
    assert_eq!(first.answer, "O que você sabe sobre numeradores?");

    let second = h
        .orchestrator
        .chat(
            Some(first.conversation_id),
            "O numerador fica em cima da fração",
            5,
        )
        .await
        .unwrap();
    assert_eq!(second.answer, "E como você somaria frações?");
    assert_eq!(second.history.len(), 2);

    let calls = h.chat.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].system.contains("lacunas de conhecimento"));
    assert!(calls[0].user.contains("Nenhum histórico anterior"));
    assert!(calls[0].user.contains("Trecho 1"));
    assert!(calls[0].user.contains("partes iguais de um todo"));

    // Second turn replays the first verbatim and ends with the question.
    assert!(calls[1].user.contains("Turno 1:"));
    assert!(calls[1].user.contains("Usuário: Quero estudar frações e denominadores"));
    assert!(calls[1].user.contains("Assistente: O que você sabe sobre numeradores?"));
    assert!(calls[1].user.ends_with("O numerador fica em cima da fração"));
}

#[tokio::test]
async fn concurrent_steps_on_one_conversation_are_serialized() {
    // Both turns hit the empty-retrieval path, so no completion script is
    // needed; the per-conversation lock must keep both appended turns.
    let h = harness();
    let id = h.orchestrator.start_conversation().await.unwrap();

    let (a, b) = tokio::join!(
        h.orchestrator.chat(Some(id), "primeira pergunta", 5),
        h.orchestrator.chat(Some(id), "segunda pergunta", 5),
    );
    a.unwrap();
    b.unwrap();

    let history = h.store.load_history(id).await.unwrap().unwrap();
    assert_eq!(history.len(), 2, "no turn may be lost to a concurrent overwrite");
}

#[tokio::test]
async fn chat_with_unknown_id_fails_before_any_model_call() {
    let h = harness();
    let err = h.orchestrator.chat(Some(999), "olá", 5).await.unwrap_err();
    assert!(matches!(err, TutorError::ConversationNotFound(999)));
    assert!(h.chat.calls().is_empty());
}

// ==========================================================================
// Analysis and generation
// ==========================================================================

#[tokio::test]
async fn analyze_and_generate_requires_history() {
    let h = harness();
    let id = h.orchestrator.start_conversation().await.unwrap();

    let err = h
        .orchestrator
        .analyze_and_generate(id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, TutorError::EmptyHistory(found) if found == id));

    let err = h
        .orchestrator
        .analyze_and_generate(424_242, None)
        .await
        .unwrap_err();
    assert!(matches!(err, TutorError::ConversationNotFound(_)));
}

#[tokio::test]
async fn full_flow_persists_profile_and_generates_content() {
    let h = harness();
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(&dir, "fracoes.txt", &fraction_notes()).await;
    h.orchestrator.ingest(&path, Some("Frações")).await.unwrap();

    h.chat.push_response("Pergunta do tutor");
    let chat = h
        .orchestrator
        .chat(None, "frações e denominadores", 5)
        .await
        .unwrap();

    // Analysis runs on the conversational model provider.
    h.chat.push_response(
        r#"[{"subtema": "frações equivalentes", "nivel": "básico", "justificativa": "confundiu numerador e denominador"}]"#,
    );
    h.content
        .push_response(r#"{"title": "Frações sem medo", "script": "Roteiro completo."}"#);

    let outcome = h
        .orchestrator
        .analyze_and_generate(chat.conversation_id, Some("texto"))
        .await
        .unwrap();

    assert_eq!(outcome.assessments.len(), 1);
    assert_eq!(outcome.assessments[0].subtopic, "frações equivalentes");
    assert_eq!(h.store.profile_rows(), 1);

    assert_eq!(outcome.contents.len(), 1);
    let content = &outcome.contents[0];
    assert_eq!(content.analysis_id, outcome.analysis_id);
    assert_eq!(content.conversation_id, chat.conversation_id);
    assert_eq!(content.content_format, "texto");
    assert_eq!(content.title, "Frações sem medo");
    assert_eq!(content.script, "Roteiro completo.");
    assert_eq!(content.extra_metadata["criterio_geracao"], SELECTION_CRITERION);
    assert_eq!(content.extra_metadata["nivel_rank_usado"], 1);
    assert!(!content.extra_metadata["source_doc_ids"].as_array().unwrap().is_empty());
    assert_eq!(h.store.content_rows(), 1);
}

#[tokio::test]
async fn degraded_analysis_still_reaches_generation() {
    let h = harness();
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(&dir, "fracoes.txt", &fraction_notes()).await;
    h.orchestrator.ingest(&path, None).await.unwrap();

    h.chat.push_response("Pergunta do tutor");
    let chat = h.orchestrator.chat(None, "frações", 5).await.unwrap();

    h.chat.push_response("not valid json");
    // Generation targets the synthetic assessment; nearest-neighbor search
    // has no distance threshold, so the fraction chunk still grounds it.
    h.content.push_response("também não é json");

    let outcome = h
        .orchestrator
        .analyze_and_generate(chat.conversation_id, Some("audio"))
        .await
        .unwrap();

    assert_eq!(outcome.assessments.len(), 1);
    assert_eq!(outcome.assessments[0].subtopic, FALLBACK_SUBTOPIC);
    assert_eq!(outcome.assessments[0].level, "básico");

    assert_eq!(outcome.contents.len(), 1);
    assert_eq!(
        outcome.contents[0].title,
        format!("Conteúdo sobre {FALLBACK_SUBTOPIC}")
    );
    assert_eq!(outcome.contents[0].script, "também não é json");
}

// ==========================================================================
// Content generator selection rules
// ==========================================================================

struct GeneratorHarness {
    generator: ContentGenerator,
    store: Arc<MemoryStore>,
    completions: Arc<MockCompletionProvider>,
}

async fn generator_harness(seed_chunks: &[&str]) -> GeneratorHarness {
    let store = Arc::new(MemoryStore::new());
    let embeddings = Arc::new(MockEmbeddingProvider::new());
    for (i, chunk) in seed_chunks.iter().enumerate() {
        let vector = embeddings
            .embed_batch(&[chunk.to_string()])
            .await
            .unwrap()
            .remove(0);
        let metadata = serde_json::json!({
            "source": format!("doc{i}.txt"),
            "type": "text",
            "title": format!("Documento {i}"),
        });
        store.insert_chunk(chunk, &metadata, &vector).await.unwrap();
    }

    let retriever = Arc::new(Retriever::new(embeddings, store.clone()));
    let completions = Arc::new(MockCompletionProvider::new());
    let generator = ContentGenerator::new(retriever, completions.clone(), store.clone());
    GeneratorHarness {
        generator,
        store,
        completions,
    }
}

#[tokio::test]
async fn only_the_weakest_tier_is_remediated() {
    let h = generator_harness(&[
        "frações equivalentes e denominadores comuns",
        "porcentagem e proporção em problemas",
        "juros compostos e capitalização",
    ])
    .await;
    h.completions
        .push_response(r#"{"title": "T", "script": "S"}"#);

    let assessments = vec![
        assessment("frações equivalentes", "básico", "muitos erros"),
        assessment("porcentagem", "intermediário", "algumas lacunas"),
        assessment("juros compostos", "avançado", "quase lá"),
    ];

    let contents = h
        .generator
        .generate(1, 1, &assessments, Some("texto"))
        .await
        .unwrap();

    assert_eq!(contents.len(), 1);
    assert_eq!(contents[0].subtopic, "frações equivalentes");
    assert_eq!(contents[0].level, "básico");
    assert_eq!(h.completions.calls().len(), 1);
}

#[tokio::test]
async fn tied_assessments_are_all_remediated_in_every_format() {
    let h = generator_harness(&[
        "frações equivalentes e denominadores comuns",
        "porcentagem e proporção em problemas",
    ])
    .await;
    for _ in 0..6 {
        h.completions
            .push_response(r#"{"title": "T", "script": "S"}"#);
    }

    let assessments = vec![
        assessment("frações equivalentes", "básico", ""),
        assessment("porcentagem", "Básico", ""),
    ];

    // No recognized preferred format: all three archetypes per sub-topic.
    let contents = h
        .generator
        .generate(1, 1, &assessments, None)
        .await
        .unwrap();

    assert_eq!(contents.len(), 6);
    assert_eq!(h.store.content_rows(), 6);
    let formats: Vec<&str> = contents
        .iter()
        .filter(|c| c.subtopic == "porcentagem")
        .map(|c| c.content_format.as_str())
        .collect();
    assert_eq!(formats, vec!["video", "audio", "texto"]);
}

#[tokio::test]
async fn blank_and_unmappable_assessments_are_skipped() {
    let h = generator_harness(&["frações equivalentes e denominadores comuns"]).await;
    h.completions
        .push_response(r#"{"title": "T", "script": "S"}"#);

    let assessments = vec![
        assessment("frações equivalentes", "básico", ""),
        assessment("", "básico", "sem subtema"),
        assessment("geometria", "expert", "nível fora da rubrica"),
    ];

    let contents = h
        .generator
        .generate(1, 1, &assessments, Some("video"))
        .await
        .unwrap();
    assert_eq!(contents.len(), 1);
    assert_eq!(contents[0].subtopic, "frações equivalentes");
}

#[tokio::test]
async fn no_mappable_rank_means_no_content() {
    let h = generator_harness(&["frações equivalentes"]).await;
    let assessments = vec![assessment("frações", "expert", ""), assessment("juros", "", "")];

    let contents = h.generator.generate(1, 1, &assessments, None).await.unwrap();
    assert!(contents.is_empty());
    assert!(h.completions.calls().is_empty());
}

#[tokio::test]
async fn subtopic_without_grounding_is_skipped_entirely() {
    // Empty knowledge store: retrieval returns nothing, so no content is
    // generated and the completion capability is never called.
    let h = generator_harness(&[]).await;
    let assessments = vec![assessment("frações", "básico", "")];

    let contents = h.generator.generate(1, 1, &assessments, None).await.unwrap();
    assert!(contents.is_empty());
    assert!(h.completions.calls().is_empty());
    assert_eq!(h.store.content_rows(), 0);
}

#[tokio::test]
async fn generation_prompt_carries_context_level_and_archetype() {
    let h = generator_harness(&["frações equivalentes e denominadores comuns"]).await;
    h.completions
        .push_response(r#"{"title": "T", "script": "S"}"#);

    let assessments = vec![assessment("frações equivalentes", "básico", "confunde conceitos")];
    h.generator
        .generate(1, 1, &assessments, Some("video"))
        .await
        .unwrap();

    let calls = h.completions.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].system.contains("NÃO inventar fatos"));
    assert!(calls[0].user.contains("Subtema: frações equivalentes"));
    assert!(calls[0].user.contains("roteiro de vídeo curto explicativo"));
    assert!(calls[0].user.contains("denominadores comuns"));
    assert!(calls[0].user.contains("confunde conceitos"));
    assert!((calls[0].temperature - 0.5).abs() < f64::EPSILON);
}
