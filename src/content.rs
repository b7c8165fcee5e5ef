//! Personalized remedial content generation.
//!
//! Only the weakest competence tier present in an analysis is remediated:
//! the minimum rank among mappable levels selects the assessments, each
//! selected sub-topic is grounded by its own retrieval pass, and one
//! content row is produced per (sub-topic × format) pair.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::providers::completion::CompletionProvider;
use crate::retrieval::{Retriever, render_context};
use crate::stores::{ContentRow, LearningStore};
use crate::types::{
    CompetenceAssessment, CompetenceLevel, ContentFormat, ModelJson, PersonalizedContent,
    TutorError, parse_model_json,
};

/// Chunks retrieved per selected sub-topic.
pub const TOP_K_DOCS: usize = 8;

/// Fixed selection-criterion label recorded in `extra_metadata`.
pub const SELECTION_CRITERION: &str = "apenas níveis de maior dificuldade na análise";

const SYSTEM_PROMPT: &str = "\
Você é um especialista em educação e criação de conteúdos didáticos personalizados.

Seu trabalho:
- Criar um conteúdo focado em sanar dificuldades do aluno em um subtema específico.
- Usar APENAS o contexto fornecido (trechos da base de documentos).
- NÃO inventar fatos fora desse contexto.
- Ser claro, objetivo e em português do Brasil.

Formato de saída:
- Retorne ESTRITAMENTE um JSON válido com:
  {
    \"title\": \"título curto e claro\",
    \"script\": \"roteiro ou texto completo\"
  }";

#[derive(Debug, Default, Deserialize)]
struct GeneratedScript {
    #[serde(default)]
    title: String,
    #[serde(default)]
    script: String,
}

/// Generates and persists remedial content for the weakest tier.
pub struct ContentGenerator {
    retriever: Arc<Retriever>,
    completions: Arc<dyn CompletionProvider>,
    store: Arc<dyn LearningStore>,
}

impl ContentGenerator {
    pub fn new(
        retriever: Arc<Retriever>,
        completions: Arc<dyn CompletionProvider>,
        store: Arc<dyn LearningStore>,
    ) -> Self {
        Self {
            retriever,
            completions,
            store,
        }
    }

    /// Produces one persisted row per (selected sub-topic × format).
    ///
    /// Assessments with unmappable levels are excluded from ranking; blank
    /// sub-topic or level rows are skipped outright; a sub-topic with no
    /// retrievable grounding is skipped entirely.
    pub async fn generate(
        &self,
        conversation_id: i64,
        analysis_id: i64,
        assessments: &[CompetenceAssessment],
        preferred_format: Option<&str>,
    ) -> Result<Vec<PersonalizedContent>, TutorError> {
        let Some(min_rank) = assessments
            .iter()
            .filter_map(|a| CompetenceLevel::parse(&a.level))
            .map(CompetenceLevel::rank)
            .min()
        else {
            return Ok(Vec::new());
        };

        let formats: Vec<ContentFormat> = preferred_format
            .and_then(ContentFormat::parse)
            .map(|format| vec![format])
            .unwrap_or_else(|| ContentFormat::ALL.to_vec());

        let mut generated = Vec::new();

        for assessment in assessments {
            let subtopic = assessment.subtopic.trim();
            let level_raw = assessment.level.trim();
            let justification = assessment.justification.trim();
            if subtopic.is_empty() || level_raw.is_empty() {
                continue;
            }
            let Some(level) = CompetenceLevel::parse(level_raw) else {
                continue;
            };
            let rank = level.rank();
            if rank != min_rank {
                continue;
            }

            let results = self.retriever.retrieve(subtopic, TOP_K_DOCS).await?;
            if results.is_empty() {
                debug!(subtopic, "no grounding chunks, skipping sub-topic");
                continue;
            }
            let context = render_context(&results);
            let source_doc_ids: Vec<i64> = results.iter().map(|r| r.id).collect();

            for format in &formats {
                let user = build_user_prompt(subtopic, level_raw, *format, justification, &context);
                let raw = self.completions.complete(SYSTEM_PROMPT, &user, 0.5).await?;

                let (title, script) = match parse_model_json::<GeneratedScript>(&raw) {
                    ModelJson::Parsed(script) => {
                        let title = if script.title.trim().is_empty() {
                            default_title(subtopic)
                        } else {
                            script.title
                        };
                        (title, script.script)
                    }
                    // Degraded parse: the raw output becomes the script.
                    ModelJson::Unparsed(raw) => (default_title(subtopic), raw),
                };

                let extra_metadata = json!({
                    "justificativa": justification,
                    "source_doc_ids": source_doc_ids,
                    "num_trechos_contexto": results.len(),
                    "nivel_rank_usado": rank,
                    "criterio_geracao": SELECTION_CRITERION,
                });

                let row = ContentRow {
                    conversation_id,
                    analysis_id,
                    subtopic: subtopic.to_string(),
                    level: level_raw.to_string(),
                    content_format: format.as_str().to_string(),
                    title,
                    script,
                    extra_metadata,
                };
                let id = self.store.insert_content(&row).await?;
                generated.push(PersonalizedContent {
                    id,
                    conversation_id: row.conversation_id,
                    analysis_id: row.analysis_id,
                    subtopic: row.subtopic,
                    level: row.level,
                    content_format: row.content_format,
                    title: row.title,
                    script: row.script,
                    extra_metadata: row.extra_metadata,
                });
            }
        }

        Ok(generated)
    }
}

fn default_title(subtopic: &str) -> String {
    format!("Conteúdo sobre {subtopic}")
}

fn build_user_prompt(
    subtopic: &str,
    level: &str,
    format: ContentFormat,
    justification: &str,
    context: &str,
) -> String {
    let justification = if justification.is_empty() {
        "(sem justificativa detalhada fornecida)"
    } else {
        justification
    };
    format!(
        "Subtema: {subtopic}\n\
         Nível atual do aluno (segundo análise): {level}\n\n\
         Tipo de conteúdo desejado: {}\n\n\
         Justificativa/resumo das dificuldades do aluno:\n{justification}\n\n\
         Contexto (trechos da base de conhecimento) – USE APENAS ESTA FONTE:\n{context}\n\n\
         Tarefa:\n\
         - Gere um conteúdo no formato especificado, explicando o subtema de forma acessível ao nível do aluno.\n\
         - Ajude o aluno a avançar, mas sem ser superficial.\n\
         - Use exemplos simples quando fizer sentido.\n\
         - Adote um tom amigável e motivador.\n\n\
         IMPORTANTE:\n\
         - Saída ESTRITAMENTE em JSON com os campos \"title\" e \"script\".\n\
         - Não inclua comentários, markdown ou texto fora do JSON.",
        format.archetype()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_prompt_names_the_archetype_and_context() {
        let prompt = build_user_prompt(
            "frações",
            "básico",
            ContentFormat::Video,
            "",
            "CONTEXTO",
        );
        assert!(prompt.contains("Subtema: frações"));
        assert!(prompt.contains("roteiro de vídeo curto explicativo"));
        assert!(prompt.contains("(sem justificativa detalhada fornecida)"));
        assert!(prompt.contains("USE APENAS ESTA FONTE:\nCONTEXTO"));
    }

    #[test]
    fn default_title_embeds_the_subtopic() {
        assert_eq!(default_title("juros compostos"), "Conteúdo sobre juros compostos");
    }
}
