//! Pedagogical analysis of a finished conversation.
//!
//! The full turn history goes to the completion capability with a rubric
//! fixing the four allowed levels; the response is expected to be a JSON
//! list of assessments. An unparsable response degrades to one synthetic
//! low-confidence assessment so the pipeline can still generate content.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::providers::completion::CompletionProvider;
use crate::types::{
    CompetenceAssessment, CompetenceLevel, ModelJson, Turn, TutorError, strip_code_fence,
};

/// Sub-topic label of the synthetic assessment emitted on parse failure.
pub const FALLBACK_SUBTOPIC: &str = "ANÁLISE_FALHOU";

const RAW_OUTPUT_PREVIEW: usize = 500;

const SYSTEM_PROMPT: &str = "\
Você é um avaliador pedagógico.

Receberá o histórico de uma conversa entre um assistente e um aluno.
Seu objetivo é identificar os SUBTEMAS discutidos e avaliar o NÍVEL DE CONHECIMENTO do aluno em cada subtema.

Avalie o nível de domínio do aluno exclusivamente pelas respostas que ele dá às perguntas — considerando precisão, clareza e coerência.
Ignore qualquer autodeclaração do aluno sobre ser bom ou ruim em um assunto.
Baseie-se apenas no desempenho real dele nas respostas.

Níveis possíveis (APENAS estes):
- \"básico\"
- \"intermediário\"
- \"avançado\"
- \"domina\"

Definição resumida:
- básico: contato superficial, muitos erros conceituais.
- intermediário: entende conceitos principais, mas com lacunas.
- avançado: domina bem, poucas lacunas.
- domina: domínio profundo, quase como especialista.

Retorne ESTRITAMENTE um JSON válido.";

/// Produces per-sub-topic competence assessments from a turn history.
pub struct AnalysisEngine {
    completions: Arc<dyn CompletionProvider>,
}

impl AnalysisEngine {
    pub fn new(completions: Arc<dyn CompletionProvider>) -> Self {
        Self { completions }
    }

    /// Judges the history, returning at least one assessment: either the
    /// model's list or the synthetic [`FALLBACK_SUBTOPIC`] entry.
    pub async fn analyze(
        &self,
        history: &[Turn],
    ) -> Result<Vec<CompetenceAssessment>, TutorError> {
        let conversation_json = serde_json::to_string_pretty(history)
            .map_err(|err| TutorError::Storage(err.to_string()))?;
        let user = build_user_prompt(&conversation_json);

        let raw = self.completions.complete(SYSTEM_PROMPT, &user, 0.1).await?;
        match parse_assessments(&raw) {
            ModelJson::Parsed(list) => Ok(list),
            ModelJson::Unparsed(raw) => {
                warn!("analysis output was not valid JSON, degrading");
                Ok(vec![fallback_assessment(&raw)])
            }
        }
    }
}

fn build_user_prompt(conversation_json: &str) -> String {
    format!(
        "A seguir está o histórico da conversa em formato JSON com campos \"pergunta\" e \"resposta\":\n\n\
         {conversation_json}\n\n\
         Agora, produza um JSON no formato:\n\n\
         [\n  {{\n    \"subtema\": \"nome do subtema\",\n    \"nivel\": \"básico|intermediário|avançado|domina\",\n    \"justificativa\": \"texto curto explicando por que você atribuiu esse nível\"\n  }}\n]\n\n\
         Retorne APENAS o JSON."
    )
}

/// Parses the model response into an assessment list. A bare JSON object is
/// normalized to a one-element list; anything else unparsable degrades.
pub fn parse_assessments(raw: &str) -> ModelJson<Vec<CompetenceAssessment>> {
    let cleaned = strip_code_fence(raw);
    let Ok(value) = serde_json::from_str::<Value>(cleaned) else {
        return ModelJson::Unparsed(raw.to_string());
    };
    let value = if value.is_object() {
        Value::Array(vec![value])
    } else {
        value
    };
    match serde_json::from_value(value) {
        Ok(list) => ModelJson::Parsed(list),
        Err(_) => ModelJson::Unparsed(raw.to_string()),
    }
}

fn fallback_assessment(raw: &str) -> CompetenceAssessment {
    let preview: String = raw.chars().take(RAW_OUTPUT_PREVIEW).collect();
    CompetenceAssessment {
        subtopic: FALLBACK_SUBTOPIC.to_string(),
        level: CompetenceLevel::Basico.as_str().to_string(),
        justification: format!(
            "Não foi possível interpretar o JSON retornado pelo modelo. Conteúdo bruto: {preview}"
        ),
    }
}
