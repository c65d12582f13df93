//! Enrutado de preguntas: índice de la sesión, palabras clave o LLM.
//!
//! Flujo por pregunta:
//!   1. Si la sesión no tiene índice, no hay recuperación.
//!   2. Si lo tiene, búsqueda vectorial con la pregunta en minúsculas. Un
//!      fallo de carga o consulta se avisa al usuario y cuenta como "sin
//!      resultados".
//!   3. Sin resultados (o con el primero en blanco): clasificación por
//!      palabras clave → LLM sin documentos, respuesta fija o rechazo.
//!   4. Con resultados: LLM con los pasajes, sea cual sea la intención.
//!
//! La respuesta se añade al historial como turno del asistente. Los fallos
//! del LLM no se reintentan ni se capturan: la interacción termina sin turno
//! del asistente.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    context::build_conversation_context,
    intent::RoutingRules,
    llm::{AnswerComposer, AnswerRequest, Embedder},
    models::{Intent, Message, Route},
    session::{validate_question, QuestionError, SessionRegistry},
    vector_store::{search_top_chunks, IndexHandle, IndexStore},
};

/// Parámetros de conversación que no dependen del proveedor.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub max_question_chars: usize,
    pub max_context_turns: usize,
    pub retrieval_top_k: usize,
    pub assistant_name: String,
}

impl From<&AppConfig> for ChatSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            max_question_chars: cfg.max_question_chars,
            max_context_turns: cfg.max_context_turns,
            retrieval_top_k: cfg.retrieval_top_k,
            assistant_name: cfg.assistant_name.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AskError {
    #[error(transparent)]
    Invalid(#[from] QuestionError),
    #[error("Unknown session: {0}")]
    UnknownSession(Uuid),
    #[error("The language model request failed: {0}")]
    Composer(anyhow::Error),
}

/// Resultado de una pregunta.
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub reply: String,
    pub route: Route,
    /// Avisos no fatales (p.ej. índice ilegible) para mostrar al usuario.
    pub notices: Vec<String>,
}

pub struct RagEngine {
    pub rules: Arc<RoutingRules>,
    pub embedder: Arc<dyn Embedder>,
    pub composer: Arc<dyn AnswerComposer>,
    pub index_store: IndexStore,
    pub settings: ChatSettings,
}

impl RagEngine {
    /// Valida, registra la pregunta, la responde y registra la respuesta.
    pub async fn ask(
        &self,
        sessions: &SessionRegistry,
        session_id: Uuid,
        question: &str,
    ) -> Result<RouteOutcome, AskError> {
        validate_question(question, self.settings.max_question_chars)?;

        let session = sessions
            .get(session_id)
            .ok_or(AskError::UnknownSession(session_id))?;
        sessions.push_message(session_id, Message::user(question));

        // Historial sin la pregunta recién enviada.
        let history = build_conversation_context(
            &session.messages,
            self.settings.max_context_turns,
            &self.settings.assistant_name,
        );

        let outcome = self
            .answer(question, &history, session.index.as_ref())
            .await
            .map_err(AskError::Composer)?;

        if !sessions.push_reply(session_id, session.generation, Message::assistant(outcome.reply.clone())) {
            info!("Historial de la sesión {} reiniciado durante la respuesta; no se guarda.", session_id);
        }
        Ok(outcome)
    }

    /// Decide la ruta y obtiene la respuesta. Sólo falla si falla el LLM.
    pub async fn answer(
        &self,
        question: &str,
        history: &str,
        index: Option<&IndexHandle>,
    ) -> anyhow::Result<RouteOutcome> {
        let mut notices = Vec::new();

        let passages = match index {
            None => Vec::new(),
            Some(handle) => match self.retrieve(question, handle).await {
                Ok(passages) => passages,
                Err(e) => {
                    warn!("Error cargando el índice '{}' v{}: {}", handle.namespace, handle.version, e);
                    notices.push(format!("Error loading vector store: {e}"));
                    Vec::new()
                }
            },
        };

        let has_grounding = passages.first().map(|p| !p.trim().is_empty()).unwrap_or(false);
        if has_grounding {
            info!("Respondiendo con {} pasajes recuperados.", passages.len());
            let reply = self.compose(question, history, &passages).await?;
            return Ok(RouteOutcome {
                reply,
                route: Route::Documents,
                notices,
            });
        }

        let intent = self.rules.classify(question);
        info!("Sin pasajes; intención clasificada como {:?}.", intent);
        let (reply, route) = match intent {
            Intent::DomainRelated => (self.compose(question, history, &[]).await?, Route::LanguageModel),
            Intent::GeneralConversation => (self.rules.general_reply(question).to_string(), Route::SmallTalk),
            Intent::OutOfScope => (self.rules.refusal.clone(), Route::Refusal),
        };

        Ok(RouteOutcome { reply, route, notices })
    }

    async fn retrieve(
        &self,
        question: &str,
        handle: &IndexHandle,
    ) -> Result<Vec<String>, crate::vector_store::IndexError> {
        let results = search_top_chunks(
            &self.index_store,
            handle,
            self.embedder.as_ref(),
            &question.to_lowercase(),
            self.settings.retrieval_top_k,
        )
        .await?;
        Ok(results.into_iter().map(|(_, doc)| doc.text).collect())
    }

    async fn compose(&self, question: &str, history: &str, passages: &[String]) -> anyhow::Result<String> {
        let request = AnswerRequest {
            question,
            history,
            passages,
        };
        self.composer.compose(&request).await
    }
}
