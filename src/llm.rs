//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//! Se implementan OpenAI y Gemini, tanto para embeddings como para chat.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rig::completion::Prompt;
use rig::embeddings::EmbeddingModel; // <- para .embed_texts

use crate::config::{AppConfig, LlmProvider};

/// Tamaño de lote para las peticiones de embeddings.
const EMBED_BATCH: usize = 64;

/// Genera embeddings para textos.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Nombre del modelo, guardado junto al índice.
    fn model_name(&self) -> &str;

    /// Un vector por texto, en el mismo orden.
    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>>;
}

/// Redacta la respuesta final con el modelo de lenguaje.
#[async_trait]
pub trait AnswerComposer: Send + Sync {
    async fn compose(&self, request: &AnswerRequest<'_>) -> Result<String>;
}

/// Entrada de la plantilla de respuesta.
#[derive(Debug, Clone)]
pub struct AnswerRequest<'a> {
    pub question: &'a str,
    /// Historial ya formateado por `context::build_conversation_context`.
    pub history: &'a str,
    /// Pasajes recuperados del índice; vacío si no hay documentos.
    pub passages: &'a [String],
}

/// Instrucciones de sistema. El nombre del asistente se sustituye en `{name}`.
const SYSTEM_PROMPT: &str = r#"
You are {name}, a formal and professional assistant. Use the conversation history and provided context to answer follow-up questions.
If the answer is not in the provided context but is related to law entrance exams (CLAT, AILET, etc.), answer from your knowledge.
If the question is general conversation, respond politely and formally.
If you cannot answer, politely state that you are unable to assist with that query.
"#;

/// Renderiza la plantilla con el historial y los pasajes en secciones
/// separadas.
pub fn render_prompt(request: &AnswerRequest<'_>) -> String {
    format!(
        "Conversation history:\n{}\n\nContext from PDF:\n{}\n\nQuestion:\n{}\n\nAnswer:\n",
        request.history,
        request.passages.join("\n\n"),
        request.question
    )
}

/// Gestor de LLMs y embeddings.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub embedding_model: String,
    pub chat_model: String,
    pub temperature: f64,
    pub assistant_name: String,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        if cfg.llm_embedding_model.is_empty() || cfg.llm_chat_model.is_empty() {
            return Err(anyhow!("LLM_EMBEDDING_MODEL y LLM_CHAT_MODEL no pueden estar vacíos"));
        }
        Ok(Self {
            provider: cfg.llm_provider.clone(),
            embedding_model: cfg.llm_embedding_model.clone(),
            chat_model: cfg.llm_chat_model.clone(),
            temperature: cfg.llm_temperature,
            assistant_name: cfg.assistant_name.clone(),
        })
    }

    fn preamble(&self) -> String {
        SYSTEM_PROMPT.replace("{name}", &self.assistant_name)
    }

    // ---------------------------------------------------------------------
    // EMBEDDINGS
    // ---------------------------------------------------------------------

    async fn embed_with_openai(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>> {
        use rig::providers::openai;
        // Trait para client.embedding_model(...)
        use rig::client::EmbeddingsClient as _;

        let client = openai::Client::from_env();
        let embedding_model = client.embedding_model(&self.embedding_model);

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH) {
            let embeddings = embedding_model.embed_texts(batch.to_vec()).await?;
            vectors.extend(embeddings.into_iter().map(|e| e.vec));
        }
        Ok(vectors)
    }

    async fn embed_with_gemini(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>> {
        use rig::providers::gemini;
        use rig::client::EmbeddingsClient as _;

        let client = gemini::Client::from_env();
        let embedding_model = client.embedding_model(&self.embedding_model);

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH) {
            let embeddings = embedding_model.embed_texts(batch.to_vec()).await?;
            vectors.extend(embeddings.into_iter().map(|e| e.vec));
        }
        Ok(vectors)
    }

    // ---------------------------------------------------------------------
    // CHAT / COMPLETION
    // ---------------------------------------------------------------------

    async fn answer_with_openai(&self, prompt: &str) -> Result<String> {
        use rig::providers::openai;
        // Trait para client.agent(...)
        use rig::client::CompletionClient as _;

        let client = openai::Client::from_env();
        let agent = client
            .agent(&self.chat_model)
            .preamble(&self.preamble())
            .temperature(self.temperature)
            .build();

        let answer = agent.prompt(prompt).await?;
        Ok(answer)
    }

    async fn answer_with_gemini(&self, prompt: &str) -> Result<String> {
        use rig::providers::gemini;
        use rig::client::CompletionClient as _;

        let client = gemini::Client::from_env();
        let agent = client
            .agent(&self.chat_model)
            .preamble(&self.preamble())
            .temperature(self.temperature)
            .build();

        let answer = agent.prompt(prompt).await?;
        Ok(answer)
    }
}

#[async_trait]
impl Embedder for LlmManager {
    fn model_name(&self) -> &str {
        &self.embedding_model
    }

    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>> {
        let expected = texts.len();
        let vectors = match self.provider {
            LlmProvider::OpenAI => self.embed_with_openai(texts).await?,
            LlmProvider::Gemini => self.embed_with_gemini(texts).await?,
        };

        if vectors.len() != expected {
            return Err(anyhow!(
                "Número de embeddings ({}) distinto al número de textos ({})",
                vectors.len(),
                expected
            ));
        }
        Ok(vectors)
    }
}

#[async_trait]
impl AnswerComposer for LlmManager {
    async fn compose(&self, request: &AnswerRequest<'_>) -> Result<String> {
        let prompt = render_prompt(request);
        match self.provider {
            LlmProvider::OpenAI => self.answer_with_openai(&prompt).await,
            LlmProvider::Gemini => self.answer_with_gemini(&prompt).await,
        }
    }
}
