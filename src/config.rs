//! Carga y gestión de configuración de la aplicación (carpetas, límites y LLM).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }

    pub fn default_embedding_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "text-embedding-3-small",
            Self::Gemini => "embedding-001",
        }
    }

    pub fn default_chat_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-4o-mini",
            Self::Gemini => "gemini-1.5-flash",
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub frontend_dir: PathBuf,
    pub open_browser: bool,

    pub pdf_folder: PathBuf,
    pub index_dir: PathBuf,
    pub max_pdf_size_mb: u64,
    pub max_question_chars: usize,
    pub max_context_turns: usize,
    pub retrieval_top_k: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,

    pub llm_provider: LlmProvider,
    pub llm_embedding_model: String,
    pub llm_chat_model: String,
    pub llm_temperature: f64,
    pub assistant_name: String,
    pub routing_rules_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let provider = LlmProvider::OpenAI;
        Self {
            server_addr: "127.0.0.1:3322".to_string(),
            frontend_dir: PathBuf::from("frontend"),
            open_browser: false,
            pdf_folder: PathBuf::from("pdfs"),
            index_dir: PathBuf::from("faiss_index"),
            max_pdf_size_mb: 10,
            max_question_chars: 500,
            max_context_turns: 5,
            retrieval_top_k: 4,
            chunk_size: 10_000,
            chunk_overlap: 1_000,
            llm_embedding_model: provider.default_embedding_model().to_string(),
            llm_chat_model: provider.default_chat_model().to_string(),
            llm_provider: provider,
            llm_temperature: 0.3,
            assistant_name: "Lexa".to_string(),
            routing_rules_path: None,
        }
    }
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    /// Cualquier variable ausente conserva su valor por defecto.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let llm_provider_str = env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;

        let llm_embedding_model = env::var("LLM_EMBEDDING_MODEL")
            .unwrap_or_else(|_| llm_provider.default_embedding_model().to_string());
        let llm_chat_model = env::var("LLM_CHAT_MODEL")
            .unwrap_or_else(|_| llm_provider.default_chat_model().to_string());

        let cfg = Self {
            server_addr: env::var("SERVER_ADDR").unwrap_or(defaults.server_addr),
            frontend_dir: env::var("FRONTEND_DIR").map(PathBuf::from).unwrap_or(defaults.frontend_dir),
            open_browser: parse_var("OPEN_BROWSER", defaults.open_browser)?,
            pdf_folder: env::var("PDF_FOLDER").map(PathBuf::from).unwrap_or(defaults.pdf_folder),
            index_dir: env::var("INDEX_DIR").map(PathBuf::from).unwrap_or(defaults.index_dir),
            max_pdf_size_mb: parse_var("MAX_PDF_SIZE_MB", defaults.max_pdf_size_mb)?,
            max_question_chars: parse_var("MAX_QUESTION_CHARS", defaults.max_question_chars)?,
            max_context_turns: parse_var("MAX_CONTEXT_TURNS", defaults.max_context_turns)?,
            retrieval_top_k: parse_var("RETRIEVAL_TOP_K", defaults.retrieval_top_k)?,
            chunk_size: parse_var("CHUNK_SIZE", defaults.chunk_size)?,
            chunk_overlap: parse_var("CHUNK_OVERLAP", defaults.chunk_overlap)?,
            llm_provider,
            llm_embedding_model,
            llm_chat_model,
            llm_temperature: parse_var("LLM_TEMPERATURE", defaults.llm_temperature)?,
            assistant_name: env::var("ASSISTANT_NAME").unwrap_or(defaults.assistant_name),
            routing_rules_path: env::var("ROUTING_RULES_PATH").ok().map(PathBuf::from),
        };

        if cfg.chunk_size == 0 || cfg.chunk_overlap >= cfg.chunk_size {
            return Err(anyhow!(
                "CHUNK_OVERLAP ({}) debe ser menor que CHUNK_SIZE ({})",
                cfg.chunk_overlap,
                cfg.chunk_size
            ));
        }

        Ok(cfg)
    }

    /// Tamaño máximo de un PDF subido, en bytes.
    pub fn max_pdf_bytes(&self) -> u64 {
        self.max_pdf_size_mb * 1024 * 1024
    }
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("Valor inválido para {key} ('{raw}'): {e}")),
        Err(_) => Ok(default),
    }
}
