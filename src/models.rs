//! Modelos de dominio (turnos de conversación, documentos e intenciones).

use serde::{Deserialize, Serialize};

/// Autor de un turno de la conversación.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Un turno de la conversación. Inmutable una vez creado.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Un PDF almacenado en la carpeta de documentos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentRecord {
    pub filename: String,
    pub size_bytes: u64,
}

/// Clasificación gruesa de una pregunta por palabras clave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    DomainRelated,
    GeneralConversation,
    OutOfScope,
}

/// Camino que ha seguido una pregunta hasta obtener respuesta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// El LLM respondió con pasajes recuperados del índice.
    Documents,
    /// El LLM respondió sin pasajes (pregunta del dominio).
    LanguageModel,
    /// Respuesta fija de la tabla de conversación general.
    SmallTalk,
    /// Rechazo fijo.
    Refusal,
}
