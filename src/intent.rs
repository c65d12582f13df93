//! Clasificación de intención por palabras clave y tabla de respuestas fijas.
//!
//! Las listas son ordenadas: el orden es el orden de evaluación y la primera
//! coincidencia gana. El dominio se evalúa antes que la conversación general.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::Intent;

const DOMAIN_KEYWORDS: &[&str] = &[
    "clat", "ailet", "lsat", "slat", "mht cet law", "law entrance", "law exam", "law exams",
    "law colleges", "nlus", "nlu", "syllabus", "pattern", "admit card", "result", "application",
    "eligibility", "reservation", "cutoff", "counselling", "exam date", "registration",
    "constitution", "law", "legal", "court", "judiciary", "rights", "parliament",
    "contract", "criminal", "tort", "ipc", "crpc", "evidence", "gk", "current affairs",
    "english", "logical reasoning", "quantitative", "aptitude", "legal studies",
];

const GENERAL_KEYWORDS: &[&str] = &[
    "hello", "hi", "hey", "how are you", "good morning", "good evening", "good night",
    "thank you", "thanks", "bye", "see you", "what's up", "how's it going", "who are you",
    "your name", "help", "can you help", "nice to meet you",
];

const REPLY_TABLE: &[(&[&str], &str)] = &[
    (&["hello", "hi", "hey"], "Hello! How may I assist you today?"),
    (
        &["how are you"],
        "I am an AI assistant and do not possess feelings, but I am here to help you.",
    ),
    (
        &["thank"],
        "You are most welcome. If you have any further queries, please let me know.",
    ),
    (
        &["bye", "see you"],
        "Goodbye! If you have more questions in the future, feel free to return.",
    ),
    (
        &["your name"],
        "My name is Lexa, your formal assistant for law entrance exam and PDF queries.",
    ),
    (
        &["help"],
        "Certainly! You may ask me questions about your uploaded PDFs or law entrance exams such as CLAT, AILET, and more.",
    ),
];

const FALLBACK_REPLY: &str =
    "I am here to assist you with your queries regarding law entrance exams and your uploaded documents.";

pub const REFUSAL: &str = "I am sorry, but I am unable to assist with that query.";

/// Regla `disparadores → respuesta` de la tabla de conversación general.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRule {
    pub triggers: Vec<String>,
    pub reply: String,
}

/// Reglas de enrutado por palabras clave, cargables desde JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRules {
    pub domain_keywords: Vec<String>,
    pub general_keywords: Vec<String>,
    pub replies: Vec<ReplyRule>,
    pub fallback_reply: String,
    pub refusal: String,
}

impl Default for RoutingRules {
    fn default() -> Self {
        let owned = |words: &[&str]| words.iter().map(|w| w.to_string()).collect::<Vec<_>>();
        Self {
            domain_keywords: owned(DOMAIN_KEYWORDS),
            general_keywords: owned(GENERAL_KEYWORDS),
            replies: REPLY_TABLE
                .iter()
                .map(|&(triggers, reply)| ReplyRule {
                    triggers: owned(triggers),
                    reply: reply.to_string(),
                })
                .collect(),
            fallback_reply: FALLBACK_REPLY.to_string(),
            refusal: REFUSAL.to_string(),
        }
    }
}

impl RoutingRules {
    /// Reglas por defecto, o las de `path` si se indica.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("No se pudo leer el fichero de reglas {}", path.display()))?;
                let rules = Self::from_json(&raw)
                    .with_context(|| format!("Fichero de reglas inválido: {}", path.display()))?;
                info!(
                    "Reglas de enrutado cargadas desde {} ({} de dominio, {} generales, {} respuestas).",
                    path.display(),
                    rules.domain_keywords.len(),
                    rules.general_keywords.len(),
                    rules.replies.len()
                );
                Ok(rules)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let rules: Self = serde_json::from_str(raw)?;
        Ok(rules.normalized())
    }

    /// Pasa las palabras clave a minúsculas y descarta las vacías,
    /// que coincidirían con cualquier pregunta.
    fn normalized(mut self) -> Self {
        lowercase_keywords(&mut self.domain_keywords);
        lowercase_keywords(&mut self.general_keywords);
        for rule in &mut self.replies {
            lowercase_keywords(&mut rule.triggers);
        }
        self
    }

    pub fn is_domain_related(&self, question: &str) -> bool {
        contains_any(&question.to_lowercase(), &self.domain_keywords)
    }

    pub fn is_general_conversation(&self, question: &str) -> bool {
        contains_any(&question.to_lowercase(), &self.general_keywords)
    }

    pub fn classify(&self, question: &str) -> Intent {
        if self.is_domain_related(question) {
            Intent::DomainRelated
        } else if self.is_general_conversation(question) {
            Intent::GeneralConversation
        } else {
            Intent::OutOfScope
        }
    }

    /// Respuesta fija para una pregunta de conversación general.
    pub fn general_reply(&self, question: &str) -> &str {
        let q = question.to_lowercase();
        self.replies
            .iter()
            .find(|rule| contains_any(&q, &rule.triggers))
            .map(|rule| rule.reply.as_str())
            .unwrap_or(self.fallback_reply.as_str())
    }
}

fn lowercase_keywords(words: &mut Vec<String>) {
    *words = words
        .iter()
        .map(|w| w.to_lowercase())
        .filter(|w| !w.trim().is_empty())
        .collect();
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle.as_str()))
}
