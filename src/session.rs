//! Estado por sesión: historial de mensajes y el índice que la sesión construyó.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::models::Message;
use crate::vector_store::IndexHandle;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuestionError {
    #[error("Please limit your question to {max} characters.")]
    TooLong { max: usize },
}

/// Valida la longitud de una pregunta (en caracteres, no en bytes).
pub fn validate_question(question: &str, max_chars: usize) -> Result<(), QuestionError> {
    if question.chars().count() > max_chars {
        return Err(QuestionError::TooLong { max: max_chars });
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<Message>,
    pub index: Option<IndexHandle>,
    /// Se incrementa cada vez que el historial se reinicia.
    pub generation: u64,
}

impl Session {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            messages: Vec::new(),
            index: None,
            generation: 0,
        }
    }

    /// Espacio de nombres del índice de esta sesión.
    pub fn namespace(&self) -> String {
        self.id.to_string()
    }

    pub fn index_ready(&self) -> bool {
        self.index.is_some()
    }
}

/// Registro en memoria de sesiones. Nunca se mantiene el cerrojo durante
/// llamadas de red: se copia lo necesario, se calcula y se vuelve a bloquear.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<Uuid, Session>>>,
}

impl SessionRegistry {
    pub fn create(&self) -> Uuid {
        let session = Session::new();
        let id = session.id;
        self.lock().insert(id, session);
        info!("Sesión creada: {id}");
        id
    }

    pub fn get(&self, id: Uuid) -> Option<Session> {
        self.lock().get(&id).cloned()
    }

    /// Añade un mensaje al historial. Devuelve `false` si la sesión no existe.
    pub fn push_message(&self, id: Uuid, message: Message) -> bool {
        match self.lock().get_mut(&id) {
            Some(session) => {
                session.messages.push(message);
                true
            }
            None => false,
        }
    }

    /// Añade la respuesta del asistente sólo si el historial no se ha
    /// reiniciado desde `generation`; si no, la respuesta quedaría huérfana.
    pub fn push_reply(&self, id: Uuid, generation: u64, message: Message) -> bool {
        match self.lock().get_mut(&id) {
            Some(session) if session.generation == generation => {
                session.messages.push(message);
                true
            }
            _ => false,
        }
    }

    /// Fija el índice recién construido y vacía el historial.
    pub fn set_index(&self, id: Uuid, handle: IndexHandle) -> bool {
        match self.lock().get_mut(&id) {
            Some(session) => {
                session.index = Some(handle);
                session.messages.clear();
                session.generation += 1;
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Session>> {
        // Un pánico con el cerrojo tomado no deja el mapa a medio modificar.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn question_length_counts_characters() {
        assert!(validate_question(&"a".repeat(500), 500).is_ok());
        assert_eq!(
            validate_question(&"a".repeat(501), 500),
            Err(QuestionError::TooLong { max: 500 })
        );
        // 500 caracteres de dos bytes siguen siendo válidos.
        assert!(validate_question(&"é".repeat(500), 500).is_ok());
        assert_eq!(
            QuestionError::TooLong { max: 500 }.to_string(),
            "Please limit your question to 500 characters."
        );
    }

    #[test]
    fn sessions_are_independent() {
        let registry = SessionRegistry::default();
        let a = registry.create();
        let b = registry.create();

        assert!(registry.push_message(a, Message::user("hello")));
        assert_eq!(registry.get(a).unwrap().messages.len(), 1);
        assert!(registry.get(b).unwrap().messages.is_empty());
        assert!(!registry.push_message(Uuid::new_v4(), Message::user("lost")));
    }

    #[test]
    fn setting_an_index_resets_the_transcript() {
        let registry = SessionRegistry::default();
        let id = registry.create();
        registry.push_message(id, Message::user("hi"));
        registry.push_message(id, Message::assistant("Hello!"));

        let handle = IndexHandle {
            namespace: id.to_string(),
            version: 1,
            dir: PathBuf::from("idx"),
        };
        assert!(registry.set_index(id, handle.clone()));

        let session = registry.get(id).unwrap();
        assert!(session.messages.is_empty());
        assert!(session.index_ready());
        assert_eq!(session.index, Some(handle));
        assert_eq!(session.namespace(), id.to_string());
        assert_eq!(session.generation, 1);
    }

    #[test]
    fn reply_after_a_reset_is_dropped() {
        let registry = SessionRegistry::default();
        let id = registry.create();
        let generation = registry.get(id).unwrap().generation;
        registry.push_message(id, Message::user("what is clat?"));

        let handle = IndexHandle {
            namespace: id.to_string(),
            version: 1,
            dir: PathBuf::from("idx"),
        };
        registry.set_index(id, handle);

        assert!(!registry.push_reply(id, generation, Message::assistant("late answer")));
        assert!(registry.get(id).unwrap().messages.is_empty());

        let current = registry.get(id).unwrap().generation;
        assert!(registry.push_reply(id, current, Message::assistant("fresh")));
    }
}
