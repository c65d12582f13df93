//! Resumen textual de los últimos turnos de la conversación, usado como
//! contexto conversacional para el LLM.

use crate::models::{Message, Role};

/// Construye el bloque de historial con los últimos `max_turns` pares
/// usuario/asistente (todo el historial si `max_turns` es 0).
///
/// Cada turno se renderiza como `"<Etiqueta>: <contenido>\n"`. No se recorta
/// por número de caracteres, sólo por número de turnos.
pub fn build_conversation_context(messages: &[Message], max_turns: usize, assistant_name: &str) -> String {
    let start = if max_turns == 0 {
        0
    } else {
        messages.len().saturating_sub(max_turns.saturating_mul(2))
    };

    let mut context = String::new();
    for msg in &messages[start..] {
        let label = match msg.role {
            Role::User => "User",
            Role::Assistant => assistant_name,
        };
        context.push_str(label);
        context.push_str(": ");
        context.push_str(&msg.content);
        context.push('\n');
    }
    context
}
