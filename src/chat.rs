//! Sesiones de chat: añade el mensaje del usuario, pide la respuesta al
//! servicio de IA y persiste la sesión completa.

use anyhow::{anyhow, Result};
use chrono::Utc;

use crate::ai::AiService;
use crate::models::{new_id, truncate_chars, ChatMessage, ChatRole, ChatSession};
use crate::storage::StorageService;

const TITLE_CHARS: usize = 30;

/// Sesión vacía cuyo título sale del primer mensaje del usuario.
pub fn new_session(first_message: &str) -> ChatSession {
    let now = Utc::now();
    ChatSession {
        id: new_id(),
        title: truncate_chars(first_message.trim(), TITLE_CHARS),
        messages: Vec::new(),
        created_at: now,
        updated_at: now,
    }
}

/// Envía `content` dentro de la sesión `session_id` (o de una nueva si es
/// `None` o ya no existe) y devuelve la sesión actualizada.
pub async fn send(
    storage: &StorageService,
    ai: &AiService,
    session_id: Option<&str>,
    content: &str,
    credential: Option<&str>,
) -> Result<ChatSession> {
    let content = content.trim();
    if content.is_empty() {
        return Err(anyhow!("El mensaje está vacío"));
    }

    let mut session = session_id
        .and_then(|id| storage.get::<ChatSession>(id))
        .unwrap_or_else(|| new_session(content));

    session.messages.push(ChatMessage::new(ChatRole::User, content));
    let reply = ai.send_message(&session.messages, credential).await;
    session.messages.push(ChatMessage::new(ChatRole::Assistant, reply));
    session.updated_at = Utc::now().max(session.updated_at);

    storage.upsert(&session)?;
    Ok(session)
}

pub fn list_sessions(storage: &StorageService) -> Vec<ChatSession> {
    let mut sessions = storage.chat_sessions();
    sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    sessions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::tests::ScriptedBackend;
    use crate::ai::MISSING_KEY_REPLY;

    #[tokio::test]
    async fn first_message_creates_titled_session() {
        let storage = StorageService::in_memory();
        let ai = AiService::new(ScriptedBackend::with_replies(vec![]));
        let question = "¿Cómo funciona el sistema de préstamos de Rust en funciones async?";

        let session = send(&storage, &ai, None, question, None).await.unwrap();

        assert_eq!(session.title, truncate_chars(question, 30));
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[1].role, ChatRole::Assistant);
        assert_eq!(session.messages[1].content, MISSING_KEY_REPLY);
        assert_eq!(storage.chat_sessions().len(), 1);
    }

    #[tokio::test]
    async fn follow_up_appends_to_existing_session() {
        let storage = StorageService::in_memory();
        let backend =
            ScriptedBackend::with_replies(vec![Ok("primera".into()), Ok("segunda".into())]);
        let ai = AiService::new(backend.clone());

        let session = send(&storage, &ai, None, "hola", Some("k")).await.unwrap();
        let session = send(&storage, &ai, Some(&session.id), "otra", Some("k"))
            .await
            .unwrap();

        assert_eq!(session.title, "hola");
        let contents: Vec<&str> = session.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hola", "primera", "otra", "segunda"]);
        assert_eq!(storage.chat_sessions().len(), 1);
        // la segunda petición lleva la conversación completa
        assert_eq!(backend.requests.lock().unwrap()[1].messages.len(), 3);
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let storage = StorageService::in_memory();
        let ai = AiService::new(ScriptedBackend::with_replies(vec![]));
        assert!(send(&storage, &ai, None, "   ", None).await.is_err());
        assert!(storage.chat_sessions().is_empty());
    }
}
