//! Servicio de IA: chat, resúmenes, etiquetas, mapas mentales y literatura.
//!
//! Nunca devuelve error al llamante. Sin credencial se usa directamente la
//! heurística local de `fallback`; con credencial se hace una única petición
//! y cualquier fallo (red, estado no 2xx, JSON inválido) se registra y se
//! degrada a la misma heurística.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Utc;
use tracing::{debug, warn};

use crate::fallback;
use crate::llm::{strip_code_fences, ChatBackend, ChatRequest, ChatTurn};
use crate::models::{
    new_id, ChatMessage, Literature, LiteratureDraft, MindMap, MindMapDraft,
};

pub const MISSING_KEY_REPLY: &str =
    "Configura una API key de IA en los ajustes para usar el chat.";
pub const UNAVAILABLE_REPLY: &str =
    "Lo siento, el servicio de IA no está disponible. Revisa la conexión de red y la configuración de la API.";
pub const DEFAULT_MIND_MAP_TITLE: &str = "Mapa mental";

const MIN_LITERATURE: usize = 3;
const MAX_LITERATURE: usize = 5;

const SUMMARY_PROMPT: &str =
    "Genera un resumen conciso del siguiente contenido, en el mismo idioma del texto y con no más de 100 caracteres.";

#[derive(Clone)]
pub struct AiService {
    backend: Arc<dyn ChatBackend>,
}

impl AiService {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }

    // ---------------------------------------------------------------------
    // CHAT
    // ---------------------------------------------------------------------

    pub async fn send_message(&self, messages: &[ChatMessage], credential: Option<&str>) -> String {
        let Some(key) = credential else {
            return MISSING_KEY_REPLY.to_string();
        };

        let request = ChatRequest {
            system: None,
            messages: messages
                .iter()
                .map(|m| ChatTurn {
                    role: m.role,
                    content: m.content.clone(),
                })
                .collect(),
            temperature: 0.7,
            max_tokens: 1000,
        };

        match self.backend.complete(key, request).await {
            Ok(answer) if !answer.trim().is_empty() => answer,
            Ok(_) => {
                warn!("El servicio de IA devolvió una respuesta vacía");
                UNAVAILABLE_REPLY.to_string()
            }
            Err(e) => {
                warn!("Error del servicio de IA: {e:#}");
                UNAVAILABLE_REPLY.to_string()
            }
        }
    }

    // ---------------------------------------------------------------------
    // RESUMEN Y ETIQUETAS
    // ---------------------------------------------------------------------

    pub async fn generate_summary(&self, text: &str, credential: Option<&str>) -> String {
        let Some(key) = credential else {
            return fallback::first_sentence_summary(text);
        };

        let request = ChatRequest {
            system: Some(SUMMARY_PROMPT.to_string()),
            messages: vec![ChatTurn::user(text)],
            temperature: 0.3,
            max_tokens: 150,
        };

        match self.backend.complete(key, request).await {
            Ok(summary) if !summary.trim().is_empty() => summary.trim().to_string(),
            Ok(_) => {
                warn!("Resumen vacío del servicio de IA, se usa la primera frase");
                fallback::first_sentence_summary(text)
            }
            Err(e) => {
                warn!("Error generando resumen: {e:#}");
                fallback::first_sentence_summary(text)
            }
        }
    }

    /// Siempre local: hasta 5 etiquetas por frecuencia.
    pub fn extract_tags(&self, text: &str) -> Vec<String> {
        fallback::extract_tags(text)
    }

    // ---------------------------------------------------------------------
    // MAPA MENTAL
    // ---------------------------------------------------------------------

    pub async fn generate_mind_map(&self, text: &str, credential: Option<&str>) -> MindMap {
        let draft = match credential {
            None => fallback::template_mind_map(text),
            Some(key) => match self.request_mind_map(key, text).await {
                Ok(draft) => draft,
                Err(e) => {
                    warn!("Error generando el mapa mental: {e:#}");
                    fallback::template_mind_map(text)
                }
            },
        };

        let root = draft.root.into_node();
        debug!("Mapa mental generado con {} nodos", root.node_count());

        let now = Utc::now();
        MindMap {
            id: new_id(),
            title: draft
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MIND_MAP_TITLE.to_string()),
            root,
            created_at: now,
            updated_at: now,
            source_note_id: None,
        }
    }

    async fn request_mind_map(&self, key: &str, text: &str) -> Result<MindMapDraft> {
        let schema = serde_json::to_string_pretty(&schemars::schema_for!(MindMapDraft))?;
        let system = format!(
            "Analiza el contenido y genera la estructura de un mapa mental. \
La respuesta DEBE ser un único objeto JSON válido que cumpla este JSON Schema:\n{schema}\n\
`root` es el tema central; cada rama tiene `name` y, opcionalmente, `children`. \
No incluyas explicaciones, solo el JSON."
        );

        let request = ChatRequest {
            system: Some(system),
            messages: vec![ChatTurn::user(text)],
            temperature: 0.3,
            max_tokens: 2000,
        };

        let response = self.backend.complete(key, request).await?;
        let draft: MindMapDraft = serde_json::from_str(strip_code_fences(&response))
            .map_err(|e| anyhow!("JSON de mapa mental inválido: {e}. Respuesta LLM: '{response}'"))?;
        Ok(draft)
    }

    // ---------------------------------------------------------------------
    // LITERATURA
    // ---------------------------------------------------------------------

    /// Devuelve entre 3 y 5 referencias con relevancia en [0, 1].
    pub async fn search_literature(&self, text: &str, credential: Option<&str>) -> Vec<Literature> {
        let drafts = match credential {
            None => fallback::template_literature(text),
            Some(key) => match self.request_literature(key, text).await {
                Ok(drafts) => drafts,
                Err(e) => {
                    warn!("Error buscando literatura: {e:#}");
                    fallback::template_literature(text)
                }
            },
        };

        let now = Utc::now();
        drafts
            .into_iter()
            .map(|draft| draft.into_literature(now))
            .collect()
    }

    async fn request_literature(&self, key: &str, text: &str) -> Result<Vec<LiteratureDraft>> {
        let schema = serde_json::to_string_pretty(&schemars::schema_for!(Vec<LiteratureDraft>))?;
        let system = format!(
            "A partir del contenido del usuario, recomienda literatura académica relacionada. \
La respuesta DEBE ser un array JSON válido que cumpla este JSON Schema:\n{schema}\n\
Genera entre 3 y 5 recomendaciones; `relevanceScore` es un número entre 0 y 1. \
No incluyas explicaciones, solo el JSON."
        );

        let request = ChatRequest {
            system: Some(system),
            messages: vec![ChatTurn::user(text)],
            temperature: 0.5,
            max_tokens: 2000,
        };

        let response = self.backend.complete(key, request).await?;
        let mut drafts: Vec<LiteratureDraft> = serde_json::from_str(strip_code_fences(&response))
            .map_err(|e| anyhow!("JSON de literatura inválido: {e}. Respuesta LLM: '{response}'"))?;

        if drafts.len() < MIN_LITERATURE {
            return Err(anyhow!(
                "El modelo devolvió {} referencias, se esperaban al menos {MIN_LITERATURE}",
                drafts.len()
            ));
        }
        if drafts.len() > MAX_LITERATURE {
            debug!("Se recortan {} referencias a {MAX_LITERATURE}", drafts.len());
            drafts.truncate(MAX_LITERATURE);
        }
        Ok(drafts)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::ChatRole;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Backend guionizado: devuelve las respuestas en orden y registra las peticiones.
    #[derive(Default)]
    pub(crate) struct ScriptedBackend {
        replies: Mutex<VecDeque<Result<String>>>,
        pub(crate) requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedBackend {
        pub(crate) fn with_replies(replies: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn complete(&self, _credential: &str, request: ChatRequest) -> Result<String> {
            self.requests.lock().unwrap().push(request);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow!("sin respuesta guionizada")))
        }
    }

    fn service(backend: &Arc<ScriptedBackend>) -> AiService {
        AiService::new(backend.clone())
    }

    #[tokio::test]
    async fn summary_without_credential_never_calls_backend() {
        let backend = ScriptedBackend::with_replies(vec![Ok("remoto".into())]);
        let ai = service(&backend);

        let summary = ai.generate_summary("Primera frase. Segunda.", None).await;
        assert_eq!(summary, "Primera frase");
        assert_eq!(backend.request_count(), 0);
    }

    #[tokio::test]
    async fn summary_uses_remote_text_when_available() {
        let backend = ScriptedBackend::with_replies(vec![Ok("  Resumen remoto \n".into())]);
        let ai = service(&backend);

        assert_eq!(ai.generate_summary("texto", Some("k")).await, "Resumen remoto");
        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests[0].max_tokens, 150);
        assert_eq!(requests[0].temperature, 0.3);
    }

    #[tokio::test]
    async fn summary_degrades_on_remote_failure() {
        let backend = ScriptedBackend::with_replies(vec![Err(anyhow!("HTTP 500"))]);
        let ai = service(&backend);
        assert_eq!(ai.generate_summary("Una. Dos.", Some("k")).await, "Una");
    }

    #[tokio::test]
    async fn chat_without_credential_returns_notice() {
        let backend = ScriptedBackend::with_replies(vec![]);
        let ai = service(&backend);
        let messages = vec![ChatMessage::new(ChatRole::User, "hola")];
        assert_eq!(ai.send_message(&messages, None).await, MISSING_KEY_REPLY);
    }

    #[tokio::test]
    async fn chat_forwards_ordered_turns() {
        let backend = ScriptedBackend::with_replies(vec![Ok("respuesta".into())]);
        let ai = service(&backend);
        let messages = vec![
            ChatMessage::new(ChatRole::User, "pregunta 1"),
            ChatMessage::new(ChatRole::Assistant, "respuesta 1"),
            ChatMessage::new(ChatRole::User, "pregunta 2"),
        ];

        assert_eq!(ai.send_message(&messages, Some("k")).await, "respuesta");
        let requests = backend.requests.lock().unwrap();
        let roles: Vec<ChatRole> = requests[0].messages.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![ChatRole::User, ChatRole::Assistant, ChatRole::User]);
        assert_eq!(requests[0].max_tokens, 1000);
    }

    #[tokio::test]
    async fn chat_failure_returns_apology() {
        let backend = ScriptedBackend::with_replies(vec![Err(anyhow!("timeout"))]);
        let ai = service(&backend);
        let messages = vec![ChatMessage::new(ChatRole::User, "hola")];
        assert_eq!(ai.send_message(&messages, Some("k")).await, UNAVAILABLE_REPLY);
    }

    #[tokio::test]
    async fn mind_map_parses_fenced_json() {
        let reply = "```json\n{\"title\":\"Rust\",\"root\":{\"name\":\"Rust\",\"children\":[{\"name\":\"Ownership\"},{\"name\":\"Traits\",\"children\":[{\"name\":\"dyn\"}]}]}}\n```";
        let backend = ScriptedBackend::with_replies(vec![Ok(reply.into())]);
        let ai = service(&backend);

        let map = ai.generate_mind_map("texto", Some("k")).await;
        assert_eq!(map.title, "Rust");
        assert_eq!(map.root.node_count(), 4);
    }

    #[tokio::test]
    async fn mind_map_falls_back_on_malformed_json() {
        let backend = ScriptedBackend::with_replies(vec![Ok("no es json".into())]);
        let ai = service(&backend);

        let map = ai.generate_mind_map("Primera idea. Segunda idea.", Some("k")).await;
        assert_eq!(map.title, "Mapa mental del contenido");
        assert_eq!(map.root.children.as_ref().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn literature_is_normalised_and_capped() {
        let items: Vec<String> = (0..7)
            .map(|i| format!("{{\"title\":\"Paper {i}\",\"relevanceScore\":{}}}", 0.3 * i as f64))
            .collect();
        let reply = format!("[{}]", items.join(","));
        let backend = ScriptedBackend::with_replies(vec![Ok(reply)]);
        let ai = service(&backend);

        let lit = ai.search_literature("texto", Some("k")).await;
        assert_eq!(lit.len(), MAX_LITERATURE);
        assert!(lit.iter().all(|l| (0.0..=1.0).contains(&l.relevance_score)));
        assert_eq!(lit[4].relevance_score, 1.0);
    }

    #[tokio::test]
    async fn too_few_literature_records_fall_back_to_templates() {
        let backend =
            ScriptedBackend::with_replies(vec![Ok("[{\"title\":\"solo uno\"}]".into())]);
        let ai = service(&backend);

        let lit = ai.search_literature("redes redes grafos", Some("k")).await;
        assert_eq!(lit.len(), 3);
        assert!(lit[0].title.contains("redes"));
    }
}
