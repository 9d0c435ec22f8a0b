//! Abstracción sobre Rig para hablar con el endpoint de chat-completion.
//! De momento se implementa OpenAI; Gemini/Ollama quedan preparados para el futuro.
//!
//! `ChatBackend` es la costura que usa `AiService`: en producción es un
//! `LlmManager`, en los tests un backend con respuestas guionizadas.

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::config::{AppConfig, LlmProvider};
use crate::models::ChatRole;

/// Un turno de conversación enviado al modelo.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Petición de chat-completion: instrucciones de sistema opcionales, turnos
/// ordenados, temperatura y límite de tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub system: Option<String>,
    pub messages: Vec<ChatTurn>,
    pub temperature: f64,
    pub max_tokens: u64,
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Lanza una única petición bloqueante y devuelve el texto completado.
    async fn complete(&self, credential: &str, request: ChatRequest) -> Result<String>;
}

/// Gestor de LLMs.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub chat_model: String,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Ok(Self {
            provider: cfg.llm_provider.clone(),
            chat_model: cfg.llm_chat_model.clone(),
        })
    }

    async fn complete_with_openai(&self, credential: &str, request: ChatRequest) -> Result<String> {
        use rig::client::CompletionClient as _;
        use rig::completion::{Chat, Message};
        use rig::providers::openai;

        let (last, history) = request
            .messages
            .split_last()
            .ok_or_else(|| anyhow!("La petición de chat no contiene mensajes"))?;
        if last.role != ChatRole::User {
            return Err(anyhow!("El último mensaje de la conversación debe ser del usuario"));
        }

        let history: Vec<Message> = history
            .iter()
            .map(|turn| match turn.role {
                ChatRole::User => Message::user(turn.content.clone()),
                ChatRole::Assistant => Message::assistant(turn.content.clone()),
            })
            .collect();

        let client = openai::Client::new(credential);

        let model_name = if self.chat_model.is_empty() {
            "gpt-3.5-turbo"
        } else {
            self.chat_model.as_str()
        };

        let mut builder = client
            .agent(model_name)
            .temperature(request.temperature)
            .max_tokens(request.max_tokens);
        if let Some(system) = request.system.as_deref() {
            builder = builder.preamble(system);
        }
        let agent = builder.build();

        let answer = agent.chat(last.content.clone(), history).await?;
        Ok(answer)
    }
}

#[async_trait]
impl ChatBackend for LlmManager {
    async fn complete(&self, credential: &str, request: ChatRequest) -> Result<String> {
        match self.provider {
            LlmProvider::OpenAI => self.complete_with_openai(credential, request).await,
            ref other => Err(anyhow!(
                "Proveedor LLM {:?} aún no implementado para chat",
                other
            )),
        }
    }
}

/// Limpia la respuesta del LLM para que sólo quede el JSON.
pub fn strip_code_fences(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markdown_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fences("  [1] "), "[1]");
    }

    #[tokio::test]
    async fn unimplemented_provider_is_an_error() {
        let manager = LlmManager {
            provider: LlmProvider::Ollama,
            chat_model: String::new(),
        };
        let request = ChatRequest {
            system: None,
            messages: vec![ChatTurn::user("hola")],
            temperature: 0.7,
            max_tokens: 10,
        };
        assert!(manager.complete("key", request).await.is_err());
    }
}
