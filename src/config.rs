//! Carga y gestión de configuración de la aplicación (almacenamiento + LLM).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub data_dir: PathBuf,
    pub frontend_dir: PathBuf,
    pub open_browser: bool,

    pub llm_provider: LlmProvider,
    pub llm_chat_model: String,
    /// Credencial del servicio de IA. Sin ella todas las operaciones usan
    /// su heurística local.
    pub ai_api_key: Option<String>,

    /// Pausa entre notas durante la conversión por lotes.
    pub convert_delay: Duration,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3322".to_string());

        let data_dir = match env::var("DATA_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => dirs::data_dir()
                .ok_or_else(|| anyhow!("No se pudo determinar el directorio de datos del usuario"))?
                .join("ainote"),
        };

        let frontend_dir =
            PathBuf::from(env::var("FRONTEND_DIR").unwrap_or_else(|_| "frontend".to_string()));

        let open_browser = env::var("OPEN_BROWSER")
            .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(true);

        let llm_provider_str =
            env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;

        let llm_chat_model =
            env::var("LLM_CHAT_MODEL").unwrap_or_else(|_| "gpt-3.5-turbo".to_string());

        let ai_api_key = env::var("AI_API_KEY")
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        let convert_delay_ms = match env::var("CONVERT_DELAY_MS") {
            Ok(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("CONVERT_DELAY_MS no es un número válido: {raw}"))?,
            Err(_) => 100,
        };

        Ok(Self {
            server_addr,
            data_dir,
            frontend_dir,
            open_browser,
            llm_provider,
            llm_chat_model,
            ai_api_key,
            convert_delay: Duration::from_millis(convert_delay_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_parsing_is_case_insensitive() {
        assert_eq!(LlmProvider::from_str("OpenAI").unwrap(), LlmProvider::OpenAI);
        assert_eq!(LlmProvider::from_str("ollama").unwrap(), LlmProvider::Ollama);
        assert!(LlmProvider::from_str("claude-local").is_err());
    }
}
