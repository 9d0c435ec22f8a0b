use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use crate::{
    ai::AiService, config::AppConfig, knowledge::KnowledgeConverter,
    speech::SpeechRecognitionService, storage::StorageService,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub storage: StorageService,
    pub ai: AiService,
    pub converter: KnowledgeConverter,
    pub speech: Arc<SpeechRecognitionService>,
    pub status: Arc<Mutex<Status>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl AppState {
    /// Credencial con la que se llama al servicio de IA.
    pub fn credential(&self) -> Option<&str> {
        self.config.ai_api_key.as_deref()
    }
}

/// Estado de las tareas en segundo plano (conversión por lotes).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
    pub progress: f32, // Valor entre 0.0 y 1.0
}
