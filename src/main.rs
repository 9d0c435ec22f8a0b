// Módulos de la aplicación
mod ai;
mod api;
mod app_state;
mod chat;
mod config;
mod fallback;
mod knowledge;
mod llm;
mod models;
mod notes;
mod speech;
mod storage;

use crate::app_state::{AppState, Status};
use axum::Router;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().expect("Error al cargar la configuración");

    // 3. Abrir el almacén de datos
    let file_store = storage::FileStore::open(&cfg.data_dir)
        .expect("Error abriendo el directorio de datos");
    let storage = storage::StorageService::new(
        Arc::new(file_store),
        storage::CollectionKeys::default(),
    );

    // 4. Inicializar gestor de LLMs y servicios
    let llm_manager = llm::LlmManager::from_config(&cfg).expect("Error inicializando LLM Manager");
    if cfg.ai_api_key.is_none() {
        warn!("AI_API_KEY no configurada: se usarán las heurísticas locales.");
    }
    let ai = ai::AiService::new(Arc::new(llm_manager));
    let converter = knowledge::KnowledgeConverter::new(storage.clone(), ai.clone(), cfg.convert_delay);

    // El servidor no tiene acceso a un motor de voz de plataforma.
    let speech = Arc::new(speech::SpeechRecognitionService::new(None));

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        storage,
        ai,
        converter,
        speech,
        status: Arc::new(Mutex::new(Status {
            is_busy: false,
            message: "Servidor listo.".to_string(),
            progress: 0.0,
        })),
        shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    // 6. Configurar el router de la API y el servicio de ficheros estáticos
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .fallback_service(ServeDir::new(&cfg.frontend_dir))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 7. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .expect("No se pudo abrir la dirección del servidor");
    let server_url = format!("http://{}", server_addr);
    info!("🚀 Servidor escuchando en {}", &server_url);

    // Abrir el frontend en el navegador por defecto
    if cfg.open_browser && webbrowser::open(&server_url).is_err() {
        info!("No se pudo abrir el navegador. Por favor, accede a {} manualmente.", server_url);
    }

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .expect("Error en el servidor HTTP");

    info!("✅ Servidor cerrado correctamente.");
}
