use std::path::PathBuf;
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::spawn;
use tracing::{error, info};

use crate::{
    app_state::{AppState, Status},
    chat,
    knowledge::{self, SourceNote},
    models::{ChatSession, ConversionStats, KnowledgeItem, Literature, MindMap, Note, RelevanceLevel},
    notes::{self, NoteDraft},
    speech::SpeechState,
    storage::ImportSummary,
};

type ApiError = (StatusCode, Json<serde_json::Value>);

fn bad_request(message: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message.into() })))
}

fn internal(context: &str, err: anyhow::Error) -> ApiError {
    error!("{context}: {err:#}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": format!("{context}: {err}") })),
    )
}

fn not_found(what: &str) -> ApiError {
    (StatusCode::NOT_FOUND, Json(json!({ "error": format!("{what} no encontrado") })))
}

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct SearchParams {
    q: Option<String>,
}

impl SearchParams {
    fn query(&self) -> Option<&str> {
        self.q.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }
}

#[derive(Deserialize)]
pub struct ContentPayload {
    content: String,
}

impl ContentPayload {
    fn require(&self) -> Result<&str, ApiError> {
        let content = self.content.trim();
        if content.is_empty() {
            return Err(bad_request("Primero escribe algún contenido."));
        }
        Ok(content)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    session_id: Option<String>,
    content: String,
}

#[derive(Deserialize)]
pub struct PathPayload {
    path: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeDetail {
    item: KnowledgeItem,
    /// `None` si el ítem no procede de una nota.
    source_note: Option<SourceNote>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedLiterature {
    #[serde(flatten)]
    literature: Literature,
    relevance: RelevanceLevel,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/notes", get(list_notes_handler).post(save_note_handler))
        .route("/api/notes/:id", delete(delete_note_handler))
        .route("/api/knowledge", get(list_knowledge_handler))
        .route("/api/knowledge/stats", get(knowledge_stats_handler))
        .route("/api/knowledge/batch-convert", post(batch_convert_handler))
        .route("/api/knowledge/:id", get(knowledge_detail_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/sessions", get(list_sessions_handler))
        .route("/api/chat/sessions/:id", delete(delete_session_handler))
        .route("/api/ai/summary", post(summary_handler))
        .route("/api/ai/tags", post(tags_handler))
        .route("/api/ai/mind-map", post(mind_map_handler))
        .route("/api/ai/literature", post(literature_handler))
        .route("/api/speech", get(speech_state_handler))
        .route("/api/speech/start", post(speech_start_handler))
        .route("/api/speech/stop", post(speech_stop_handler))
        .route("/api/speech/toggle", post(speech_toggle_handler))
        .route("/api/speech/clear", post(speech_clear_handler))
        .route("/api/data/export", post(export_handler))
        .route("/api/data/import", post(import_handler))
        .route("/api/status", get(status_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Notas ---

#[axum::debug_handler]
async fn list_notes_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Json<Vec<Note>> {
    Json(notes::list_notes(&state.storage, params.query()))
}

#[axum::debug_handler]
async fn save_note_handler(
    State(state): State<AppState>,
    Json(draft): Json<NoteDraft>,
) -> Result<Json<Note>, ApiError> {
    if draft.title.trim().is_empty() && draft.content.trim().is_empty() {
        return Err(bad_request("La nota necesita un título o contenido."));
    }
    let note = notes::save_note(&state.storage, draft)
        .map_err(|e| internal("Error al guardar la nota", e))?;

    // La conversión a conocimiento no bloquea la respuesta.
    state
        .converter
        .spawn_auto_convert(note.clone(), state.config.ai_api_key.clone());

    Ok(Json(note))
}

#[axum::debug_handler]
async fn delete_note_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    // El ítem de conocimiento derivado se conserva.
    match state.storage.delete::<Note>(&id) {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err(not_found("Nota")),
        Err(e) => Err(internal("Error al borrar la nota", e)),
    }
}

// --- Base de conocimiento ---

#[axum::debug_handler]
async fn list_knowledge_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Json<Vec<KnowledgeItem>> {
    let query = params.query();
    let mut items: Vec<KnowledgeItem> = state
        .storage
        .knowledge_items()
        .into_iter()
        .filter(|item| query.map_or(true, |q| item.matches_query(q)))
        .collect();
    items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    Json(items)
}

#[axum::debug_handler]
async fn knowledge_detail_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<KnowledgeDetail>, ApiError> {
    let item = state
        .storage
        .get::<KnowledgeItem>(&id)
        .ok_or_else(|| not_found("Ítem de conocimiento"))?;

    let source_note = knowledge::source_note(&state.storage, &item);

    Ok(Json(KnowledgeDetail { item, source_note }))
}

#[axum::debug_handler]
async fn knowledge_stats_handler(State(state): State<AppState>) -> Json<ConversionStats> {
    Json(state.converter.conversion_stats())
}

#[axum::debug_handler]
async fn batch_convert_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    {
        let mut status = state.status.lock().unwrap();
        if status.is_busy {
            return Err((
                StatusCode::CONFLICT,
                Json(json!({"error": "Ya hay una tarea en curso."})),
            ));
        }
        status.is_busy = true;
        status.message = "Iniciando conversión de notas...".to_string();
        status.progress = 0.0;
    }

    spawn(async move {
        let summary = state
            .converter
            .batch_convert(state.credential(), state.status.clone())
            .await;

        let mut status = state.status.lock().unwrap();
        status.is_busy = false;
        status.progress = 0.0;
        status.message = format!("¡Conversión completada! {}", summary);
        info!("Conversión por lotes terminada. {}", summary);
    });

    Ok(StatusCode::ACCEPTED)
}

// --- Chat ---

#[axum::debug_handler]
async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatPayload>,
) -> Result<Json<ChatSession>, ApiError> {
    if payload.content.trim().is_empty() {
        return Err(bad_request("El mensaje está vacío."));
    }
    chat::send(
        &state.storage,
        &state.ai,
        payload.session_id.as_deref(),
        &payload.content,
        state.credential(),
    )
    .await
    .map(Json)
    .map_err(|e| internal("Error al guardar la sesión de chat", e))
}

#[axum::debug_handler]
async fn list_sessions_handler(State(state): State<AppState>) -> Json<Vec<ChatSession>> {
    Json(chat::list_sessions(&state.storage))
}

#[axum::debug_handler]
async fn delete_session_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    match state.storage.delete::<ChatSession>(&id) {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err(not_found("Sesión")),
        Err(e) => Err(internal("Error al borrar la sesión", e)),
    }
}

// --- Herramientas de IA ---

#[axum::debug_handler]
async fn summary_handler(
    State(state): State<AppState>,
    Json(payload): Json<ContentPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let content = payload.require()?;
    let summary = state.ai.generate_summary(content, state.credential()).await;
    Ok(Json(json!({ "summary": summary })))
}

#[axum::debug_handler]
async fn tags_handler(
    State(state): State<AppState>,
    Json(payload): Json<ContentPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let content = payload.require()?;
    Ok(Json(json!({ "tags": state.ai.extract_tags(content) })))
}

#[axum::debug_handler]
async fn mind_map_handler(
    State(state): State<AppState>,
    Json(payload): Json<ContentPayload>,
) -> Result<Json<MindMap>, ApiError> {
    let content = payload.require()?;
    Ok(Json(state.ai.generate_mind_map(content, state.credential()).await))
}

#[axum::debug_handler]
async fn literature_handler(
    State(state): State<AppState>,
    Json(payload): Json<ContentPayload>,
) -> Result<Json<Vec<RankedLiterature>>, ApiError> {
    let content = payload.require()?;
    let ranked = state
        .ai
        .search_literature(content, state.credential())
        .await
        .into_iter()
        .map(|literature| RankedLiterature {
            relevance: literature.relevance_level(),
            literature,
        })
        .collect();
    Ok(Json(ranked))
}

// --- Voz ---

#[axum::debug_handler]
async fn speech_state_handler(State(state): State<AppState>) -> Json<SpeechState> {
    Json(state.speech.state())
}

#[axum::debug_handler]
async fn speech_start_handler(State(state): State<AppState>) -> Json<SpeechState> {
    state.speech.start();
    Json(state.speech.state())
}

#[axum::debug_handler]
async fn speech_stop_handler(State(state): State<AppState>) -> Json<SpeechState> {
    state.speech.stop();
    Json(state.speech.state())
}

#[axum::debug_handler]
async fn speech_toggle_handler(State(state): State<AppState>) -> Json<SpeechState> {
    state.speech.toggle();
    Json(state.speech.state())
}

#[axum::debug_handler]
async fn speech_clear_handler(State(state): State<AppState>) -> Json<SpeechState> {
    state.speech.clear();
    Json(state.speech.state())
}

// --- Exportar / Importar ---

fn require_path(payload: &PathPayload) -> Result<PathBuf, ApiError> {
    let path = payload.path.trim();
    if path.is_empty() {
        return Err(bad_request("Falta la ruta del fichero."));
    }
    Ok(PathBuf::from(path))
}

#[axum::debug_handler]
async fn export_handler(
    State(state): State<AppState>,
    Json(payload): Json<PathPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let path = require_path(&payload)?;
    state
        .storage
        .export_to_file(&path)
        .map_err(|e| internal("Error al exportar los datos", e))?;
    Ok((
        StatusCode::OK,
        Json(json!({ "message": format!("Datos exportados a {}", path.display()) })),
    ))
}

#[axum::debug_handler]
async fn import_handler(
    State(state): State<AppState>,
    Json(payload): Json<PathPayload>,
) -> Result<Json<ImportSummary>, ApiError> {
    let path = require_path(&payload)?;
    if !path.is_file() {
        return Err(bad_request("La ruta proporcionada no es un fichero válido."));
    }
    state
        .storage
        .import_from_file(&path)
        .map(Json)
        .map_err(|e| internal("Error al importar los datos", e))
}

// --- Estado y apagado ---

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(state.status.lock().unwrap().clone())
}

#[axum::debug_handler]
async fn shutdown_handler(
    State(state): State<AppState>,
) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    state.speech.destroy();
    if let Some(sender) = state.shutdown_sender.lock().unwrap().take() {
        let _ = sender.send(());
    }
    StatusCode::OK
}
