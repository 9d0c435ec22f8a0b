//! Modelos de dominio (notas, base de conocimiento, chat, mapas mentales y literatura).
//!
//! Todos los modelos se serializan en camelCase para que el JSON persistido
//! coincida con el esquema que consume el frontend.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Corta un texto a `max` caracteres (no bytes).
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn contains_ci(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    /// Búsqueda por subcadena sin distinguir mayúsculas sobre título y contenido.
    pub fn matches_query(&self, query: &str) -> bool {
        let q = query.to_lowercase();
        contains_ci(&self.title, &q) || contains_ci(&self.content, &q)
    }
}

/// Entrada de la base de conocimiento derivada de una nota.
///
/// `source_note_id` es una referencia débil: la nota de origen puede haberse
/// borrado y el ítem sigue existiendo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeItem {
    pub id: String,
    pub title: String,
    pub content: String,
    pub summary: String,
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_note_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeItem {
    pub fn matches_query(&self, query: &str) -> bool {
        let q = query.to_lowercase();
        contains_ci(&self.title, &q) || contains_ci(&self.content, &q) || contains_ci(&self.summary, &q)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MindMapNode {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<MindMapNode>>,
}

impl MindMapNode {
    /// Número total de nodos del subárbol (incluido este).
    pub fn node_count(&self) -> usize {
        1 + self
            .children
            .iter()
            .flatten()
            .map(MindMapNode::node_count)
            .sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MindMap {
    pub id: String,
    pub title: String,
    pub root: MindMapNode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_note_id: Option<String>,
}

/// Forma que se le pide al modelo para un mapa mental (sin ids).
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MindMapDraft {
    #[serde(default)]
    pub title: Option<String>,
    pub root: MindMapDraftNode,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MindMapDraftNode {
    pub name: String,
    #[serde(default)]
    pub children: Option<Vec<MindMapDraftNode>>,
}

impl MindMapDraftNode {
    /// Asigna ids nuevos a todo el árbol.
    pub fn into_node(self) -> MindMapNode {
        MindMapNode {
            id: new_id(),
            name: self.name,
            children: self
                .children
                .map(|children| children.into_iter().map(MindMapDraftNode::into_node).collect()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Literature {
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_date: Option<String>,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub tags: Vec<String>,
    /// Siempre dentro de [0, 1].
    pub relevance_score: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_note_id: Option<String>,
}

impl Literature {
    pub fn relevance_level(&self) -> RelevanceLevel {
        RelevanceLevel::from_score(self.relevance_score)
    }
}

/// Registro de literatura tal como lo devuelve el modelo.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LiteratureDraft {
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default, rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub publication_date: Option<String>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub relevance_score: Option<f64>,
}

impl LiteratureDraft {
    pub fn into_literature(self, now: DateTime<Utc>) -> Literature {
        let score = self.relevance_score.unwrap_or(0.5);
        let score = if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.5 };
        Literature {
            id: new_id(),
            title: self.title,
            authors: self.authors,
            abstract_text: self.abstract_text,
            publication_date: self.publication_date,
            source: self.source,
            url: self.url,
            tags: self.tags,
            relevance_score: score,
            created_at: now,
            updated_at: now,
            source_note_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelevanceLevel {
    High,
    Medium,
    General,
}

impl RelevanceLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Self::High
        } else if score >= 0.6 {
            Self::Medium
        } else {
            Self::General
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionStats {
    pub total_notes: usize,
    pub converted_notes: usize,
    pub conversion_rate: f64,
}

/// Documento completo de exportación/importación.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub knowledge_items: Vec<KnowledgeItem>,
    #[serde(default)]
    pub chat_sessions: Vec<ChatSession>,
}
