//! Conversión de notas en entradas de la base de conocimiento.
//!
//! Cada nota elegible tiene como mucho un `KnowledgeItem` (búsqueda por
//! `source_note_id`); volver a guardar la nota lo actualiza en su sitio.
//! Borrar la nota no borra el ítem derivado.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::ai::AiService;
use crate::app_state::Status;
use crate::models::{new_id, ConversionStats, KnowledgeItem, Note};
use crate::storage::StorageService;

pub const MIN_CONTENT_CHARS: usize = 100;

/// Resumen de una conversión por lotes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub pending: usize,
    pub converted: usize,
    pub failed: usize,
}

impl std::fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Resumen: {} notas pendientes, {} convertidas, {} con error.",
            self.pending, self.converted, self.failed
        )
    }
}

/// Estado de la nota de origen de un ítem, tal como se muestra en el detalle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum SourceNote {
    Available { id: String, title: String },
    /// La nota se borró; el ítem se conserva.
    Deleted { id: String },
}

/// `None` si el ítem no procede de una nota.
pub fn source_note(storage: &StorageService, item: &KnowledgeItem) -> Option<SourceNote> {
    let note_id = item.source_note_id.as_deref()?;
    Some(match storage.get::<Note>(note_id) {
        Some(note) => SourceNote::Available {
            id: note.id,
            title: note.title,
        },
        None => SourceNote::Deleted {
            id: note_id.to_string(),
        },
    })
}

/// `true` si el contenido (recortado) tiene al menos 100 caracteres y el
/// título (recortado) no está vacío.
pub fn should_convert(note: &Note) -> bool {
    note.content.trim().chars().count() >= MIN_CONTENT_CHARS && !note.title.trim().is_empty()
}

#[derive(Clone)]
pub struct KnowledgeConverter {
    storage: StorageService,
    ai: AiService,
    throttle: Duration,
}

impl KnowledgeConverter {
    pub fn new(storage: StorageService, ai: AiService, throttle: Duration) -> Self {
        Self {
            storage,
            ai,
            throttle,
        }
    }

    /// Construye un ítem nuevo (sin persistirlo) para la nota.
    pub async fn convert_note(&self, note: &Note, credential: Option<&str>) -> KnowledgeItem {
        let summary = self.ai.generate_summary(&note.content, credential).await;
        let now = Utc::now();
        KnowledgeItem {
            id: new_id(),
            title: note.title.clone(),
            content: note.content.clone(),
            summary,
            tags: note.tags.clone(),
            source_note_id: Some(note.id.clone()),
            created_at: now,
            updated_at: now,
        }
    }

    /// Crea o actualiza el ítem derivado de `note`. Devuelve `None` si la nota
    /// no es elegible.
    ///
    /// El resumen se regenera en cada llamada. Dos conversiones simultáneas de
    /// la misma nota no se coordinan: gana la última escritura.
    pub async fn auto_convert(
        &self,
        note: &Note,
        credential: Option<&str>,
    ) -> Result<Option<KnowledgeItem>> {
        if !should_convert(note) {
            return Ok(None);
        }

        let existing = self
            .storage
            .knowledge_items()
            .into_iter()
            .find(|item| item.source_note_id.as_deref() == Some(note.id.as_str()));

        let item = match existing {
            Some(existing) => {
                let summary = self.ai.generate_summary(&note.content, credential).await;
                KnowledgeItem {
                    title: note.title.clone(),
                    content: note.content.clone(),
                    summary,
                    tags: note.tags.clone(),
                    updated_at: Utc::now().max(existing.updated_at),
                    ..existing
                }
            }
            None => self.convert_note(note, credential).await,
        };

        self.storage.upsert(&item)?;
        info!("Nota '{}' convertida en el ítem de conocimiento {}", note.id, item.id);
        Ok(Some(item))
    }

    /// Lanza `auto_convert` en segundo plano tras guardar una nota. Devuelve
    /// `None` (sin lanzar nada) si la nota no es elegible.
    pub fn spawn_auto_convert(&self, note: Note, credential: Option<String>) -> Option<JoinHandle<()>> {
        if !should_convert(&note) {
            return None;
        }
        let converter = self.clone();
        Some(tokio::spawn(async move {
            if let Err(err) = converter.auto_convert(&note, credential.as_deref()).await {
                error!("Error convirtiendo la nota {} en conocimiento: {err:#}", note.id);
            }
        }))
    }

    /// Convierte todas las notas elegibles que aún no tienen ítem, con una
    /// pausa fija entre notas. El progreso se publica en `status`.
    pub async fn batch_convert(
        &self,
        credential: Option<&str>,
        status_arc: Arc<Mutex<Status>>,
    ) -> BatchSummary {
        let converted_ids: HashSet<String> = self
            .storage
            .knowledge_items()
            .into_iter()
            .filter_map(|item| item.source_note_id)
            .collect();

        let pending: Vec<Note> = self
            .storage
            .notes()
            .into_iter()
            .filter(|note| !converted_ids.contains(&note.id) && should_convert(note))
            .collect();

        let mut summary = BatchSummary {
            pending: pending.len(),
            ..BatchSummary::default()
        };
        let total = pending.len() as f32;

        for (index, note) in pending.iter().enumerate() {
            {
                let mut status = status_arc.lock().unwrap();
                status.message = format!(
                    "[{}/{}] Convirtiendo: {}...",
                    index + 1,
                    total as u32,
                    note.title
                );
                status.progress = (index + 1) as f32 / total;
            }

            match self.auto_convert(note, credential).await {
                Ok(_) => summary.converted += 1,
                Err(err) => {
                    summary.failed += 1;
                    error!("Error convirtiendo la nota {}: {err:#}", note.id);
                }
            }

            tokio::time::sleep(self.throttle).await;
        }

        summary
    }

    pub fn conversion_stats(&self) -> ConversionStats {
        let eligible = self
            .storage
            .notes()
            .iter()
            .filter(|note| should_convert(note))
            .count();
        let converted = self
            .storage
            .knowledge_items()
            .iter()
            .filter(|item| item.source_note_id.is_some())
            .count();

        ConversionStats {
            total_notes: eligible,
            converted_notes: converted,
            conversion_rate: if eligible > 0 {
                converted as f64 / eligible as f64
            } else {
                0.0
            },
        }
    }
}
