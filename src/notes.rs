//! Guardado de notas: validación, etiquetas automáticas y marcas de tiempo.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::fallback;
use crate::models::{new_id, truncate_chars, Note};
use crate::storage::StorageService;

const TITLE_FROM_CONTENT_CHARS: usize = 30;

/// Lo que envía el editor al guardar. Sin `id` se crea una nota nueva.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteDraft {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Construye la nota a guardar a partir del borrador y, si existe, la
/// versión previa. No toca el almacenamiento.
pub fn prepare_note(draft: NoteDraft, previous: Option<&Note>, now: DateTime<Utc>) -> Result<Note> {
    let title = draft.title.trim();
    let content = draft.content.trim();
    if title.is_empty() && content.is_empty() {
        return Err(anyhow!("La nota necesita un título o contenido"));
    }

    let title = if title.is_empty() {
        format!("{}...", truncate_chars(content, TITLE_FROM_CONTENT_CHARS))
    } else {
        title.to_string()
    };

    let mut tags: Vec<String> = Vec::new();
    for tag in draft
        .tags
        .into_iter()
        .map(|t| t.trim().to_string())
        .chain(fallback::extract_tags(content))
    {
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }

    let (id, created_at, updated_at) = match previous {
        Some(prev) => (prev.id.clone(), prev.created_at, now.max(prev.updated_at)),
        None => (draft.id.unwrap_or_else(new_id), now, now),
    };

    Ok(Note {
        id,
        title,
        content: content.to_string(),
        tags,
        created_at,
        updated_at,
    })
}

/// Valida y persiste la nota. La conversión a conocimiento la lanza el llamante.
pub fn save_note(storage: &StorageService, draft: NoteDraft) -> Result<Note> {
    let previous = draft.id.as_deref().and_then(|id| storage.get::<Note>(id));
    let note = prepare_note(draft, previous.as_ref(), Utc::now())?;
    storage.upsert(&note)?;
    Ok(note)
}

/// Notas ordenadas por `updated_at` descendente, opcionalmente filtradas.
pub fn list_notes(storage: &StorageService, query: Option<&str>) -> Vec<Note> {
    let mut notes: Vec<Note> = storage
        .notes()
        .into_iter()
        .filter(|n| query.map_or(true, |q| n.matches_query(q)))
        .collect();
    notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    notes
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn draft(title: &str, content: &str) -> NoteDraft {
        NoteDraft {
            title: title.into(),
            content: content.into(),
            ..NoteDraft::default()
        }
    }

    #[test]
    fn rejects_blank_note() {
        assert_err!(prepare_note(draft("  ", "\n"), None, Utc::now()));
    }

    #[test]
    fn title_falls_back_to_content_prefix() {
        let content = "Apuntes sobre el modelo de memoria de Rust y los préstamos";
        let note = prepare_note(draft("", content), None, Utc::now()).unwrap();
        assert_eq!(note.title, format!("{}...", truncate_chars(content, 30)));
    }

    #[test]
    fn merges_user_and_extracted_tags_without_duplicates() {
        let mut d = draft("t", "tokio tokio axum");
        d.tags = vec!["tokio".into(), "backend".into()];
        let note = prepare_note(d, None, Utc::now()).unwrap();
        assert_eq!(note.tags, vec!["tokio", "backend", "axum"]);
    }

    #[test]
    fn resave_keeps_id_and_created_at() {
        let now = Utc::now();
        let first = prepare_note(draft("t", "c"), None, now).unwrap();

        let mut again = draft("t2", "c2");
        again.id = Some(first.id.clone());
        // reloj que va hacia atrás: updated_at no debe retroceder
        let second = prepare_note(again, Some(&first), now - Duration::seconds(30)).unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.updated_at, first.updated_at);
    }

    #[test]
    fn save_twice_does_not_duplicate() {
        let storage = StorageService::in_memory();
        let note = assert_ok!(save_note(&storage, draft("t", "contenido")));

        let mut again = draft("t", "contenido editado");
        again.id = Some(note.id.clone());
        assert_ok!(save_note(&storage, again));

        let notes = storage.notes();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].content, "contenido editado");
    }

    #[test]
    fn list_is_sorted_and_filtered() {
        let storage = StorageService::in_memory();
        let base = Utc::now();
        for (i, title) in ["alfa", "beta", "alfa beta"].iter().enumerate() {
            let note = prepare_note(draft(title, "x"), None, base + Duration::seconds(i as i64)).unwrap();
            storage.upsert(&note).unwrap();
        }

        let all = list_notes(&storage, None);
        assert_eq!(all[0].title, "alfa beta");

        let filtered = list_notes(&storage, Some("ALFA"));
        assert_eq!(filtered.len(), 2);
    }
}
