//! Persistencia clave-valor de las colecciones (notas, conocimiento, chats).
//!
//! Cada colección se guarda como un único array JSON bajo una clave fija.
//! Leer siempre devuelve una colección: un valor corrupto o ausente se trata
//! como colección vacía. Escribir reescribe la colección completa.

#[cfg(test)]
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{ChatSession, ExportDocument, KnowledgeItem, Note};

pub const EXPORT_VERSION: u32 = 1;

/// Almacén duradero indexado por cadenas.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Almacén en memoria, sustituto del almacén duradero en los tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Un fichero `<clave>.json` por colección dentro de un directorio.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("No se pudo crear el directorio de datos {}", dir.display()))?;
        info!("Almacén de datos en {}", dir.display());
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("Error leyendo {}", path.display()))?;
        Ok(Some(data))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        // Escritura vía fichero temporal propio de cada escritura, para no
        // dejar un JSON a medias.
        let tmp = path.with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
        fs::write(&tmp, value).with_context(|| format!("Error escribiendo {}", tmp.display()))?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e).with_context(|| format!("Error reemplazando {}", path.display()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Notes,
    Knowledge,
    ChatSessions,
}

/// Mapeo colección → clave del almacén.
#[derive(Debug, Clone)]
pub struct CollectionKeys {
    pub notes: String,
    pub knowledge: String,
    pub chat_sessions: String,
}

impl Default for CollectionKeys {
    fn default() -> Self {
        Self {
            notes: "ainote_notes".to_string(),
            knowledge: "ainote_knowledge".to_string(),
            chat_sessions: "ainote_chat_sessions".to_string(),
        }
    }
}

impl CollectionKeys {
    pub fn key(&self, collection: Collection) -> &str {
        match collection {
            Collection::Notes => &self.notes,
            Collection::Knowledge => &self.knowledge,
            Collection::ChatSessions => &self.chat_sessions,
        }
    }
}

/// Registro persistible en una colección.
pub trait Record: Serialize + DeserializeOwned {
    const COLLECTION: Collection;
    fn id(&self) -> &str;
}

impl Record for Note {
    const COLLECTION: Collection = Collection::Notes;
    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for KnowledgeItem {
    const COLLECTION: Collection = Collection::Knowledge;
    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for ChatSession {
    const COLLECTION: Collection = Collection::ChatSessions;
    fn id(&self) -> &str {
        &self.id
    }
}

/// Resultado de una importación.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub notes: usize,
    pub knowledge_items: usize,
    pub chat_sessions: usize,
}

impl std::fmt::Display for ImportSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} notas, {} ítems de conocimiento y {} sesiones de chat importadas",
            self.notes, self.knowledge_items, self.chat_sessions
        )
    }
}

/// Los clones comparten el almacén y el cerrojo de escritura: cada
/// lectura-modificación-escritura de una colección es atómica respecto a las
/// demás del mismo proceso.
#[derive(Clone)]
pub struct StorageService {
    store: Arc<dyn KeyValueStore>,
    keys: CollectionKeys,
    write_lock: Arc<Mutex<()>>,
}

impl StorageService {
    pub fn new(store: Arc<dyn KeyValueStore>, keys: CollectionKeys) -> Self {
        Self {
            store,
            keys,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), CollectionKeys::default())
    }

    /// Lee toda la colección. Nunca falla: los errores se registran y se
    /// devuelve una colección vacía.
    pub fn get_all<T: Record>(&self) -> Vec<T> {
        let key = self.keys.key(T::COLLECTION);
        let raw = match self.store.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("No se pudo leer la colección '{key}': {e:#}");
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<T>>(&raw) {
            Ok(records) => records,
            Err(e) => {
                warn!("Colección '{key}' corrupta, se trata como vacía: {e}");
                Vec::new()
            }
        }
    }

    pub fn get<T: Record>(&self, id: &str) -> Option<T> {
        self.get_all::<T>().into_iter().find(|r| r.id() == id)
    }

    /// Reemplaza por id si existe; si no, lo añade al final.
    pub fn upsert<T: Record>(&self, record: &T) -> Result<()>
    where
        T: Clone,
    {
        let _guard = self.write_lock.lock().unwrap();
        let mut records = self.get_all::<T>();
        match records.iter().position(|r| r.id() == record.id()) {
            Some(index) => records[index] = record.clone(),
            None => records.push(record.clone()),
        }
        self.write_all(&records)
    }

    /// Devuelve `true` si había un registro con ese id.
    pub fn delete<T: Record>(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().unwrap();
        let mut records = self.get_all::<T>();
        let before = records.len();
        records.retain(|r| r.id() != id);
        if records.len() == before {
            return Ok(false);
        }
        self.write_all(&records)?;
        Ok(true)
    }

    fn write_all<T: Record>(&self, records: &[T]) -> Result<()> {
        let key = self.keys.key(T::COLLECTION);
        let json = serde_json::to_string(records)
            .with_context(|| format!("Error serializando la colección '{key}'"))?;
        self.store.set(key, &json)
    }

    pub fn notes(&self) -> Vec<Note> {
        self.get_all()
    }

    pub fn knowledge_items(&self) -> Vec<KnowledgeItem> {
        self.get_all()
    }

    pub fn chat_sessions(&self) -> Vec<ChatSession> {
        self.get_all()
    }

    // ---------------------------------------------------------------------
    // EXPORTAR / IMPORTAR
    // ---------------------------------------------------------------------

    pub fn export_document(&self) -> ExportDocument {
        ExportDocument {
            version: EXPORT_VERSION,
            exported_at: Utc::now(),
            notes: self.notes(),
            knowledge_items: self.knowledge_items(),
            chat_sessions: self.chat_sessions(),
        }
    }

    /// Fusiona un documento exportado: cada registro se inserta o reemplaza por id.
    pub fn import_document(&self, doc: ExportDocument) -> Result<ImportSummary> {
        let summary = ImportSummary {
            notes: doc.notes.len(),
            knowledge_items: doc.knowledge_items.len(),
            chat_sessions: doc.chat_sessions.len(),
        };
        self.merge_all(doc.notes)?;
        self.merge_all(doc.knowledge_items)?;
        self.merge_all(doc.chat_sessions)?;
        Ok(summary)
    }

    fn merge_all<T: Record>(&self, incoming: Vec<T>) -> Result<()> {
        if incoming.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().unwrap();
        let mut records = self.get_all::<T>();
        for record in incoming {
            match records.iter().position(|r| r.id() == record.id()) {
                Some(index) => records[index] = record,
                None => records.push(record),
            }
        }
        self.write_all(&records)
    }

    pub fn export_to_file(&self, path: &Path) -> Result<()> {
        let doc = self.export_document();
        let json = serde_json::to_string_pretty(&doc)?;
        fs::write(path, json)
            .with_context(|| format!("No se pudo escribir la exportación en {}", path.display()))?;
        info!(
            "Exportados {} notas, {} ítems y {} sesiones a {}",
            doc.notes.len(),
            doc.knowledge_items.len(),
            doc.chat_sessions.len(),
            path.display()
        );
        Ok(())
    }

    pub fn import_from_file(&self, path: &Path) -> Result<ImportSummary> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("No se pudo leer {}", path.display()))?;
        let doc: ExportDocument = serde_json::from_str(&raw)
            .with_context(|| format!("{} no es un documento de exportación válido", path.display()))?;
        let summary = self.import_document(doc)?;
        info!("Importación desde {}: {}", path.display(), summary);
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn note(id: &str, title: &str) -> Note {
        let created = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
        Note {
            id: id.to_string(),
            title: title.to_string(),
            content: format!("contenido de {title}"),
            tags: vec!["rust".into(), "notas".into()],
            created_at: created,
            updated_at: created + Duration::minutes(5),
        }
    }

    #[test]
    fn round_trip_preserves_notes_and_dates() {
        let storage = StorageService::in_memory();
        let saved: Vec<Note> = (0..4).map(|i| note(&format!("n{i}"), &format!("t{i}"))).collect();
        for n in &saved {
            storage.upsert(n).unwrap();
        }

        let loaded = storage.notes();
        assert_eq!(loaded, saved);
    }

    #[test]
    fn upsert_replaces_by_id() {
        let storage = StorageService::in_memory();
        storage.upsert(&note("n1", "primero")).unwrap();
        storage.upsert(&note("n1", "segundo")).unwrap();

        let notes = storage.notes();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].title, "segundo");
    }

    #[test]
    fn delete_reports_presence() {
        let storage = StorageService::in_memory();
        storage.upsert(&note("n1", "a")).unwrap();
        assert!(storage.delete::<Note>("n1").unwrap());
        assert!(!storage.delete::<Note>("n1").unwrap());
        assert!(storage.notes().is_empty());
    }

    #[test]
    fn corrupt_collection_reads_as_empty() {
        let store = Arc::new(MemoryStore::new());
        store.set("ainote_notes", "{not json").unwrap();
        let storage = StorageService::new(store, CollectionKeys::default());
        assert!(storage.notes().is_empty());

        // y se puede volver a escribir encima
        storage.upsert(&note("n1", "a")).unwrap();
        assert_eq!(storage.notes().len(), 1);
    }

    #[test]
    fn collections_use_injected_keys() {
        let store = Arc::new(MemoryStore::new());
        let keys = CollectionKeys {
            notes: "test_notes".into(),
            ..CollectionKeys::default()
        };
        let storage = StorageService::new(store.clone(), keys);
        storage.upsert(&note("n1", "a")).unwrap();

        assert!(store.get("test_notes").unwrap().is_some());
        assert!(store.get("ainote_notes").unwrap().is_none());
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = StorageService::new(
                Arc::new(FileStore::open(dir.path()).unwrap()),
                CollectionKeys::default(),
            );
            storage.upsert(&note("n1", "persistente")).unwrap();
        }
        let storage = StorageService::new(
            Arc::new(FileStore::open(dir.path()).unwrap()),
            CollectionKeys::default(),
        );
        assert_eq!(storage.notes()[0].title, "persistente");
    }

    #[test]
    fn concurrent_upserts_keep_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageService::new(
            Arc::new(FileStore::open(dir.path()).unwrap()),
            CollectionKeys::default(),
        );

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let storage = storage.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        storage.upsert(&note(&format!("n{t}-{i}"), "concurrente")).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(storage.notes().len(), 200);
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn export_then_import_merges_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.json");

        let source = StorageService::in_memory();
        source.upsert(&note("n1", "exportada")).unwrap();
        source.upsert(&note("n2", "otra")).unwrap();
        source.export_to_file(&path).unwrap();

        let target = StorageService::in_memory();
        target.upsert(&note("n1", "local")).unwrap();
        target.upsert(&note("n3", "solo local")).unwrap();

        let summary = target.import_from_file(&path).unwrap();
        assert_eq!(summary.notes, 2);

        let notes = target.notes();
        assert_eq!(notes.len(), 3);
        assert_eq!(target.get::<Note>("n1").unwrap().title, "exportada");
    }

    #[test]
    fn import_rejects_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "[1,2,3]").unwrap();
        assert!(StorageService::in_memory().import_from_file(&path).is_err());
    }
}
