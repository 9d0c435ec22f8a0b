//! Servicio de reconocimiento de voz.
//!
//! Envuelve el motor de reconocimiento continuo de la plataforma (inyectado
//! como `SpeechEngine`) y publica su estado a los suscriptores. El motor
//! informa de sus eventos a través de un `EngineEvents`; cada evento muta el
//! estado y notifica de forma síncrona a todos los suscriptores con una copia.

use std::sync::{Arc, Mutex, Weak};

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, warn};

pub const RECOGNITION_LANG: &str = "es-ES";

pub const UNSUPPORTED_MESSAGE: &str = "Este entorno no soporta reconocimiento de voz";
pub const UNAVAILABLE_MESSAGE: &str = "Reconocimiento de voz no disponible";
pub const START_FAILED_MESSAGE: &str = "No se pudo iniciar el reconocimiento de voz";

/// Copia inmutable del estado que reciben los suscriptores.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechState {
    pub is_listening: bool,
    pub is_supported: bool,
    pub transcript: String,
    pub interim_transcript: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Ajustes con los que se configura el motor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub lang: &'static str,
    pub continuous: bool,
    pub interim_results: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            lang: RECOGNITION_LANG,
            continuous: true,
            interim_results: true,
        }
    }
}

/// Primitiva de reconocimiento continuo de la plataforma.
pub trait SpeechEngine: Send {
    fn configure(&mut self, settings: &EngineSettings, events: EngineEvents);
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self);
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    pub transcript: String,
    pub confidence: f32,
    pub is_final: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Start,
    /// Resultados acumulados de la sesión; sólo cuentan desde `result_index`.
    Result {
        result_index: usize,
        results: Vec<RecognitionResult>,
    },
    Error(String),
    End,
}

/// Traduce un código de error del motor a un mensaje para el usuario.
pub fn error_message(code: &str) -> String {
    match code {
        "no-speech" => "No se detectó entrada de voz".to_string(),
        "audio-capture" => "No se pudo acceder al micrófono".to_string(),
        "not-allowed" => "Acceso al micrófono denegado".to_string(),
        "network" => "Error de conexión de red".to_string(),
        "aborted" => "Reconocimiento de voz interrumpido".to_string(),
        "language-not-supported" => "Idioma no soportado".to_string(),
        other => format!("Error de reconocimiento de voz: {other}"),
    }
}

/// Por qué no se pudo usar el motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineAccess {
    /// Otra llamada lo tiene tomado en este momento.
    Busy,
    /// No hay motor (entorno sin soporte o servicio destruido).
    Gone,
}

type Listener = Arc<dyn Fn(&SpeechState) + Send + Sync>;

struct Inner {
    engine: Option<Box<dyn SpeechEngine>>,
    state: SpeechState,
    listeners: Vec<(u64, Listener)>,
    next_listener_id: u64,
    destroyed: bool,
}

/// Canal por el que el motor entrega sus eventos al servicio.
#[derive(Clone)]
pub struct EngineEvents {
    inner: Weak<Mutex<Inner>>,
}

impl EngineEvents {
    pub fn emit(&self, event: EngineEvent) {
        match self.inner.upgrade() {
            Some(inner) => SpeechRecognitionService::apply(&inner, event),
            None => debug!("Evento de voz tras destruir el servicio: {:?}", event),
        }
    }
}

/// Devuelto por `subscribe`; `unsubscribe` retira al suscriptor.
pub struct Subscription {
    id: u64,
    inner: Weak<Mutex<Inner>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.lock().unwrap().listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Se construye una vez al arrancar y se comparte por referencia.
pub struct SpeechRecognitionService {
    inner: Arc<Mutex<Inner>>,
}

impl SpeechRecognitionService {
    /// Sin motor, el servicio queda permanentemente como no soportado.
    pub fn new(engine: Option<Box<dyn SpeechEngine>>) -> Self {
        let is_supported = engine.is_some();
        let inner = Arc::new(Mutex::new(Inner {
            engine: None,
            state: SpeechState {
                is_supported,
                error: (!is_supported).then(|| UNSUPPORTED_MESSAGE.to_string()),
                ..SpeechState::default()
            },
            listeners: Vec::new(),
            next_listener_id: 0,
            destroyed: false,
        }));

        if let Some(mut engine) = engine {
            engine.configure(
                &EngineSettings::default(),
                EngineEvents {
                    inner: Arc::downgrade(&inner),
                },
            );
            inner.lock().unwrap().engine = Some(engine);
        }

        Self { inner }
    }

    fn apply(inner: &Arc<Mutex<Inner>>, event: EngineEvent) {
        {
            let mut guard = inner.lock().unwrap();
            let state = &mut guard.state;
            match event {
                EngineEvent::Start => {
                    state.is_listening = true;
                    state.error = None;
                }
                EngineEvent::Result {
                    result_index,
                    results,
                } => {
                    let mut final_text = String::new();
                    let mut interim_text = String::new();
                    for result in results.iter().skip(result_index) {
                        if result.is_final {
                            final_text.push_str(&result.transcript);
                        } else {
                            interim_text.push_str(&result.transcript);
                        }
                    }
                    state.transcript.push_str(&final_text);
                    state.interim_transcript = interim_text;
                }
                EngineEvent::Error(code) => {
                    warn!("Error del motor de voz: {code}");
                    state.is_listening = false;
                    state.error = Some(error_message(&code));
                }
                EngineEvent::End => {
                    state.is_listening = false;
                }
            }
        }
        Self::notify(inner);
    }

    /// Notifica fuera del cerrojo para que un suscriptor pueda volver a
    /// llamar al servicio.
    fn notify(inner: &Arc<Mutex<Inner>>) {
        let (snapshot, listeners): (SpeechState, Vec<Listener>) = {
            let guard = inner.lock().unwrap();
            (
                guard.state.clone(),
                guard.listeners.iter().map(|(_, l)| l.clone()).collect(),
            )
        };
        for listener in listeners {
            listener(&snapshot);
        }
    }

    /// Ejecuta `f` sobre el motor sin mantener el cerrojo, para que el motor
    /// pueda emitir eventos de forma síncrona. Mientras dura la llamada el
    /// motor está fuera de `Inner` y otra llamada lo ve como ocupado.
    fn with_engine<R>(
        &self,
        f: impl FnOnce(&mut dyn SpeechEngine) -> R,
    ) -> Result<R, EngineAccess> {
        let mut engine = {
            let mut guard = self.inner.lock().unwrap();
            match guard.engine.take() {
                Some(engine) => engine,
                None if guard.destroyed || !guard.state.is_supported => {
                    return Err(EngineAccess::Gone)
                }
                None => return Err(EngineAccess::Busy),
            }
        };
        let result = f(engine.as_mut());
        let mut guard = self.inner.lock().unwrap();
        if guard.engine.is_none() && !guard.destroyed {
            guard.engine = Some(engine);
        }
        Ok(result)
    }

    pub fn start(&self) {
        let message = match self.with_engine(|engine| engine.start()) {
            // el motor confirmará con EngineEvent::Start
            Ok(Ok(())) => return,
            Ok(Err(e)) => {
                warn!("Fallo al iniciar el motor de voz: {e:#}");
                START_FAILED_MESSAGE
            }
            Err(EngineAccess::Busy) => {
                debug!("Motor de voz ocupado, se ignora la petición de inicio");
                return;
            }
            Err(EngineAccess::Gone) => UNAVAILABLE_MESSAGE,
        };
        self.inner.lock().unwrap().state.error = Some(message.to_string());
        Self::notify(&self.inner);
    }

    pub fn stop(&self) {
        if self.inner.lock().unwrap().state.is_listening {
            if let Err(EngineAccess::Busy) = self.with_engine(|engine| engine.stop()) {
                debug!("Motor de voz ocupado, se ignora la petición de parada");
            }
        }
    }

    pub fn toggle(&self) {
        if self.inner.lock().unwrap().state.is_listening {
            self.stop();
        } else {
            self.start();
        }
    }

    pub fn clear(&self) {
        {
            let mut guard = self.inner.lock().unwrap();
            guard.state.transcript.clear();
            guard.state.interim_transcript.clear();
        }
        Self::notify(&self.inner);
    }

    /// El suscriptor recibe inmediatamente el estado actual.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SpeechState) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        let (id, snapshot) = {
            let mut guard = self.inner.lock().unwrap();
            let id = guard.next_listener_id;
            guard.next_listener_id += 1;
            guard.listeners.push((id, listener.clone()));
            (id, guard.state.clone())
        };
        listener(&snapshot);
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn state(&self) -> SpeechState {
        self.inner.lock().unwrap().state.clone()
    }

    /// Texto final más el provisional, separados por un espacio.
    pub fn transcript(&self) -> String {
        let guard = self.inner.lock().unwrap();
        if guard.state.interim_transcript.is_empty() {
            guard.state.transcript.clone()
        } else {
            format!("{} {}", guard.state.transcript, guard.state.interim_transcript)
        }
    }

    pub fn full_transcript(&self) -> String {
        self.inner.lock().unwrap().state.transcript.clone()
    }

    /// Detiene y suelta el motor y retira a todos los suscriptores.
    pub fn destroy(&self) {
        let (engine, is_listening) = {
            let mut guard = self.inner.lock().unwrap();
            guard.destroyed = true;
            guard.listeners.clear();
            (guard.engine.take(), guard.state.is_listening)
        };
        if let Some(mut engine) = engine {
            if is_listening {
                engine.stop();
            }
        }
    }
}
