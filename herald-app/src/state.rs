//! Shared application state, injected into every route handler.

use std::sync::Arc;

use herald_core::{
    ActivityEvent, EventBus, ListenEngine, NarrationEvent, ResponseEvent, SpeechEngine,
    Summarizer, TranscriptWatcher,
};

/// Everything the HTTP surface needs: the three buses for SSE fan-out
/// and the engine handles for health, manual replies and diagnostics.
#[derive(Clone)]
pub struct AppState {
    pub activity_bus: EventBus<ActivityEvent>,
    pub narration_bus: EventBus<NarrationEvent>,
    pub response_bus: EventBus<ResponseEvent>,
    pub watcher: Arc<TranscriptWatcher>,
    pub summarizer: Arc<Summarizer>,
    pub speech: Arc<SpeechEngine>,
    pub listen: Arc<ListenEngine>,
}
