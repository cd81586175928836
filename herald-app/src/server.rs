//! HTTP routes for the Herald sidecar.
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `POST /event` | Hook payload intake from the assistant's hook scripts |
//! | `POST /respond` | Manual text reply — bypass voice capture |
//! | `GET /health` | Stage-availability snapshot |
//! | `GET /events` | Activity events as Server-Sent Events |
//! | `GET /narrations` | Narrations as Server-Sent Events |
//! | `GET /responses` | Matched replies as Server-Sent Events |
//! | `GET /test-tts` | Diagnostic synthesis + playback check |
//!
//! SSE messages carry `event:` = the event's type value and `data:` = the
//! serialized JSON object; idle streams get a ping comment every 15 s.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::Stream;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use herald_core::parse_hook_event;

use crate::state::AppState;

/// Interval between SSE keep-alive pings.
const SSE_PING_INTERVAL: Duration = Duration::from_secs(15);

/// Build the full router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/event", post(receive_event))
        .route("/respond", post(manual_respond))
        .route("/health", get(health))
        .route("/events", get(activity_stream))
        .route("/narrations", get(narration_stream))
        .route("/responses", get(response_stream))
        .route("/test-tts", get(test_tts))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// POST /event
// ---------------------------------------------------------------------------

/// Receive a hook payload and emit it on the activity bus.
///
/// The body is parsed as raw JSON (the payload shape varies by hook); an
/// unrecognised discriminator is acknowledged as ignored rather than an
/// error so hook scripts never fail the assistant.
async fn receive_event(State(state): State<AppState>, body: String) -> Json<serde_json::Value> {
    let raw: serde_json::Value = match serde_json::from_str(&body) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("failed to decode hook payload: {e}");
            return Json(json!({"status": "error", "reason": "invalid json"}));
        }
    };

    let hook_event_name = raw
        .get("hook_event_name")
        .and_then(|v| v.as_str())
        .unwrap_or("<unknown>");
    info!(
        hook_event_name,
        session_id = raw.get("session_id").and_then(|v| v.as_str()).unwrap_or("?"),
        "received hook event"
    );

    match parse_hook_event(&raw) {
        Some(event) => {
            let event_type = event.kind().as_str();
            state.activity_bus.emit(event);
            Json(json!({"status": "ok", "event_type": event_type}))
        }
        None => Json(json!({"status": "ignored", "reason": "unrecognized event"})),
    }
}

// ---------------------------------------------------------------------------
// POST /respond
// ---------------------------------------------------------------------------

/// Manual text reply: `{"session_id": "...", "text": "..."}`.
async fn manual_respond(State(state): State<AppState>, body: String) -> Json<serde_json::Value> {
    let raw: serde_json::Value = match serde_json::from_str(&body) {
        Ok(raw) => raw,
        Err(_) => return Json(json!({"status": "error", "reason": "invalid json"})),
    };

    let session_id = raw.get("session_id").and_then(|v| v.as_str()).unwrap_or("");
    let text = raw.get("text").and_then(|v| v.as_str()).unwrap_or("");
    if session_id.is_empty() || text.is_empty() {
        return Json(json!({
            "status": "error",
            "reason": "session_id and text are required",
        }));
    }

    let success = state.listen.handle_manual_response(session_id, text).await;
    let status = if success { "ok" } else { "dispatch_failed" };
    Json(json!({
        "status": status,
        "text": text,
        "session_id": session_id,
    }))
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
    subscribers: usize,
    narration_subscribers: usize,
    transcript_watcher_running: bool,
    llm_available: bool,
    tts_state: herald_core::SynthState,
    tts_available: bool,
    tts_provider: &'static str,
    audio_available: bool,
    remote_sink_connected: bool,
    alert_active: bool,
    stt_state: herald_core::ListenState,
    stt_available: bool,
    mic_available: bool,
    dispatch_available: bool,
    stt_listening: bool,
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        subscribers: state.activity_bus.subscriber_count(),
        narration_subscribers: state.narration_bus.subscriber_count(),
        transcript_watcher_running: state.watcher.is_running(),
        llm_available: state.summarizer.llm_available(),
        tts_state: state.speech.state(),
        tts_available: state.speech.tts_available(),
        tts_provider: state.speech.provider_name(),
        audio_available: state.speech.audio_available(),
        remote_sink_connected: state.speech.remote_connected(),
        alert_active: state.speech.alert_active(),
        stt_state: state.listen.state(),
        stt_available: state.listen.stt_available(),
        mic_available: state.listen.mic_available(),
        dispatch_available: state.listen.dispatch_available(),
        stt_listening: state.listen.is_listening(),
    })
}

// ---------------------------------------------------------------------------
// SSE streams
// ---------------------------------------------------------------------------

fn sse_response(
    stream: impl Stream<Item = Result<Event, Infallible>> + Send + 'static,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static> {
    Sse::new(stream).keep_alive(KeepAlive::new().interval(SSE_PING_INTERVAL).text("ping"))
}

/// Stream every activity event. The subscription drops (and unregisters)
/// when the client disconnects.
async fn activity_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.activity_bus.subscribe();
    sse_response(futures_util::stream::unfold(
        subscription,
        |mut subscription| async move {
            let event = subscription.recv().await?;
            let sse = Event::default()
                .event(event.kind().as_str())
                .json_data(&event)
                .unwrap_or_default();
            Some((Ok(sse), subscription))
        },
    ))
}

/// Stream narrations, tagged with their source event type.
async fn narration_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.narration_bus.subscribe();
    sse_response(futures_util::stream::unfold(
        subscription,
        |mut subscription| async move {
            let narration = subscription.recv().await?;
            let sse = Event::default()
                .event(narration.source_event_type.as_str())
                .json_data(&narration)
                .unwrap_or_default();
            Some((Ok(sse), subscription))
        },
    ))
}

/// Stream matched replies for voice-in debugging.
async fn response_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.response_bus.subscribe();
    sse_response(futures_util::stream::unfold(
        subscription,
        |mut subscription| async move {
            let response = subscription.recv().await?;
            let sse = Event::default()
                .event("response")
                .json_data(&response)
                .unwrap_or_default();
            Some((Ok(sse), subscription))
        },
    ))
}

// ---------------------------------------------------------------------------
// GET /test-tts
// ---------------------------------------------------------------------------

/// Exercise the synthesis + playback path and report each step.
async fn test_tts(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut result = json!({
        "tts_available": state.speech.tts_available(),
        "audio_available": state.speech.audio_available(),
    });

    if !state.speech.tts_available() {
        result["error"] = json!("TTS provider not available");
        return Json(result);
    }

    let pcm = state
        .speech
        .provider()
        .synthesize("Hello, this is a Herald test.")
        .await;
    let Some(pcm) = pcm else {
        result["error"] = json!("synthesis returned no audio");
        return Json(result);
    };
    result["pcm_bytes"] = json!(pcm.len());

    if state.speech.audio_available() {
        state.speech.player().play_immediate(pcm).await;
        result["played"] = json!(true);
    } else {
        result["played"] = json!(false);
        result["play_error"] = json!("no audio output device");
    }
    Json(result)
}
