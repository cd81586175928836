//! Stage 4: capture a spoken reply and send it back to the assistant.
//!
//! The listen engine consumes the activity bus directly (not narrations)
//! because it needs the blocked event's original options and reason. A
//! blocked event starts a listen task; any non-blocked event for that
//! session, or a newer blocked event, cancels it. At most one listen task
//! runs at a time.
//!
//! A listen task waits for voice-out to finish the blocking narration
//! before opening the microphone, so the speaker and the microphone
//! never contend. Then: capture → transcribe → match → confidence gate →
//! response event → optional spoken confirmation → keystroke dispatch →
//! clear the alert.

pub mod dispatch;
pub mod matcher;
pub mod microphone;
pub mod stt;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::config::Config;
use crate::error::{HeraldError, Result};
use crate::events::{
    now_ts, ActivityEvent, BlockReason, ListenState, MatchMethod, ResponseEvent,
};
use crate::signal::ResetSignal;
use crate::voice_out::alert::AlertManager;
use crate::voice_out::SpeechEngine;

use dispatch::ResponseDispatcher;
use microphone::MicrophoneCapture;
use stt::SttClient;

/// Waits around the critical playback handoff.
#[derive(Debug, Clone, Copy)]
pub struct ListenTiming {
    /// Lets the blocked event propagate through summarize → voice-out so
    /// the completion signal is meaningfully cleared before waiting.
    pub propagation_delay: Duration,
    /// Cap on waiting for the critical playback to finish.
    pub playback_wait: Duration,
}

impl Default for ListenTiming {
    fn default() -> Self {
        Self {
            propagation_delay: Duration::from_millis(500),
            playback_wait: Duration::from_secs(20),
        }
    }
}

pub struct ListenEngine {
    activity_bus: EventBus<ActivityEvent>,
    core: ListenCore,
    running: Arc<AtomicBool>,
    consume_task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
struct ListenCore {
    mic: Arc<MicrophoneCapture>,
    stt: Arc<SttClient>,
    dispatcher: Arc<ResponseDispatcher>,
    response_bus: EventBus<ResponseEvent>,
    alerts: Arc<AlertManager>,
    critical_complete: ResetSignal,
    /// Speaks the "Sending: …" confirmation when set.
    confirmer: Option<Arc<SpeechEngine>>,
    confidence_threshold: f32,
    timing: ListenTiming,
    current_session: Arc<Mutex<Option<String>>>,
    listen_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ListenEngine {
    pub fn new(
        config: &Config,
        activity_bus: EventBus<ActivityEvent>,
        response_bus: EventBus<ResponseEvent>,
        alerts: Arc<AlertManager>,
        critical_complete: ResetSignal,
    ) -> Result<Self> {
        Ok(Self {
            activity_bus,
            core: ListenCore {
                mic: Arc::new(MicrophoneCapture::new(config)),
                stt: Arc::new(SttClient::new(config)?),
                dispatcher: Arc::new(ResponseDispatcher::new(&config.dispatch_method)),
                response_bus,
                alerts,
                critical_complete,
                confirmer: None,
                confidence_threshold: config.confidence_threshold,
                timing: ListenTiming::default(),
                current_session: Arc::new(Mutex::new(None)),
                listen_task: Arc::new(Mutex::new(None)),
            },
            running: Arc::new(AtomicBool::new(false)),
            consume_task: Mutex::new(None),
        })
    }

    /// Wire in the speech engine used for spoken confirmations.
    pub fn set_confirmer(&mut self, speech: Arc<SpeechEngine>) {
        self.core.confirmer = Some(speech);
    }

    /// Override the handoff waits (short timings for tests).
    pub fn set_timing(&mut self, timing: ListenTiming) {
        self.core.timing = timing;
    }

    /// Start sub-components, subscribe to the activity bus, begin the
    /// consume loop.
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(HeraldError::AlreadyRunning);
        }
        self.core.mic.start();
        self.core.stt.start().await;
        self.core.dispatcher.start();

        let mut subscription = self.activity_bus.subscribe();
        let core = self.core.clone();
        let running = Arc::clone(&self.running);
        *self.consume_task.lock() = Some(tokio::spawn(async move {
            debug!("listen engine worker started");
            while running.load(Ordering::Relaxed) {
                match subscription.recv().await {
                    Some(event) => core.handle_event(event).await,
                    None => break,
                }
            }
            debug!("listen engine worker stopped");
        }));

        info!(state = ?self.state(), "listen engine started");
        Ok(())
    }

    /// Cancel any active listening and stop sub-components.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.core.cancel_listen_task().await;
        if let Some(task) = self.consume_task.lock().take() {
            task.abort();
        }
        self.core.dispatcher.stop();
        self.core.mic.stop();
        *self.core.current_session.lock() = None;
        info!("listen engine stopped");
    }

    // ── Health introspection ─────────────────────────────────────────────

    pub fn state(&self) -> ListenState {
        if self.is_listening() {
            return ListenState::Listening;
        }
        let stt_ok = self.core.stt.is_available();
        let mic_ok = self.core.mic.is_available();
        match (stt_ok, mic_ok) {
            (true, true) => ListenState::Active,
            (false, false) => ListenState::Disabled,
            _ => ListenState::Degraded,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.core.mic.is_listening()
    }

    pub fn stt_available(&self) -> bool {
        self.core.stt.is_available()
    }

    pub fn mic_available(&self) -> bool {
        self.core.mic.is_available()
    }

    pub fn dispatch_available(&self) -> bool {
        self.core.dispatcher.is_available()
    }

    /// Manual text reply: bypass capture, transcription and matching.
    ///
    /// Emits a verbatim response event, dispatches, and clears the alert
    /// whether or not dispatch succeeded. Returns the dispatch outcome.
    pub async fn handle_manual_response(&self, session_id: &str, text: &str) -> bool {
        self.core.cancel_listening_for(session_id).await;

        self.core.response_bus.emit(ResponseEvent {
            text: text.to_string(),
            transcript: text.to_string(),
            session_id: session_id.to_string(),
            match_method: MatchMethod::Verbatim,
            confidence: 1.0,
            options: None,
            timestamp: now_ts(),
        });

        let success = if self.core.dispatcher.is_available() {
            let success = self.core.dispatcher.dispatch(text).await;
            info!(session_id, success, "manual response dispatched");
            success
        } else {
            warn!(session_id, "dispatch unavailable for manual response");
            false
        };

        self.core.alerts.clear_alert(session_id);
        success
    }
}

impl ListenCore {
    async fn handle_event(&self, event: ActivityEvent) {
        if event.is_blocked() {
            self.start_listening(event).await;
            return;
        }
        let is_current = self
            .current_session
            .lock()
            .as_deref()
            .is_some_and(|current| current == event.session_id);
        if is_current {
            info!(session_id = %event.session_id, "session resolved — cancelling listen");
            self.cancel_listening_for(&event.session_id).await;
        }
    }

    /// Begin a listen task for a blocked session, replacing any in-flight
    /// task (same or different session).
    async fn start_listening(&self, event: ActivityEvent) {
        self.cancel_listen_task().await;

        *self.current_session.lock() = Some(event.session_id.clone());
        let core = self.clone();
        let session_id = event.session_id.clone();
        let options = event.options().map(<[String]>::to_vec);
        let block_reason = event.block_reason();
        *self.listen_task.lock() = Some(tokio::spawn(async move {
            core.listen_and_respond(&session_id, options.as_deref(), block_reason)
                .await;
            let mut current = core.current_session.lock();
            if current.as_deref() == Some(session_id.as_str()) {
                *current = None;
            }
        }));
    }

    /// Full cycle: wait for playback, capture, transcribe, match, gate,
    /// respond, confirm, dispatch, clear.
    async fn listen_and_respond(
        &self,
        session_id: &str,
        options: Option<&[String]>,
        block_reason: Option<BlockReason>,
    ) {
        // Step 1: hand over the audio path from voice-out.
        tokio::time::sleep(self.timing.propagation_delay).await;
        if !self
            .critical_complete
            .wait_timeout(self.timing.playback_wait)
            .await
        {
            warn!(session_id, "timed out waiting for critical playback to finish");
        }

        // Step 2–3: capture.
        if !self.mic.is_available() {
            info!(session_id, "microphone not available — skipping voice capture");
            return;
        }
        let Some(audio) = self.mic.capture_until_silence().await else {
            info!(session_id, "no speech detected");
            return;
        };

        // Step 4–5: transcribe.
        if !self.stt.is_available() {
            info!(session_id, "transcription not available");
            return;
        }
        let Some(transcript) = self.stt.transcribe(&audio).await else {
            warn!(session_id, "transcription returned empty");
            return;
        };
        info!(session_id, transcript = %transcript, "reply transcribed");

        // Step 6–7: match and gate.
        let result = matcher::match_response(
            &transcript,
            options,
            block_reason,
            self.confidence_threshold,
        );
        info!(
            session_id,
            matched = %result.matched_text,
            confidence = result.confidence,
            method = ?result.method,
            "reply matched"
        );
        if result.method != MatchMethod::Verbatim && result.confidence < self.confidence_threshold {
            info!(
                session_id,
                confidence = result.confidence,
                threshold = self.confidence_threshold,
                "low confidence — not dispatching"
            );
            return;
        }

        // Step 8: diagnostic response event.
        self.response_bus.emit(ResponseEvent {
            text: result.matched_text.clone(),
            transcript: transcript.clone(),
            session_id: session_id.to_string(),
            match_method: result.method,
            confidence: result.confidence,
            options: options.map(<[String]>::to_vec),
            timestamp: now_ts(),
        });

        // Step 9: spoken confirmation (best effort).
        if let Some(confirmer) = &self.confirmer {
            let confirmation = format!("Sending: {}", result.matched_text);
            if !confirmer.speak_immediate(&confirmation).await {
                debug!("confirmation synthesis unavailable — continuing with dispatch");
            }
        }

        // Step 10: dispatch, then clear the alert either way.
        if self.dispatcher.is_available() {
            let success = self.dispatcher.dispatch(&result.matched_text).await;
            info!(session_id, success, reply = %result.matched_text, "reply dispatched");
        } else {
            info!(
                session_id,
                reply = %result.matched_text,
                "dispatch unavailable — reply must be typed manually"
            );
        }
        self.alerts.clear_alert(session_id);
    }

    /// Cancel listening if it belongs to `session_id`.
    async fn cancel_listening_for(&self, session_id: &str) {
        let is_current = self
            .current_session
            .lock()
            .as_deref()
            .is_some_and(|current| current == session_id);
        if is_current {
            self.cancel_listen_task().await;
            *self.current_session.lock() = None;
        }
    }

    /// Abort the in-flight listen task, stopping capture first so the
    /// worker thread releases the input device.
    async fn cancel_listen_task(&self) {
        let task = self.listen_task.lock().take();
        if let Some(task) = task {
            self.mic.cancel();
            task.abort();
            let _ = task.await;
        }
    }
}
