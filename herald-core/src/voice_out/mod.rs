//! Stage 3: speak narrations.
//!
//! One worker consumes the narration bus and routes by priority:
//!
//! - **critical** — preempt current playback, arm the session's alert,
//!   play the reason's alert tone, then the synthesized phrase, bypassing
//!   the queue; finally raise `critical_complete` so voice-in may open
//!   the microphone.
//! - **normal** — synthesize and enqueue at rank 1.
//! - **low** — skipped entirely while the playback queue is backlogged;
//!   otherwise synthesize and enqueue at rank 2.
//!
//! The alert tone is cached PCM, so a blocked session is always audible
//! even when the synthesis provider is down.

pub mod alert;
pub mod cpal_out;
pub mod player;
pub mod remote;
pub mod tones;
pub mod tts;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::config::Config;
use crate::error::{HeraldError, Result};
use crate::events::{ActivityEvent, NarrationEvent, NarrationPriority, SynthState};
use crate::signal::ResetSignal;

use alert::{AlertManager, AlertRepeat};
use player::{AudioPlayer, OutputDevice};
use remote::RemoteSink;
use tts::TtsProvider;

pub struct SpeechEngine {
    narration_bus: EventBus<NarrationEvent>,
    core: EngineCore,
    running: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// The handler state shared with the worker tasks.
#[derive(Clone)]
struct EngineCore {
    provider: Arc<dyn TtsProvider>,
    player: Arc<AudioPlayer>,
    remote: Arc<RemoteSink>,
    alerts: Arc<AlertManager>,
    critical_complete: ResetSignal,
    backlog_threshold: usize,
}

impl SpeechEngine {
    /// Build the engine around an injected provider and output device.
    ///
    /// The app wires in [`tts::create_tts_provider`] and
    /// [`cpal_out::CpalOutput::probe`]; tests script both seams.
    pub fn new(
        config: &Config,
        activity_bus: EventBus<ActivityEvent>,
        narration_bus: EventBus<NarrationEvent>,
        provider: Arc<dyn TtsProvider>,
        device: Arc<dyn OutputDevice>,
    ) -> Result<Self> {
        Ok(Self {
            narration_bus,
            core: EngineCore {
                provider,
                player: Arc::new(AudioPlayer::new(device, config.audio_backlog_threshold)),
                remote: Arc::new(RemoteSink::new(config)?),
                alerts: Arc::new(AlertManager::new(config, activity_bus)),
                critical_complete: ResetSignal::new(),
                backlog_threshold: config.audio_backlog_threshold,
            },
            running: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Start sub-components, subscribe to the narration bus, begin the
    /// consume and repeat loops.
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(HeraldError::AlreadyRunning);
        }

        self.core.provider.start().await;
        self.core.player.start();
        self.core.remote.start().await;

        let (repeat_tx, mut repeat_rx) = mpsc::channel::<AlertRepeat>(16);
        self.core.alerts.start(repeat_tx);

        let mut tasks = self.tasks.lock();

        // Repeat loop: replay tone + narration for still-active alerts.
        let core = self.core.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(repeat) = repeat_rx.recv().await {
                core.handle_repeat(repeat).await;
            }
        }));

        // Main consume loop.
        let core = self.core.clone();
        let running = Arc::clone(&self.running);
        let mut subscription = self.narration_bus.subscribe();
        tasks.push(tokio::spawn(async move {
            debug!("speech engine worker started");
            while running.load(Ordering::Relaxed) {
                match subscription.recv().await {
                    Some(narration) => core.process_narration(narration).await,
                    None => break,
                }
            }
            debug!("speech engine worker stopped");
        }));
        drop(tasks);

        info!(state = ?self.state(), "speech engine started");
        Ok(())
    }

    /// Stop workers and sub-components in reverse construction order.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.core.alerts.stop();
        self.core.remote.stop().await;
        self.core.player.stop().await;
        info!("speech engine stopped");
    }

    // ── Health introspection ─────────────────────────────────────────────

    pub fn state(&self) -> SynthState {
        let tts_ok = self.core.provider.is_available();
        let audio_ok = self.core.player.is_available();
        match (tts_ok, audio_ok) {
            (true, true) => SynthState::Active,
            (false, false) => SynthState::Disabled,
            _ => SynthState::Degraded,
        }
    }

    pub fn tts_available(&self) -> bool {
        self.core.provider.is_available()
    }

    pub fn audio_available(&self) -> bool {
        self.core.player.is_available()
    }

    pub fn remote_connected(&self) -> bool {
        self.core.remote.is_connected()
    }

    /// The alert manager is the single source of truth for active alerts.
    pub fn alert_active(&self) -> bool {
        self.core.alerts.active_count() > 0
    }

    pub fn provider_name(&self) -> &'static str {
        self.core.provider.provider_name()
    }

    // ── Collaborator access ──────────────────────────────────────────────

    /// Signal raised when a blocking narration's speech has finished.
    pub fn critical_complete(&self) -> ResetSignal {
        self.core.critical_complete.clone()
    }

    /// Shared alert state, cleared by voice-in after dispatch.
    pub fn alerts(&self) -> Arc<AlertManager> {
        Arc::clone(&self.core.alerts)
    }

    /// Synthesize and play a short phrase outside the queue (used for the
    /// dispatch confirmation and the diagnostic synthesis check).
    pub async fn speak_immediate(&self, text: &str) -> bool {
        match self.core.provider.synthesize(text).await {
            Some(pcm) => {
                self.core.player.play_immediate(pcm).await;
                true
            }
            None => false,
        }
    }

    /// Direct provider access for diagnostics.
    pub fn provider(&self) -> Arc<dyn TtsProvider> {
        Arc::clone(&self.core.provider)
    }

    /// Direct player access for diagnostics.
    pub fn player(&self) -> Arc<AudioPlayer> {
        Arc::clone(&self.core.player)
    }
}

impl EngineCore {
    async fn process_narration(&self, narration: NarrationEvent) {
        match narration.priority {
            NarrationPriority::Critical => self.handle_critical(narration).await,
            NarrationPriority::Normal => self.handle_normal(narration).await,
            NarrationPriority::Low => self.handle_low(narration).await,
        }
    }

    /// Preempt, alert, speak, then let voice-in take the microphone.
    async fn handle_critical(&self, narration: NarrationEvent) {
        self.critical_complete.clear();
        self.alerts
            .activate(&narration.session_id, narration.block_reason, &narration.text);

        self.player.interrupt();
        self.player.play_alert(narration.block_reason).await;

        match self.provider.synthesize(&narration.text).await {
            Some(pcm) => {
                self.player.play_immediate(pcm.clone()).await;
                self.remote.publish(&pcm).await;
            }
            // The tone above already alerted the listener; that matters
            // more than the missing speech.
            None => debug!("synthesis unavailable — critical alert tone only"),
        }

        self.critical_complete.set();
        info!(
            session_id = %narration.session_id,
            text = %narration.text.chars().take(80).collect::<String>(),
            "critical narration played"
        );
    }

    async fn handle_normal(&self, narration: NarrationEvent) {
        let Some(pcm) = self.provider.synthesize(&narration.text).await else {
            debug!("skipping narration — synthesis unavailable");
            return;
        };
        self.player.enqueue(pcm.clone(), NarrationPriority::Normal.rank());
        self.remote.publish(&pcm).await;
        info!(
            text = %narration.text.chars().take(80).collect::<String>(),
            "normal narration queued"
        );
    }

    async fn handle_low(&self, narration: NarrationEvent) {
        if self.player.queue_depth() > self.backlog_threshold {
            warn!("skipping low-priority narration — audio backlog");
            return;
        }
        let Some(pcm) = self.provider.synthesize(&narration.text).await else {
            debug!("skipping narration — synthesis unavailable");
            return;
        };
        self.player.enqueue(pcm.clone(), NarrationPriority::Low.rank());
        self.remote.publish(&pcm).await;
    }

    async fn handle_repeat(&self, repeat: AlertRepeat) {
        debug!(session_id = %repeat.session_id, repeat = repeat.repeat, "replaying alert");
        self.player.play_alert(repeat.block_reason).await;
        if let Some(pcm) = self.provider.synthesize(&repeat.narration_text).await {
            self.player.play_immediate(pcm).await;
        }
    }
}
