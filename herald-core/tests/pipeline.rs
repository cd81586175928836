//! End-to-end pipeline test: hook payloads in, audio out.
//!
//! Drives the activity bus with parsed hook payloads and observes the
//! narrations and playback produced by the summarize and voice-out
//! stages, with the synthesis provider and output device scripted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use herald_core::voice_out::player::OutputDevice;
use herald_core::voice_out::tones::generate_alert_pcm16;
use herald_core::voice_out::tts::TtsProvider;
use herald_core::{
    parse_hook_event, ActivityEvent, BlockReason, Config, EventBus, HeraldError, NarrationEvent,
    NarrationPriority, SpeechEngine, Summarizer, SAMPLE_RATE,
};

struct ScriptedProvider {
    synthesized: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            synthesized: Mutex::new(Vec::new()),
        })
    }

    fn pcm_for(text: &str) -> Vec<u8> {
        vec![text.len() as u8; 8]
    }
}

#[async_trait]
impl TtsProvider for ScriptedProvider {
    async fn start(&self) {}
    fn is_available(&self) -> bool {
        true
    }
    fn provider_name(&self) -> &'static str {
        "scripted"
    }
    async fn synthesize(&self, text: &str) -> Option<Vec<u8>> {
        self.synthesized.lock().push(text.to_string());
        Some(Self::pcm_for(text))
    }
}

struct ScriptedDevice {
    played: Mutex<Vec<Vec<u8>>>,
    halt_generation: AtomicU64,
}

impl ScriptedDevice {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            played: Mutex::new(Vec::new()),
            halt_generation: AtomicU64::new(0),
        })
    }

    fn played(&self) -> Vec<Vec<u8>> {
        self.played.lock().clone()
    }
}

impl OutputDevice for ScriptedDevice {
    fn is_available(&self) -> bool {
        true
    }
    fn play_blocking(&self, pcm: &[u8]) -> herald_core::Result<()> {
        self.played.lock().push(pcm.to_vec());
        let start_gen = self.halt_generation.load(Ordering::SeqCst);
        let deadline = Instant::now() + Duration::from_millis(20);
        while Instant::now() < deadline {
            if self.halt_generation.load(Ordering::SeqCst) != start_gen {
                return Err(HeraldError::PlaybackHalted);
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        Ok(())
    }
    fn halt(&self) {
        self.halt_generation.fetch_add(1, Ordering::SeqCst);
    }
}

fn offline_config() -> Config {
    Config {
        batch_window: Duration::from_millis(50),
        llm_base_url: "http://127.0.0.1:1".into(),
        ..Config::default()
    }
}

async fn wait_until<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn edits_batch_into_one_spoken_narration() {
    let config = offline_config();
    let activity: EventBus<ActivityEvent> = EventBus::new(config.bus_capacity);
    let narrations: EventBus<NarrationEvent> = EventBus::new(config.bus_capacity);
    let mut narration_sub = narrations.subscribe();

    let summarizer =
        Summarizer::new(&config, activity.clone(), narrations.clone()).expect("summarizer");
    summarizer.start().await.expect("summarizer start");

    let provider = ScriptedProvider::new();
    let device = ScriptedDevice::new();
    let speech = SpeechEngine::new(
        &config,
        activity.clone(),
        narrations.clone(),
        provider.clone(),
        device.clone(),
    )
    .expect("speech engine");
    speech.start().await.expect("speech start");

    for name in ["a.py", "b.py", "c.py"] {
        let payload = json!({
            "hook_event_name": "PostToolUse",
            "session_id": "sess-e2e",
            "tool_name": "Edit",
            "tool_input": {"file_path": name},
        });
        activity.emit(parse_hook_event(&payload).expect("parsed"));
    }

    let narration = tokio::time::timeout(Duration::from_secs(2), narration_sub.recv())
        .await
        .expect("narration within window")
        .expect("bus open");
    assert_eq!(narration.text, "Edited 3 files.");
    assert_eq!(narration.priority, NarrationPriority::Normal);

    assert!(
        wait_until(
            || device.played().contains(&ScriptedProvider::pcm_for("Edited 3 files.")),
            Duration::from_secs(2)
        )
        .await,
        "batched narration reaches the speaker"
    );

    speech.stop().await;
    summarizer.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocked_session_alerts_and_resolves() {
    let config = offline_config();
    let activity: EventBus<ActivityEvent> = EventBus::new(config.bus_capacity);
    let narrations: EventBus<NarrationEvent> = EventBus::new(config.bus_capacity);

    let summarizer =
        Summarizer::new(&config, activity.clone(), narrations.clone()).expect("summarizer");
    summarizer.start().await.expect("summarizer start");

    let provider = ScriptedProvider::new();
    let device = ScriptedDevice::new();
    let speech = SpeechEngine::new(
        &config,
        activity.clone(),
        narrations.clone(),
        provider.clone(),
        device.clone(),
    )
    .expect("speech engine");
    speech.start().await.expect("speech start");

    let blocked = json!({
        "hook_event_name": "Notification",
        "session_id": "sess-e2e",
        "type": "question",
        "message": "Which DB?",
        "options": ["Postgres", "MySQL"],
    });
    activity.emit(parse_hook_event(&blocked).expect("parsed"));

    let expected_text = "The agent has a question. Which DB? Options are: Postgres and MySQL.";
    assert!(
        wait_until(|| speech.alert_active(), Duration::from_secs(2)).await,
        "blocked session arms an alert"
    );
    assert!(
        wait_until(
            || device.played().len() >= 2 && speech.critical_complete().is_set(),
            Duration::from_secs(2)
        )
        .await,
        "tone and speech play before completion is signalled"
    );
    let played = device.played();
    assert_eq!(
        played[0],
        generate_alert_pcm16(Some(BlockReason::Question), SAMPLE_RATE)
    );
    assert_eq!(played[1], ScriptedProvider::pcm_for(expected_text));

    // Any further activity for the session resolves the alert.
    let tool = json!({
        "hook_event_name": "PostToolUse",
        "session_id": "sess-e2e",
        "tool_name": "Bash",
        "tool_input": {"command": "psql --version"},
    });
    activity.emit(parse_hook_event(&tool).expect("parsed"));
    assert!(
        wait_until(|| !speech.alert_active(), Duration::from_secs(2)).await,
        "non-blocked activity clears the alert"
    );

    speech.stop().await;
    summarizer.stop().await;
}
