//! Text-to-speech providers.
//!
//! A provider turns a phrase into raw PCM (16 kHz, 16-bit, mono) or
//! `None` — never an error. Each provider tracks its own availability:
//! missing credentials disable it outright, transient failures flip the
//! flag, and a background re-probe flips it back once the service
//! recovers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine as _;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::{Config, SAMPLE_RATE};
use crate::error::Result;

/// Contract for speech synthesis backends.
#[async_trait]
pub trait TtsProvider: Send + Sync {
    /// Initial health probe. Called once at engine startup.
    async fn start(&self);

    /// Whether the provider is currently healthy and can synthesize.
    fn is_available(&self) -> bool;

    /// Provider name for health/status display.
    fn provider_name(&self) -> &'static str;

    /// Synthesize to raw 16 kHz i16 mono PCM. Returns `None` on any
    /// failure; never errors to the caller.
    async fn synthesize(&self, text: &str) -> Option<Vec<u8>>;
}

/// Select and build the provider named in the config.
pub fn create_tts_provider(config: &Config) -> Result<std::sync::Arc<dyn TtsProvider>> {
    match config.tts_provider.as_str() {
        "inworld" => {
            info!("creating Inworld TTS provider");
            Ok(std::sync::Arc::new(InworldClient::new(config)?))
        }
        _ => {
            info!("creating ElevenLabs TTS provider");
            Ok(std::sync::Arc::new(ElevenLabsClient::new(config)?))
        }
    }
}

/// Availability tracking shared by the HTTP providers.
struct HealthGate {
    available: AtomicBool,
    last_check: Mutex<Instant>,
    recheck_interval: Duration,
}

impl HealthGate {
    fn new(recheck_interval: Duration) -> Self {
        Self {
            available: AtomicBool::new(false),
            last_check: Mutex::new(Instant::now()),
            recheck_interval,
        }
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    fn record(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
        *self.last_check.lock() = Instant::now();
    }

    /// Whether an unavailable provider is due for a re-probe.
    fn recheck_due(&self) -> bool {
        !self.is_available() && self.last_check.lock().elapsed() >= self.recheck_interval
    }
}

// ---------------------------------------------------------------------------
// ElevenLabs
// ---------------------------------------------------------------------------

pub struct ElevenLabsClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    voice_id: String,
    model: String,
    health: HealthGate,
}

impl ElevenLabsClient {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(config.tts_timeout)
                .build()?,
            base_url: config.elevenlabs_base_url.trim_end_matches('/').to_string(),
            api_key: config.elevenlabs_api_key.clone(),
            voice_id: config.elevenlabs_voice_id.clone(),
            model: config.elevenlabs_model.clone(),
            health: HealthGate::new(config.health_recheck),
        })
    }

    async fn check_health(&self) {
        let response = self
            .client
            .get(format!("{}/v1/user", self.base_url))
            .header("xi-api-key", &self.api_key)
            .send()
            .await;
        match response {
            Ok(resp) if resp.status().is_success() => {
                self.health.record(true);
                info!(voice = %self.voice_id, model = %self.model, "ElevenLabs TTS available");
            }
            Ok(resp) => {
                self.health.record(false);
                warn!(status = %resp.status(), "ElevenLabs unhealthy — TTS unavailable");
            }
            Err(e) => {
                self.health.record(false);
                warn!("ElevenLabs not reachable — TTS disabled: {e}");
            }
        }
    }
}

#[async_trait]
impl TtsProvider for ElevenLabsClient {
    async fn start(&self) {
        if self.api_key.is_empty() {
            info!("no ElevenLabs API key — TTS disabled");
            return;
        }
        self.check_health().await;
    }

    fn is_available(&self) -> bool {
        self.health.is_available()
    }

    fn provider_name(&self) -> &'static str {
        "elevenlabs"
    }

    async fn synthesize(&self, text: &str) -> Option<Vec<u8>> {
        if self.api_key.is_empty() {
            return None;
        }
        if self.health.recheck_due() {
            self.check_health().await;
        }
        if !self.is_available() {
            return None;
        }

        let result = self
            .client
            .post(format!(
                "{}/v1/text-to-speech/{}",
                self.base_url, self.voice_id
            ))
            .query(&[("output_format", format!("pcm_{SAMPLE_RATE}"))])
            .header("xi-api-key", &self.api_key)
            .json(&serde_json::json!({"text": text, "model_id": self.model}))
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                Ok(bytes) if !bytes.is_empty() => Some(bytes.to_vec()),
                Ok(_) => {
                    warn!("ElevenLabs returned empty audio");
                    None
                }
                Err(e) => {
                    warn!("ElevenLabs body read failed: {e}");
                    None
                }
            },
            Ok(resp) => {
                warn!(status = %resp.status(), "ElevenLabs synthesis failed");
                None
            }
            Err(e) => {
                warn!("ElevenLabs synthesis failed: {e}");
                self.health.record(false);
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Inworld
// ---------------------------------------------------------------------------

pub struct InworldClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    voice_id: String,
    model: String,
    temperature: f32,
    speaking_rate: f32,
    health: HealthGate,
}

impl InworldClient {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(config.tts_timeout)
                .build()?,
            base_url: config.inworld_base_url.trim_end_matches('/').to_string(),
            api_key: config.inworld_api_key.clone(),
            voice_id: config.inworld_voice_id.clone(),
            model: config.inworld_model.clone(),
            temperature: config.inworld_temperature,
            speaking_rate: config.inworld_speaking_rate,
            health: HealthGate::new(config.health_recheck),
        })
    }

    async fn check_health(&self) {
        // Inworld has no cheap auth probe; a zero-length synthesis request
        // would be billed, so reachability of the API host stands in.
        let response = self.client.get(&self.base_url).send().await;
        match response {
            Ok(_) => {
                self.health.record(true);
                info!(voice = %self.voice_id, model = %self.model, "Inworld TTS available");
            }
            Err(e) => {
                self.health.record(false);
                warn!("Inworld not reachable — TTS disabled: {e}");
            }
        }
    }
}

#[async_trait]
impl TtsProvider for InworldClient {
    async fn start(&self) {
        if self.api_key.is_empty() {
            info!("no Inworld API key — TTS disabled");
            return;
        }
        self.check_health().await;
    }

    fn is_available(&self) -> bool {
        self.health.is_available()
    }

    fn provider_name(&self) -> &'static str {
        "inworld"
    }

    async fn synthesize(&self, text: &str) -> Option<Vec<u8>> {
        if self.api_key.is_empty() {
            return None;
        }
        if self.health.recheck_due() {
            self.check_health().await;
        }
        if !self.is_available() {
            return None;
        }

        let result = self
            .client
            .post(format!("{}/tts/v1/voice", self.base_url))
            .header("Authorization", format!("Basic {}", self.api_key))
            .json(&serde_json::json!({
                "text": text,
                "voiceId": self.voice_id,
                "modelId": self.model,
                "audioConfig": {
                    "audioEncoding": "LINEAR16",
                    "sampleRateHertz": SAMPLE_RATE,
                    "speakingRate": self.speaking_rate,
                },
                "temperature": self.temperature,
            }))
            .send()
            .await;

        let resp = match result {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                warn!(status = %resp.status(), "Inworld synthesis failed");
                return None;
            }
            Err(e) => {
                warn!("Inworld synthesis failed: {e}");
                self.health.record(false);
                return None;
            }
        };

        let body: serde_json::Value = match resp.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Inworld response decode failed: {e}");
                return None;
            }
        };
        let audio_content = body
            .get("result")
            .and_then(|r| r.get("audioContent"))
            .and_then(|v| v.as_str())?;

        match base64::engine::general_purpose::STANDARD.decode(audio_content) {
            Ok(audio) => Some(strip_riff_header(audio)),
            Err(e) => {
                warn!("Inworld audioContent is not valid base64: {e}");
                None
            }
        }
    }
}

/// Inworld sometimes wraps LINEAR16 in a WAV container; drop the header.
fn strip_riff_header(audio: Vec<u8>) -> Vec<u8> {
    if audio.len() > 44 && &audio[..4] == b"RIFF" {
        audio[44..].to_vec()
    } else {
        audio
    }
}
