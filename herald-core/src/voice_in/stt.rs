//! Speech-to-text HTTP client.
//!
//! Captured PCM is wrapped in a WAV container (the transcription API
//! wants a file format) and posted to a Whisper-style endpoint. The
//! client degrades gracefully: missing key disables it, transient
//! failures flip the availability flag, and a fixed-interval re-probe
//! flips it back once the service recovers.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::{Config, SAMPLE_RATE};
use crate::error::Result;

pub struct SttClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    recheck_interval: Duration,
    available: AtomicBool,
    last_health_check: Mutex<Instant>,
}

impl SttClient {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(config.stt_timeout)
                .build()?,
            base_url: config.stt_base_url.trim_end_matches('/').to_string(),
            api_key: config.stt_api_key.clone(),
            model: config.stt_model.clone(),
            recheck_interval: config.health_recheck,
            available: AtomicBool::new(false),
            last_health_check: Mutex::new(Instant::now()),
        })
    }

    /// Initial availability probe. Call once at startup.
    pub async fn start(&self) {
        if self.api_key.is_empty() {
            info!("no STT API key — transcription disabled");
            return;
        }
        self.check_health().await;
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    /// Transcribe raw 16 kHz i16 mono PCM.
    ///
    /// Returns the trimmed transcript, or `None` on any failure or when
    /// the service returns empty text. Never errors to the caller.
    pub async fn transcribe(&self, pcm: &[u8]) -> Option<String> {
        self.maybe_recheck_health().await;
        if !self.is_available() {
            return None;
        }

        let wav = match wrap_wav(pcm, SAMPLE_RATE) {
            Ok(wav) => wav,
            Err(e) => {
                warn!("failed to build WAV container: {e}");
                return None;
            }
        };

        let part = match reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
        {
            Ok(part) => part,
            Err(e) => {
                warn!("failed to build multipart body: {e}");
                return None;
            }
        };
        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .part("file", part);

        let result = self
            .client
            .post(format!("{}/v1/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await;

        let resp = match result {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                warn!(status = %resp.status(), "transcription request failed");
                return None;
            }
            Err(e) => {
                warn!("transcription request failed: {e}");
                self.available.store(false, Ordering::Relaxed);
                *self.last_health_check.lock() = Instant::now();
                return None;
            }
        };

        let body: serde_json::Value = match resp.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!("transcription response decode failed: {e}");
                return None;
            }
        };
        let transcript = body.get("text").and_then(|v| v.as_str())?.trim().to_string();
        if transcript.is_empty() {
            return None;
        }
        debug!(transcript = %transcript, "transcription complete");
        Some(transcript)
    }

    /// Validate the API key via the model listing.
    async fn check_health(&self) {
        *self.last_health_check.lock() = Instant::now();
        let result = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {
                self.available.store(true, Ordering::Relaxed);
                info!(base_url = %self.base_url, model = %self.model, "STT available");
            }
            Ok(resp) => {
                self.available.store(false, Ordering::Relaxed);
                warn!(status = %resp.status(), "STT endpoint unhealthy — transcription unavailable");
            }
            Err(e) => {
                self.available.store(false, Ordering::Relaxed);
                warn!("STT endpoint not reachable — transcription disabled: {e}");
            }
        }
    }

    async fn maybe_recheck_health(&self) {
        if self.is_available() || self.api_key.is_empty() {
            return;
        }
        let due = self.last_health_check.lock().elapsed() >= self.recheck_interval;
        if due {
            self.check_health().await;
        }
    }
}

/// Wrap raw i16 LE PCM in a mono 16-bit WAV container.
fn wrap_wav(pcm: &[u8], sample_rate: u32) -> std::result::Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for bytes in pcm.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([bytes[0], bytes[1]]))?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_container_has_riff_header_and_all_samples() {
        let pcm: Vec<u8> = (0..100i16).flat_map(|s| s.to_le_bytes()).collect();
        let wav = wrap_wav(&pcm, SAMPLE_RATE).expect("wav");
        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        // 44-byte canonical header + payload.
        assert_eq!(wav.len(), 44 + pcm.len());

        let mut reader = hound::WavReader::new(Cursor::new(wav)).expect("readable");
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, SAMPLE_RATE);
        assert_eq!(spec.bits_per_sample, 16);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, (0..100i16).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn missing_api_key_disables_transcription() {
        let client = SttClient::new(&Config::default()).unwrap();
        client.start().await;
        assert!(!client.is_available());
        assert!(client.transcribe(&[0u8; 64]).await.is_none());
    }

    #[tokio::test]
    async fn unreachable_endpoint_leaves_client_unavailable() {
        let config = Config {
            stt_api_key: "key".into(),
            stt_base_url: "http://127.0.0.1:1".into(),
            ..Config::default()
        };
        let client = SttClient::new(&config).unwrap();
        client.start().await;
        assert!(!client.is_available());
        assert!(client.transcribe(&[0u8; 64]).await.is_none());
    }
}
