//! Microphone capture with energy-based voice activity detection.
//!
//! Capture runs in two phases over ~100 ms chunks: wait for speech onset
//! (RMS above the silence threshold) within the listen timeout, then
//! record until a contiguous run of silence or the hard duration cap.
//! The phase logic runs over a [`ChunkSource`] so tests can script chunk
//! sequences; the real source drains a lock-free ring fed by the cpal
//! input callback, resampled to the pipeline rate.
//!
//! Cancellation is a flag observed between chunk reads; the voice-in
//! engine sets it before aborting a listen task so the capture thread
//! winds down promptly and releases the input device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{Config, SAMPLE_RATE};

/// Samples per VAD chunk (100 ms at the pipeline rate).
pub const CHUNK_SAMPLES: usize = SAMPLE_RATE as usize / 10;

/// One mono f32 chunk at the pipeline rate, or `None` when the source is
/// exhausted or failed.
pub trait ChunkSource {
    fn next_chunk(&mut self) -> Option<Vec<f32>>;
}

/// VAD thresholds and timeouts for one capture run.
#[derive(Debug, Clone, Copy)]
pub struct CaptureSettings {
    pub listen_timeout: Duration,
    pub silence_threshold: f32,
    pub silence_duration: Duration,
    pub max_record_duration: Duration,
}

impl CaptureSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            listen_timeout: config.listen_timeout,
            silence_threshold: config.silence_threshold,
            silence_duration: config.silence_duration,
            max_record_duration: config.max_record_duration,
        }
    }
}

/// Two-phase energy-VAD capture over a chunk source.
///
/// Returns i16 LE PCM of the captured speech, or `None` when no speech
/// arrived within the listen timeout, the source failed before onset, or
/// the run was cancelled.
pub fn capture_phases(
    source: &mut dyn ChunkSource,
    settings: &CaptureSettings,
    cancel: &AtomicBool,
) -> Option<Vec<u8>> {
    let listen_timeout = settings.listen_timeout.as_secs_f32();
    let silence_duration = settings.silence_duration.as_secs_f32();
    let max_duration = settings.max_record_duration.as_secs_f32();

    let mut frames: Vec<Vec<f32>> = Vec::new();
    let mut total_elapsed = 0.0f32;

    // Phase 1: wait for speech onset.
    let mut wait_elapsed = 0.0f32;
    let mut speech_started = false;
    while wait_elapsed < listen_timeout {
        if cancel.load(Ordering::Relaxed) {
            return None;
        }
        let chunk = source.next_chunk()?;
        let duration = chunk.len() as f32 / SAMPLE_RATE as f32;
        wait_elapsed += duration;

        if rms(&chunk) > settings.silence_threshold {
            total_elapsed += duration;
            frames.push(chunk);
            speech_started = true;
            break;
        }
    }
    if !speech_started {
        debug!("no speech onset within listen timeout");
        return None;
    }

    // Phase 2: record until contiguous silence or the duration cap.
    let mut silence_elapsed = 0.0f32;
    while total_elapsed < max_duration {
        if cancel.load(Ordering::Relaxed) {
            return None;
        }
        let Some(chunk) = source.next_chunk() else {
            // Stream error mid-capture: keep what we have.
            break;
        };
        let duration = chunk.len() as f32 / SAMPLE_RATE as f32;
        total_elapsed += duration;

        let level = rms(&chunk);
        frames.push(chunk);

        if level < settings.silence_threshold {
            silence_elapsed += duration;
            if silence_elapsed >= silence_duration {
                break;
            }
        } else {
            silence_elapsed = 0.0;
        }
    }

    if cancel.load(Ordering::Relaxed) {
        return None;
    }

    debug!(
        seconds = f64::from(total_elapsed),
        chunks = frames.len(),
        "speech captured"
    );
    Some(pcm16_from_frames(&frames))
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

fn pcm16_from_frames(frames: &[Vec<f32>]) -> Vec<u8> {
    let total: usize = frames.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(total * 2);
    for frame in frames {
        for &s in frame {
            let value = (s * 32767.0).clamp(-32768.0, 32767.0) as i16;
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
    out
}

/// Captures speech from the default input device.
pub struct MicrophoneCapture {
    settings: CaptureSettings,
    available: AtomicBool,
    listening: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
}

impl MicrophoneCapture {
    pub fn new(config: &Config) -> Self {
        Self {
            settings: CaptureSettings::from_config(config),
            available: AtomicBool::new(false),
            listening: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Probe for an input device. The microphone stays disabled when none
    /// is present.
    pub fn start(&self) {
        #[cfg(feature = "audio-cpal")]
        {
            use cpal::traits::HostTrait;
            let available = cpal::default_host().default_input_device().is_some();
            self.available.store(available, Ordering::Relaxed);
            if available {
                info!("microphone input device detected — capture enabled");
            } else {
                warn!("no microphone input device — capture disabled");
            }
        }
        #[cfg(not(feature = "audio-cpal"))]
        warn!("compiled without audio-cpal — capture disabled");
    }

    pub fn stop(&self) {
        self.cancel.store(true, Ordering::Relaxed);
        self.available.store(false, Ordering::Relaxed);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Relaxed)
    }

    /// Signal the capture thread to stop between chunk reads.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Record until silence or the duration cap; see [`capture_phases`].
    ///
    /// The blocking capture runs on a worker thread; the input device is
    /// open only for the duration of the call.
    pub async fn capture_until_silence(&self) -> Option<Vec<u8>> {
        if !self.is_available() {
            return None;
        }
        self.cancel.store(false, Ordering::Relaxed);
        self.listening.store(true, Ordering::Relaxed);

        let settings = self.settings;
        let cancel = Arc::clone(&self.cancel);
        let result = tokio::task::spawn_blocking(move || capture_sync(settings, cancel)).await;

        self.listening.store(false, Ordering::Relaxed);
        match result {
            Ok(pcm) => pcm,
            Err(e) => {
                warn!("capture task failed: {e}");
                None
            }
        }
    }
}

/// Open the input device, feed the ring, and run the VAD phases.
///
/// cpal streams are `!Send`, so the stream lives entirely on this worker
/// thread and drops (releasing the device) before the function returns.
#[cfg(feature = "audio-cpal")]
fn capture_sync(settings: CaptureSettings, cancel: Arc<AtomicBool>) -> Option<Vec<u8>> {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::SampleFormat;
    use ringbuf::traits::{Producer, Split};

    let device = cpal::default_host().default_input_device()?;
    let supported = match device.default_input_config() {
        Ok(supported) => supported,
        Err(e) => {
            warn!("microphone config error: {e}");
            return None;
        }
    };
    let device_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;

    // ~30 s of audio at 48 kHz; far more than one capture needs.
    let (mut producer, consumer) = ringbuf::HeapRb::<f32>::new(1 << 21).split();

    let config = cpal::StreamConfig {
        channels: channels as u16,
        sample_rate: cpal::SampleRate(device_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = match supported.sample_format() {
        SampleFormat::F32 => {
            let mut mix_buf: Vec<f32> = Vec::new();
            device.build_input_stream(
                &config,
                move |data: &[f32], _info| {
                    if channels == 1 {
                        let _ = producer.push_slice(data);
                        return;
                    }
                    let frames = data.len() / channels;
                    mix_buf.resize(frames, 0.0);
                    for f in 0..frames {
                        let base = f * channels;
                        mix_buf[f] =
                            data[base..base + channels].iter().sum::<f32>() / channels as f32;
                    }
                    let _ = producer.push_slice(&mix_buf);
                },
                |err| tracing::error!("microphone stream error: {err}"),
                None,
            )
        }
        SampleFormat::I16 => {
            let mut mix_buf: Vec<f32> = Vec::new();
            device.build_input_stream(
                &config,
                move |data: &[i16], _info| {
                    let frames = data.len() / channels;
                    mix_buf.resize(frames, 0.0);
                    for f in 0..frames {
                        let base = f * channels;
                        let sum: f32 = data[base..base + channels]
                            .iter()
                            .map(|&s| s as f32 / 32768.0)
                            .sum();
                        mix_buf[f] = sum / channels as f32;
                    }
                    let _ = producer.push_slice(&mix_buf);
                },
                |err| tracing::error!("microphone stream error: {err}"),
                None,
            )
        }
        fmt => {
            warn!("unsupported microphone sample format: {fmt:?}");
            return None;
        }
    };
    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            warn!("failed to open microphone stream: {e}");
            return None;
        }
    };
    if let Err(e) = stream.play() {
        warn!("failed to start microphone stream: {e}");
        return None;
    }

    let mut source = match RingChunkSource::new(consumer, device_rate, Arc::clone(&cancel)) {
        Some(source) => source,
        None => return None,
    };
    let captured = capture_phases(&mut source, &settings, &cancel);
    drop(stream);
    captured
}

#[cfg(not(feature = "audio-cpal"))]
fn capture_sync(_settings: CaptureSettings, _cancel: Arc<AtomicBool>) -> Option<Vec<u8>> {
    None
}

/// Drains the capture ring into fixed 100 ms chunks at the pipeline rate.
#[cfg(feature = "audio-cpal")]
struct RingChunkSource {
    consumer: ringbuf::HeapCons<f32>,
    resampler: crate::resample::Resampler,
    pending: Vec<f32>,
    cancel: Arc<AtomicBool>,
}

#[cfg(feature = "audio-cpal")]
impl RingChunkSource {
    fn new(
        consumer: ringbuf::HeapCons<f32>,
        device_rate: u32,
        cancel: Arc<AtomicBool>,
    ) -> Option<Self> {
        let resampler = match crate::resample::Resampler::new(device_rate, SAMPLE_RATE) {
            Ok(resampler) => resampler,
            Err(e) => {
                warn!("failed to create capture resampler: {e}");
                return None;
            }
        };
        Some(Self {
            consumer,
            resampler,
            pending: Vec::with_capacity(CHUNK_SAMPLES * 2),
            cancel,
        })
    }
}

#[cfg(feature = "audio-cpal")]
impl ChunkSource for RingChunkSource {
    fn next_chunk(&mut self) -> Option<Vec<f32>> {
        use ringbuf::traits::Consumer;

        let mut raw = [0f32; 1024];
        loop {
            if self.pending.len() >= CHUNK_SAMPLES {
                return Some(self.pending.drain(..CHUNK_SAMPLES).collect());
            }
            if self.cancel.load(Ordering::Relaxed) {
                return None;
            }
            let n = self.consumer.pop_slice(&mut raw);
            if n == 0 {
                std::thread::sleep(Duration::from_millis(5));
                continue;
            }
            self.resampler.feed(&raw[..n], &mut self.pending);
        }
    }
}
