//! Speaker output via cpal.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio
//! on macOS), so a stream must be created and dropped on one thread. The
//! player's blocking worker calls [`OutputDevice::play_blocking`] from a
//! single thread, and this implementation opens a fresh stream there for
//! each clip — the `CpalOutput` handle itself stays shareable.
//!
//! The output callback runs on an OS audio thread and reads from an
//! immutable sample buffer through an atomic cursor; no locks, no
//! allocation.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::SAMPLE_RATE;
use crate::error::{HeraldError, Result};
use crate::resample::Resampler;
use crate::voice_out::player::OutputDevice;

/// Poll interval while waiting for a clip to drain.
const DRAIN_POLL: Duration = Duration::from_millis(5);

/// Extra wait after the cursor reaches the end, letting the device buffer
/// empty before the stream is dropped.
const TAIL_DRAIN: Duration = Duration::from_millis(60);

pub struct CpalOutput {
    available: bool,
    halt_generation: AtomicU64,
}

impl CpalOutput {
    /// Probe for a default output device.
    #[cfg(feature = "audio-cpal")]
    pub fn probe() -> Self {
        use cpal::traits::HostTrait;
        let available = cpal::default_host().default_output_device().is_some();
        Self {
            available,
            halt_generation: AtomicU64::new(0),
        }
    }

    #[cfg(not(feature = "audio-cpal"))]
    pub fn probe() -> Self {
        Self {
            available: false,
            halt_generation: AtomicU64::new(0),
        }
    }
}

impl OutputDevice for CpalOutput {
    fn is_available(&self) -> bool {
        self.available
    }

    #[cfg(feature = "audio-cpal")]
    fn play_blocking(&self, pcm: &[u8]) -> Result<()> {
        use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
        use cpal::SampleFormat;

        if !self.available {
            return Err(HeraldError::NoOutputDevice);
        }
        let start_generation = self.halt_generation.load(Ordering::SeqCst);

        // Decode i16 LE → f32 at the pipeline rate.
        let mono: Vec<f32> = pcm
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect();
        if mono.is_empty() {
            return Ok(());
        }

        let device = cpal::default_host()
            .default_output_device()
            .ok_or(HeraldError::NoOutputDevice)?;
        let supported = device
            .default_output_config()
            .map_err(|e| HeraldError::AudioDevice(e.to_string()))?;
        let device_rate = supported.sample_rate().0;
        let channels = supported.channels() as usize;

        // Resample to the device rate.
        let samples: Arc<Vec<f32>> =
            Arc::new(Resampler::convert_clip(SAMPLE_RATE, device_rate, &mono)?);
        let total = samples.len();
        let cursor = Arc::new(AtomicUsize::new(0));

        let config = cpal::StreamConfig {
            channels: channels as u16,
            sample_rate: cpal::SampleRate(device_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                let samples = Arc::clone(&samples);
                let cursor = Arc::clone(&cursor);
                device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _info| {
                        for frame in data.chunks_mut(channels) {
                            let i = cursor.load(Ordering::Relaxed);
                            let sample = samples.get(i).copied().unwrap_or(0.0);
                            if i < samples.len() {
                                cursor.store(i + 1, Ordering::Relaxed);
                            }
                            for slot in frame {
                                *slot = sample;
                            }
                        }
                    },
                    |err| tracing::error!("output stream error: {err}"),
                    None,
                )
            }
            SampleFormat::I16 => {
                let samples = Arc::clone(&samples);
                let cursor = Arc::clone(&cursor);
                device.build_output_stream(
                    &config,
                    move |data: &mut [i16], _info| {
                        for frame in data.chunks_mut(channels) {
                            let i = cursor.load(Ordering::Relaxed);
                            let sample = samples.get(i).copied().unwrap_or(0.0);
                            if i < samples.len() {
                                cursor.store(i + 1, Ordering::Relaxed);
                            }
                            let value = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
                            for slot in frame {
                                *slot = value;
                            }
                        }
                    },
                    |err| tracing::error!("output stream error: {err}"),
                    None,
                )
            }
            fmt => {
                return Err(HeraldError::AudioStream(format!(
                    "unsupported output sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| HeraldError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| HeraldError::AudioStream(e.to_string()))?;

        // Wait for drain or halt. The stream drops on this thread either way.
        loop {
            if self.halt_generation.load(Ordering::SeqCst) != start_generation {
                return Err(HeraldError::PlaybackHalted);
            }
            if cursor.load(Ordering::Relaxed) >= total {
                std::thread::sleep(TAIL_DRAIN);
                return Ok(());
            }
            std::thread::sleep(DRAIN_POLL);
        }
    }

    #[cfg(not(feature = "audio-cpal"))]
    fn play_blocking(&self, _pcm: &[u8]) -> Result<()> {
        Err(HeraldError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    fn halt(&self) {
        self.halt_generation.fetch_add(1, Ordering::SeqCst);
    }
}
