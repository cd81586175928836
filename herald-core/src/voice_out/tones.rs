//! Alert tone synthesis for blocking narrations.
//!
//! Each block reason gets a distinct audio signature so the listener can
//! tell a permission request from a question from an idle prompt by ear
//! alone. Tones are generated once at startup and cached as 16-bit PCM.

use std::collections::HashMap;

use crate::events::BlockReason;

/// Linear fade applied to each tone segment to avoid clicks.
const FADE_DURATION_SECS: f32 = 0.005;

/// Tone spec: `(frequency_hz, duration_secs)`; frequency 0 means silence.
type ToneSpec = &'static [(f32, f32)];

/// Urgent double-beep, ≈0.60 s.
const PERMISSION_TONES: ToneSpec = &[
    (880.0, 0.12),
    (0.0, 0.04),
    (1320.0, 0.12),
    (0.0, 0.04),
    (880.0, 0.12),
    (0.0, 0.04),
    (1320.0, 0.12),
];

/// Rising two-tone, ≈0.35 s.
const QUESTION_TONES: ToneSpec = &[(660.0, 0.15), (0.0, 0.05), (880.0, 0.15)];

/// Gentle low pair, ≈0.40 s.
const IDLE_TONES: ToneSpec = &[(440.0, 0.20), (0.0, 0.05), (550.0, 0.15)];

/// Standard two-tone, ≈0.35 s.
const DEFAULT_TONES: ToneSpec = &[(880.0, 0.15), (0.0, 0.05), (1320.0, 0.15)];

fn spec_for(reason: Option<BlockReason>) -> ToneSpec {
    match reason {
        Some(BlockReason::PermissionPrompt) => PERMISSION_TONES,
        Some(BlockReason::Question) => QUESTION_TONES,
        Some(BlockReason::IdlePrompt) => IDLE_TONES,
        None => DEFAULT_TONES,
    }
}

/// Generate the alert tone for a block reason as f32 samples in [-1, 1].
pub fn generate_alert(reason: Option<BlockReason>, sample_rate: u32) -> Vec<f32> {
    let spec = spec_for(reason);
    let mut samples = Vec::new();
    for &(freq, duration) in spec {
        let n = (duration * sample_rate as f32) as usize;
        if freq == 0.0 {
            samples.extend(std::iter::repeat(0.0f32).take(n));
        } else {
            let mut segment = generate_sine(freq, n, sample_rate);
            apply_fade(&mut segment, (FADE_DURATION_SECS * sample_rate as f32) as usize);
            samples.extend(segment);
        }
    }
    samples
}

/// Generate the alert tone as 16-bit signed little-endian PCM bytes.
pub fn generate_alert_pcm16(reason: Option<BlockReason>, sample_rate: u32) -> Vec<u8> {
    pcm16_bytes(&generate_alert(reason, sample_rate))
}

/// Convert f32 samples in [-1, 1] to i16 LE bytes.
pub fn pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let clamped = (s * 32767.0).clamp(-32768.0, 32767.0) as i16;
        out.extend_from_slice(&clamped.to_le_bytes());
    }
    out
}

/// Pre-rendered PCM tones, one per block reason plus the default.
pub struct AlertTones {
    tones: HashMap<Option<BlockReason>, Vec<u8>>,
}

impl AlertTones {
    pub fn generate(sample_rate: u32) -> Self {
        let mut tones = HashMap::new();
        for reason in [
            None,
            Some(BlockReason::PermissionPrompt),
            Some(BlockReason::Question),
            Some(BlockReason::IdlePrompt),
        ] {
            tones.insert(reason, generate_alert_pcm16(reason, sample_rate));
        }
        Self { tones }
    }

    /// The cached tone for a reason, defaulting to the standard alert.
    pub fn get(&self, reason: Option<BlockReason>) -> &[u8] {
        self.tones
            .get(&reason)
            .or_else(|| self.tones.get(&None))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn generate_sine(freq: f32, n_samples: usize, sample_rate: u32) -> Vec<f32> {
    (0..n_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * freq * t).sin()
        })
        .collect()
}

/// Linear fade-in and fade-out over `fade_samples` at each end.
fn apply_fade(samples: &mut [f32], fade_samples: usize) {
    if fade_samples == 0 || samples.len() < 2 * fade_samples {
        return;
    }
    let len = samples.len();
    for i in 0..fade_samples {
        let gain = i as f32 / fade_samples as f32;
        samples[i] *= gain;
        samples[len - 1 - i] *= gain;
    }
}
