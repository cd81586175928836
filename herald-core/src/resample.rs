//! Sample-rate conversion built on rubato.
//!
//! Herald's pipeline is fixed at 16 kHz but the devices are not, and the
//! two directions have different shapes: voice-out converts a complete
//! narration clip to the playback device's rate in one go, while capture
//! feeds blocks off the microphone ring as they arrive. [`convert_clip`]
//! serves the first, [`Resampler::feed`] + [`Resampler::finish`] the
//! second. Matching rates short-circuit to a plain copy.
//!
//! [`convert_clip`]: Resampler::convert_clip

use rubato::{FastFixedIn, PolynomialDegree, Resampler as _};
use tracing::error;

use crate::error::{HeraldError, Result};

/// Input frames handed to rubato per conversion pass.
const FRAME_LEN: usize = 512;

/// Mono f32 rate converter.
pub struct Resampler {
    /// `None` when the rates match and samples pass through untouched.
    inner: Option<FastFixedIn<f32>>,
    ratio: f64,
    /// Staging frame for rubato; `fill` marks the occupied prefix.
    frame: Vec<f32>,
    fill: usize,
    /// Rubato's output buffer, `[1][output_frames_max]`.
    scratch: Vec<Vec<f32>>,
}

impl Resampler {
    pub fn new(input_rate: u32, output_rate: u32) -> Result<Self> {
        let ratio = f64::from(output_rate) / f64::from(input_rate);
        if input_rate == output_rate {
            return Ok(Self {
                inner: None,
                ratio,
                frame: Vec::new(),
                fill: 0,
                scratch: Vec::new(),
            });
        }

        let inner = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, FRAME_LEN, 1)
            .map_err(|e| HeraldError::AudioDevice(format!("resampler init failed: {e}")))?;
        let max_out = inner.output_frames_max();

        Ok(Self {
            inner: Some(inner),
            ratio,
            frame: vec![0.0; FRAME_LEN],
            fill: 0,
            scratch: vec![vec![0.0; max_out]],
        })
    }

    /// Convert a complete clip, padding the tail so nothing is lost, and
    /// trim the result to the clip's nominal converted length.
    pub fn convert_clip(input_rate: u32, output_rate: u32, samples: &[f32]) -> Result<Vec<f32>> {
        let mut resampler = Self::new(input_rate, output_rate)?;
        let nominal = (samples.len() as f64 * resampler.ratio).round() as usize;
        let mut out = Vec::with_capacity(nominal + FRAME_LEN);
        resampler.feed(samples, &mut out);
        resampler.finish(&mut out);
        out.truncate(nominal);
        Ok(out)
    }

    /// Append converted output for `samples` to `out`.
    ///
    /// Input is staged into fixed frames; whatever does not fill the last
    /// frame stays staged for the next call (or for [`Resampler::finish`]).
    pub fn feed(&mut self, samples: &[f32], out: &mut Vec<f32>) {
        let Some(inner) = self.inner.as_mut() else {
            out.extend_from_slice(samples);
            return;
        };

        let mut rest = samples;
        while !rest.is_empty() {
            let take = (FRAME_LEN - self.fill).min(rest.len());
            self.frame[self.fill..self.fill + take].copy_from_slice(&rest[..take]);
            self.fill += take;
            rest = &rest[take..];

            if self.fill == FRAME_LEN {
                run_frame(inner, &self.frame, &mut self.scratch, out);
                self.fill = 0;
            }
        }
    }

    /// Flush the staged partial frame, zero-padded, into `out`.
    pub fn finish(&mut self, out: &mut Vec<f32>) {
        let Some(inner) = self.inner.as_mut() else {
            return;
        };
        if self.fill == 0 {
            return;
        }
        self.frame[self.fill..].fill(0.0);
        run_frame(inner, &self.frame, &mut self.scratch, out);
        self.fill = 0;
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }
}

fn run_frame(
    inner: &mut FastFixedIn<f32>,
    frame: &[f32],
    scratch: &mut [Vec<f32>],
    out: &mut Vec<f32>,
) {
    match inner.process_into_buffer(&[frame], scratch, None) {
        Ok((_consumed, produced)) => out.extend_from_slice(&scratch[0][..produced]),
        Err(e) => error!("resampler frame failed: {e}"),
    }
}
