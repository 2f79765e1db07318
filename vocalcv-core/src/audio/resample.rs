//! Microphone rate conversion using a rubato `FastFixedIn` resampler.
//!
//! The voice service wants 16 kHz mono. Most devices open at 16 kHz when
//! asked; the rest deliver their native rate (commonly 44.1 or 48 kHz) and
//! `InputResampler` converts on the capture framing thread, where allocation
//! is allowed. Equal rates are a plain copy with no rubato session at all.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{error, info};

use crate::error::{AgentError, Result};

/// Input frames handed to rubato per call.
pub const RESAMPLE_CHUNK: usize = 1024;

/// Converts f32 mono audio from the device rate to the capture rate.
pub struct InputResampler {
    /// `None` in passthrough mode.
    resampler: Option<FastFixedIn<f32>>,
    /// Partial input carried between calls.
    input_buf: Vec<f32>,
    chunk_size: usize,
    /// Pre-allocated `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl InputResampler {
    /// # Errors
    /// `AgentError::AudioStream` if either rate is zero or rubato refuses the ratio.
    pub fn new(device_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if device_rate == 0 || target_rate == 0 {
            return Err(AgentError::AudioStream(format!(
                "invalid resampling rates {device_rate} -> {target_rate}"
            )));
        }
        if device_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = target_rate as f64 / device_rate as f64;
        let resampler = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
            .map_err(|e| AgentError::AudioStream(format!("resampler init: {e}")))?;
        let output_buf = vec![vec![0f32; resampler.output_frames_max()]; 1];

        info!(device_rate, target_rate, chunk_size, "microphone resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::with_capacity(chunk_size * 2),
            chunk_size,
            output_buf,
        })
    }

    /// Append converted samples for `samples` to `out`.
    ///
    /// Input is buffered until a full rubato chunk is available; the
    /// remainder waits for the next call.
    pub fn process_into(&mut self, samples: &[f32], out: &mut Vec<f32>) {
        let Some(ref mut resampler) = self.resampler else {
            out.extend_from_slice(samples);
            return;
        };

        self.input_buf.extend_from_slice(samples);
        let mut consumed = 0;
        while self.input_buf.len() - consumed >= self.chunk_size {
            let input = &self.input_buf[consumed..consumed + self.chunk_size];
            match resampler.process_into_buffer(&[input], &mut self.output_buf, None) {
                Ok((_used, produced)) => out.extend_from_slice(&self.output_buf[0][..produced]),
                Err(e) => error!("resampler process error: {e}"),
            }
            consumed += self.chunk_size;
        }
        if consumed > 0 {
            self.input_buf.drain(..consumed);
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_rates_copy_input() {
        let mut rs = InputResampler::new(16_000, 16_000, RESAMPLE_CHUNK).unwrap();
        assert!(rs.is_passthrough());
        let samples: Vec<f32> = (0..300).map(|i| i as f32 * 0.001).collect();
        let mut out = vec![9.0];
        rs.process_into(&samples, &mut out);
        assert_eq!(out.len(), 301);
        assert_eq!(&out[1..], samples.as_slice());
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(InputResampler::new(0, 16_000, RESAMPLE_CHUNK).is_err());
    }

    #[test]
    fn downsamples_48k_to_roughly_a_third() {
        let mut rs = InputResampler::new(48_000, 16_000, 960).unwrap();
        let mut out = Vec::new();
        rs.process_into(&vec![0.0f32; 960 * 3], &mut out);
        let expected = 960usize;
        assert!(
            (out.len() as isize - expected as isize).unsigned_abs() <= 30,
            "output len={} expected≈{}",
            out.len(),
            expected
        );
    }

    #[test]
    fn short_input_waits_for_a_full_chunk() {
        let mut rs = InputResampler::new(44_100, 16_000, 1024).unwrap();
        let mut out = Vec::new();
        rs.process_into(&vec![0.0f32; 600], &mut out);
        assert!(out.is_empty());
        rs.process_into(&vec![0.0f32; 600], &mut out);
        assert!(!out.is_empty());
    }
}
