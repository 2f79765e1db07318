//! 16-bit little-endian PCM conversion.
//!
//! Outgoing microphone blocks are quantized with `sample * 32767` (truncated
//! toward zero after clamping), incoming speech is mapped back with
//! `value / 32768`. The pair is lossy by at most a couple of quantization steps.

use crate::buffering::frame::{AudioFrame, EncodedChunk, PlaybackBuffer};
use crate::error::{AgentError, Result};

/// Tag the service expects on microphone chunks.
pub const FORMAT_TAG_INPUT: &str = "audio/pcm;rate=16000";

/// MIME-style tag for a raw PCM stream at `rate` Hz.
pub fn pcm_mime(rate: u32) -> String {
    format!("audio/pcm;rate={rate}")
}

/// Quantize one capture block into little-endian i16 bytes.
pub fn encode(frame: &AudioFrame) -> EncodedChunk {
    let mut data = Vec::with_capacity(frame.samples.len() * 2);
    for &sample in &frame.samples {
        // NaN clamps to NaN; treat it as silence.
        let clamped = if sample.is_nan() {
            0.0
        } else {
            sample.clamp(-1.0, 1.0)
        };
        let value = (clamped * 32767.0) as i16;
        data.extend_from_slice(&value.to_le_bytes());
    }
    EncodedChunk {
        data,
        mime_type: pcm_mime(frame.sample_rate),
    }
}

/// Reinterpret little-endian i16 bytes as a mono buffer at `sample_rate`.
///
/// # Errors
/// `AgentError::MalformedChunk` when `bytes` has an odd length.
pub fn decode(bytes: &[u8], sample_rate: u32) -> Result<PlaybackBuffer> {
    if bytes.len() % 2 != 0 {
        return Err(AgentError::MalformedChunk { len: bytes.len() });
    }
    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect();
    Ok(PlaybackBuffer::new(samples, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::frame::{INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
    use approx::assert_abs_diff_eq;

    fn frame(samples: Vec<f32>) -> AudioFrame {
        AudioFrame::new(samples, INPUT_SAMPLE_RATE)
    }

    #[test]
    fn encode_packs_little_endian() {
        let chunk = encode(&frame(vec![1.0, -1.0, 0.0]));
        assert_eq!(chunk.data, vec![0xFF, 0x7F, 0x01, 0x80, 0x00, 0x00]);
        assert_eq!(chunk.mime_type, FORMAT_TAG_INPUT);
        assert_eq!(chunk.sample_count(), 3);
    }

    #[test]
    fn encode_clamps_out_of_range_input() {
        let chunk = encode(&frame(vec![3.5, -7.0, f32::NAN]));
        let values: Vec<i16> = chunk
            .data
            .chunks_exact(2)
            .map(|p| i16::from_le_bytes([p[0], p[1]]))
            .collect();
        assert_eq!(values, vec![32767, -32767, 0]);
    }

    #[test]
    fn encode_truncates_toward_zero() {
        // 0.5 * 32767 = 16383.5 → 16383
        let chunk = encode(&frame(vec![0.5, -0.5]));
        assert_eq!(i16::from_le_bytes([chunk.data[0], chunk.data[1]]), 16383);
        assert_eq!(i16::from_le_bytes([chunk.data[2], chunk.data[3]]), -16383);
    }

    #[test]
    fn decode_rejects_odd_length() {
        let err = decode(&[0x00, 0x01, 0x02], OUTPUT_SAMPLE_RATE).unwrap_err();
        assert!(matches!(err, AgentError::MalformedChunk { len: 3 }));
    }

    #[test]
    fn decode_maps_extremes() {
        let buf = decode(&[0x00, 0x80, 0xFF, 0x7F], OUTPUT_SAMPLE_RATE).unwrap();
        assert_eq!(buf.sample_rate, OUTPUT_SAMPLE_RATE);
        assert_eq!(buf.samples[0], -1.0);
        assert!(buf.samples[1] < 1.0);
        assert_abs_diff_eq!(buf.samples[1], 32767.0 / 32768.0);
    }

    #[test]
    fn decode_empty_is_empty_buffer() {
        let buf = decode(&[], OUTPUT_SAMPLE_RATE).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn round_trip_within_quantization_step() {
        let samples: Vec<f32> = (0..4096)
            .map(|i| ((i as f32) * 0.013).sin() * 0.97)
            .chain([1.0, -1.0, 0.0, 1e-6, -1e-6])
            .collect();
        let decoded = decode(&encode(&frame(samples.clone())).data, INPUT_SAMPLE_RATE).unwrap();
        assert_eq!(decoded.samples.len(), samples.len());
        for (orig, back) in samples.iter().zip(&decoded.samples) {
            // One step of truncation plus the 32767/32768 scale mismatch.
            assert!((orig - back).abs() <= 2.0 / 32768.0, "{orig} vs {back}");
        }
    }
}
