//! Audio blocks exchanged between capture, codec, transport and playback.

/// Sample rate the voice service expects for microphone audio (Hz).
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of the speech the voice service sends back (Hz).
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Samples per capture block in the reference configuration.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// One capture block of mono samples in [-1.0, 1.0].
///
/// Built by the capture pipeline and consumed immediately by the codec.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// 16-bit little-endian PCM bytes tagged with a MIME-style format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    pub data: Vec<u8>,
    /// e.g. `audio/pcm;rate=16000`.
    pub mime_type: String,
}

impl EncodedChunk {
    /// Number of 16-bit samples carried.
    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }
}

/// Decoded model speech, ready to be scheduled on the output device.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Playback length in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_second_buffer_duration() {
        let buf = PlaybackBuffer::new(vec![0.0; 12_000], OUTPUT_SAMPLE_RATE);
        assert!((buf.duration_secs() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn zero_rate_buffer_has_no_duration() {
        let buf = PlaybackBuffer::new(vec![0.0; 10], 0);
        assert_eq!(buf.duration_secs(), 0.0);
    }
}
