//! Cuts an arbitrary-length sample stream into fixed-size capture blocks.

use super::frame::AudioFrame;

/// Accumulates samples and yields consecutive blocks of exactly `block_size`.
///
/// Leftover samples stay buffered until the next push; nothing is dropped or
/// reordered.
#[derive(Debug)]
pub struct FrameAssembler {
    block_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(block_size: usize, sample_rate: u32) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            sample_rate,
            pending: Vec::with_capacity(block_size * 2),
        }
    }

    /// Append samples and call `emit` once for every completed block, in order.
    pub fn push(&mut self, samples: &[f32], mut emit: impl FnMut(AudioFrame)) {
        self.pending.extend_from_slice(samples);
        let mut offset = 0;
        while self.pending.len() - offset >= self.block_size {
            let block = self.pending[offset..offset + self.block_size].to_vec();
            emit(AudioFrame::new(block, self.sample_rate));
            offset += self.block_size;
        }
        if offset > 0 {
            self.pending.drain(..offset);
        }
    }

    /// Samples waiting for the next full block.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_only_full_blocks() {
        let mut asm = FrameAssembler::new(4, 16_000);
        let mut frames = Vec::new();
        asm.push(&[0.1, 0.2, 0.3], |f| frames.push(f));
        assert!(frames.is_empty());
        assert_eq!(asm.pending(), 3);

        asm.push(&[0.4, 0.5], |f| frames.push(f));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].samples, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(asm.pending(), 1);
    }

    #[test]
    fn large_push_yields_blocks_in_order() {
        let mut asm = FrameAssembler::new(3, 16_000);
        let input: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let mut frames = Vec::new();
        asm.push(&input, |f| frames.push(f));

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].samples, vec![0.0, 1.0, 2.0]);
        assert_eq!(frames[2].samples, vec![6.0, 7.0, 8.0]);
        assert_eq!(asm.pending(), 1);
        assert!(frames.iter().all(|f| f.sample_rate == 16_000));
    }

    #[test]
    fn zero_block_size_is_clamped() {
        let asm = FrameAssembler::new(0, 16_000);
        assert_eq!(asm.block_size(), 1);
    }
}
