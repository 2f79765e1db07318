//! Non-destructive read point on the output signal.
//!
//! The output callback pushes every rendered block here with `try_lock`; when
//! a reader holds the lock the block is simply not recorded, so the audio
//! thread never waits on the visualizer.

use parking_lot::Mutex;

/// Default number of recent output samples retained.
pub const DEFAULT_TAP_CAPACITY: usize = 2048;

struct TapRing {
    samples: Vec<f32>,
    write: usize,
}

/// Circular record of the most recent output samples.
pub struct AnalysisTap {
    ring: Mutex<TapRing>,
}

impl Default for AnalysisTap {
    fn default() -> Self {
        Self::new(DEFAULT_TAP_CAPACITY)
    }
}

impl AnalysisTap {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(TapRing {
                samples: vec![0.0; capacity.max(1)],
                write: 0,
            }),
        }
    }

    /// Record rendered samples. Returns `false` if the block was skipped.
    pub fn push(&self, samples: &[f32]) -> bool {
        let Some(mut ring) = self.ring.try_lock() else {
            return false;
        };
        let cap = ring.samples.len();
        for &s in samples {
            let w = ring.write;
            ring.samples[w] = s;
            ring.write = (w + 1) % cap;
        }
        true
    }

    /// Copy the newest `out.len()` samples into `out`, oldest first.
    ///
    /// When `out` is longer than the tap, the leading part is zero-filled.
    pub fn snapshot_into(&self, out: &mut [f32]) {
        let ring = self.ring.lock();
        let cap = ring.samples.len();
        let take = out.len().min(cap);
        let lead = out.len() - take;
        out[..lead].fill(0.0);
        let start = (ring.write + cap - take) % cap;
        for (i, slot) in out[lead..].iter_mut().enumerate() {
            *slot = ring.samples[(start + i) % cap];
        }
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        let mut ring = self.ring.lock();
        ring.samples.fill(0.0);
        ring.write = 0;
    }
}
