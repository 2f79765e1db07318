//! Gapless playback of model speech.
//!
//! ## Timing
//!
//! ```text
//! clock ──┐
//!         ▼
//! start_at = max(clock, device_now)      schedule(buffer)
//! clock    = start_at + buffer.duration
//! ```
//!
//! Every scheduled buffer gets a `BufferId` and sits in the active set until
//! its `PlaybackFinished` event arrives or it is stopped by `interrupt()` /
//! `teardown()`. Completion events for ids that are no longer registered are
//! ignored, so each id leaves the set exactly once.
//!
//! The active set is every voice this scheduler has on the device, so both
//! barge-in and teardown silence the device with a single `stop_all`.

pub mod tap;

use std::collections::BTreeMap;

use tracing::{debug, info, trace};

use crate::{
    buffering::frame::{PlaybackBuffer, OUTPUT_SAMPLE_RATE},
    error::{AgentError, Result},
};

/// Identifier handed to the output device for one scheduled buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

/// Output device parameters.
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Rate the speech arrives at and the device is asked to open at (Hz).
    pub sample_rate: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: OUTPUT_SAMPLE_RATE,
        }
    }
}

/// A buffer handed to the device together with its start time.
#[derive(Debug, Clone)]
pub struct Voice {
    pub id: BufferId,
    /// Device time (seconds) at which the first sample must sound.
    pub start_at: f64,
    pub buffer: PlaybackBuffer,
}

/// The speaker side of an audio backend.
///
/// Implementations report completion of each started voice by emitting
/// `SessionEvent::PlaybackFinished(id)`, never for voices removed by `stop_all`.
pub trait OutputDevice {
    /// Current device time in seconds, monotonically non-decreasing.
    fn current_time(&self) -> f64;

    /// Begin playing `voice` at `voice.start_at`.
    fn start(&mut self, voice: Voice) -> Result<()>;

    /// Silence every voice started so far, including voices whose start
    /// time has not been reached. Must not be lost under load.
    fn stop_all(&mut self);

    /// Release the device. Further calls are no-ops.
    fn close(&mut self);
}

/// Time span one buffer occupies on the device clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSpan {
    pub id: BufferId,
    pub start_at: f64,
    pub end_at: f64,
}

/// Outcome of a completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackActivity {
    /// Other buffers are still in flight.
    Playing,
    /// The last in-flight buffer just finished.
    Idle,
    /// The id was not registered (already stopped or finished).
    Unknown,
}

/// Owns the schedule clock and the set of in-flight buffers.
pub struct PlaybackScheduler {
    device: Option<Box<dyn OutputDevice>>,
    next_start: f64,
    active: BTreeMap<BufferId, ScheduledSpan>,
    next_id: u64,
}

impl Default for PlaybackScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackScheduler {
    /// A scheduler with no device attached yet.
    pub fn new() -> Self {
        Self {
            device: None,
            next_start: 0.0,
            active: BTreeMap::new(),
            next_id: 0,
        }
    }

    pub fn attach(&mut self, device: Box<dyn OutputDevice>) {
        if self.device.is_some() {
            self.teardown();
        }
        self.device = Some(device);
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// Queue `buffer` directly after everything already scheduled.
    ///
    /// # Errors
    /// `AgentError::DeviceUnavailable` when no device is attached, or whatever
    /// the device reports when it cannot accept the voice.
    pub fn schedule(&mut self, buffer: PlaybackBuffer) -> Result<ScheduledSpan> {
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| AgentError::DeviceUnavailable("output device is closed".into()))?;

        let start_at = self.next_start.max(device.current_time());
        let end_at = start_at + buffer.duration_secs();
        let id = BufferId(self.next_id);

        device.start(Voice {
            id,
            start_at,
            buffer,
        })?;

        self.next_id += 1;
        self.next_start = end_at;
        let span = ScheduledSpan {
            id,
            start_at,
            end_at,
        };
        self.active.insert(id, span);
        trace!(id = id.0, start_at, end_at, "buffer scheduled");
        Ok(span)
    }

    /// Record the natural end of a buffer.
    pub fn complete(&mut self, id: BufferId) -> PlaybackActivity {
        if self.active.remove(&id).is_none() {
            trace!(id = id.0, "completion for unregistered buffer ignored");
            return PlaybackActivity::Unknown;
        }
        if self.active.is_empty() {
            debug!("playback idle");
            PlaybackActivity::Idle
        } else {
            PlaybackActivity::Playing
        }
    }

    /// Barge-in: stop everything in flight and restart the clock.
    pub fn interrupt(&mut self) {
        if let Some(device) = self.device.as_mut() {
            device.stop_all();
        }
        if !self.active.is_empty() {
            debug!(stopped = self.active.len(), "playback interrupted");
        }
        self.active.clear();
        self.next_start = 0.0;
    }

    /// Stop all buffers and release the device.
    pub fn teardown(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.stop_all();
            device.close();
            info!("output device released");
        }
        self.active.clear();
        self.next_start = 0.0;
    }

    /// The next free start time.
    pub fn schedule_clock(&self) -> f64 {
        self.next_start
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.teardown();
    }
}
