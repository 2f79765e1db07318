//! cpal speaker output with sample-accurate voice start times.
//!
//! ```text
//! control thread ──VoiceQueue──► voice ring ──► Mixer (output callback)
//!        │ stop_all                                 │ finished / stopped
//!        └──► stop generation (atomic) ◄── read ────┤
//!                                                   ▼
//!                                   retired ring ──► reaper thread
//!                                                    (PlaybackFinished, frees samples)
//! ```
//!
//! Each voice remembers the stop generation current when it was started.
//! `stop_all` bumps the generation, so a stop can never be lost to a full
//! ring and also catches voices still waiting in the ring. The callback never
//! frees sample buffers or sends events itself unless the retired ring
//! overflows.
//!
//! Speech arrives at 24 kHz. If the device will not open at that rate the
//! callback steps through each voice at `voice_rate / device_rate` with
//! linear interpolation.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};
use ringbuf::{traits::Split, HeapCons, HeapProd, HeapRb};
use tracing::{debug, error, info, warn};

use super::cpal_backend::classify_device_error;
use crate::{
    buffering::{Consumer, Producer},
    error::{AgentError, Result},
    playback::{tap::AnalysisTap, BufferId, OutputDevice, PlaybackConfig, Voice},
    session::events::{SessionEvent, SessionEventSink},
};

/// Voices the callback can absorb between two renders (about 160 s of
/// typical 40 ms speech chunks).
const VOICE_QUEUE_CAPACITY: usize = 4096;

/// Voices mixed at once before the callback has to grow its vector.
const VOICE_CAPACITY: usize = 1024;

/// Finished or stopped voices waiting for the reaper.
const RETIRED_CAPACITY: usize = 4096;

/// Pre-sized mix buffer, in device frames.
const MIX_CAPACITY: usize = 8192;

const REAP_INTERVAL: Duration = Duration::from_millis(5);

struct MixVoice {
    id: BufferId,
    samples: Vec<f32>,
    start_frame: u64,
    /// Source samples advanced per device frame.
    step: f64,
    pos: f64,
    /// Stop generation at start time.
    generation: u64,
}

impl MixVoice {
    fn finished(&self) -> bool {
        self.pos as usize >= self.samples.len()
    }

    /// Add this voice into `mix`, where `mix[0]` is device frame `base`.
    fn render_into(&mut self, mix: &mut [f32], base: u64) {
        for (f, slot) in mix.iter_mut().enumerate() {
            if base + (f as u64) < self.start_frame {
                continue;
            }
            let idx = self.pos as usize;
            let Some(&a) = self.samples.get(idx) else {
                break;
            };
            let b = self.samples.get(idx + 1).copied().unwrap_or(a);
            let frac = (self.pos - idx as f64) as f32;
            *slot += a + (b - a) * frac;
            self.pos += self.step;
        }
    }
}

/// A voice leaving the mixer. Only finished voices are reported.
struct Retired {
    voice: MixVoice,
    finished: bool,
}

/// Control-thread half: hands voices to the callback.
struct VoiceQueue {
    voices: HeapProd<MixVoice>,
    generation: Arc<AtomicU64>,
    sample_rate: u32,
}

impl VoiceQueue {
    fn push(&mut self, voice: Voice) -> Result<()> {
        let rate = self.sample_rate as f64;
        let mix_voice = MixVoice {
            id: voice.id,
            start_frame: (voice.start_at * rate).round() as u64,
            step: voice.buffer.sample_rate as f64 / rate,
            samples: voice.buffer.samples,
            pos: 0.0,
            generation: self.generation.load(Ordering::Acquire),
        };
        self.voices
            .try_push(mix_voice)
            .map_err(|_| AgentError::PlaybackQueueFull)
    }

    fn stop_all(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

/// Callback half: owns the playing voices.
struct Mixer {
    incoming: HeapCons<MixVoice>,
    voices: Vec<MixVoice>,
    generation: Arc<AtomicU64>,
    retired: HeapProd<Retired>,
    /// Used only when the retired ring is full.
    overflow: SessionEventSink,
    mix: Vec<f32>,
}

impl Mixer {
    /// Mix `frames` device frames starting at device frame `base`.
    fn render(&mut self, frames: usize, base: u64) -> &[f32] {
        let generation = self.generation.load(Ordering::Acquire);
        while let Some(voice) = self.incoming.try_pop() {
            if voice.generation < generation {
                self.retire(voice, false);
            } else {
                self.voices.push(voice);
            }
        }
        self.retire_where(|v| v.generation < generation, false);

        self.mix.clear();
        self.mix.resize(frames, 0.0);
        for voice in self.voices.iter_mut() {
            voice.render_into(&mut self.mix, base);
        }
        self.retire_where(MixVoice::finished, true);
        &self.mix
    }

    fn retire_where(&mut self, pred: impl Fn(&MixVoice) -> bool, finished: bool) {
        let mut i = 0;
        while i < self.voices.len() {
            if pred(&self.voices[i]) {
                let voice = self.voices.swap_remove(i);
                self.retire(voice, finished);
            } else {
                i += 1;
            }
        }
    }

    fn retire(&mut self, voice: MixVoice, finished: bool) {
        if let Err(Retired { voice, finished }) = self.retired.try_push(Retired { voice, finished })
        {
            // Reaper is behind: report inline rather than lose a completion.
            if finished {
                self.overflow.emit(SessionEvent::PlaybackFinished(voice.id));
            }
        }
    }
}

fn voice_channel(sample_rate: u32, events: SessionEventSink) -> (VoiceQueue, Mixer, HeapCons<Retired>) {
    let (voice_tx, voice_rx) = HeapRb::<MixVoice>::new(VOICE_QUEUE_CAPACITY).split();
    let (retired_tx, retired_rx) = HeapRb::<Retired>::new(RETIRED_CAPACITY).split();
    let generation = Arc::new(AtomicU64::new(0));
    let queue = VoiceQueue {
        voices: voice_tx,
        generation: Arc::clone(&generation),
        sample_rate,
    };
    let mixer = Mixer {
        incoming: voice_rx,
        voices: Vec::with_capacity(VOICE_CAPACITY),
        generation,
        retired: retired_tx,
        overflow: events,
        mix: Vec::with_capacity(MIX_CAPACITY),
    };
    (queue, mixer, retired_rx)
}

/// Report finished voices and drop their samples. Returns how many were
/// reported.
fn drain_retired(retired: &mut HeapCons<Retired>, events: &SessionEventSink) -> usize {
    let mut reported = 0;
    while let Some(Retired { voice, finished }) = retired.try_pop() {
        if finished {
            events.emit(SessionEvent::PlaybackFinished(voice.id));
            reported += 1;
        }
    }
    reported
}

fn run_reaper(mut retired: HeapCons<Retired>, running: Arc<AtomicBool>, events: SessionEventSink) {
    let mut reported = 0usize;
    while running.load(Ordering::Relaxed) {
        reported += drain_retired(&mut retired, &events);
        thread::sleep(REAP_INTERVAL);
    }
    debug!(reported, "playback reaper exiting");
}

/// Open speaker stream plus the control side of its voice ring.
pub struct CpalOutput {
    stream: Option<Stream>,
    queue: VoiceQueue,
    frames_rendered: Arc<AtomicU64>,
    sample_rate: u32,
    reaper_running: Arc<AtomicBool>,
    reaper: Option<JoinHandle<()>>,
}

impl CpalOutput {
    /// Open the default output device, preferring `config.sample_rate`.
    pub fn open(
        config: &PlaybackConfig,
        tap: Arc<AnalysisTap>,
        events: SessionEventSink,
    ) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AgentError::DeviceUnavailable("no output device found".into()))?;
        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening output device"
        );

        let ranges: Vec<_> = device
            .supported_output_configs()
            .map_err(|e| classify_device_error(e.to_string()))?
            .filter(|r| r.sample_format() == SampleFormat::F32)
            .collect();
        let wanted = config.sample_rate;
        let supported = ranges
            .iter()
            .find(|r| r.min_sample_rate().0 <= wanted && r.max_sample_rate().0 >= wanted)
            .map(|r| r.clone().with_sample_rate(SampleRate(wanted)))
            .or_else(|| ranges.first().map(|r| r.clone().with_max_sample_rate()))
            .ok_or_else(|| {
                AgentError::DeviceUnavailable("output device has no f32 configuration".into())
            })?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels().max(1) as usize;
        let stream_config = StreamConfig {
            channels: supported.channels(),
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        if sample_rate != wanted {
            warn!(wanted, sample_rate, "output device rate differs, interpolating");
        }
        info!(sample_rate, channels, "output config selected");

        let (queue, mut mixer, retired) = voice_channel(sample_rate, events.clone());
        let frames_rendered = Arc::new(AtomicU64::new(0));
        let clock = Arc::clone(&frames_rendered);

        let reaper_running = Arc::new(AtomicBool::new(true));
        let running = Arc::clone(&reaper_running);
        let reaper_events = events.clone();
        let reaper = thread::Builder::new()
            .name("vocalcv-playback".into())
            .spawn(move || run_reaper(retired, running, reaper_events))?;

        let built = device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info| {
                let frames = data.len() / channels;
                let base = clock.load(Ordering::Relaxed);
                let mix = mixer.render(frames, base);
                for (frame, &sample) in data.chunks_mut(channels).zip(mix.iter()) {
                    frame.fill(sample.clamp(-1.0, 1.0));
                }
                tap.push(mix);
                clock.fetch_add(frames as u64, Ordering::Relaxed);
            },
            move |err| {
                error!("output stream error: {err}");
                events.emit(SessionEvent::DeviceFailed(err.to_string()));
            },
            None,
        );

        let mut output = Self {
            stream: None,
            queue,
            frames_rendered,
            sample_rate,
            reaper_running,
            reaper: Some(reaper),
        };
        let stream = built.map_err(|e| classify_device_error(e.to_string()))?;
        stream
            .play()
            .map_err(|e| classify_device_error(e.to_string()))?;
        output.stream = Some(stream);
        Ok(output)
    }
}

impl OutputDevice for CpalOutput {
    fn current_time(&self) -> f64 {
        self.frames_rendered.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }

    fn start(&mut self, voice: Voice) -> Result<()> {
        if self.stream.is_none() {
            return Err(AgentError::DeviceUnavailable("output device is closed".into()));
        }
        self.queue.push(voice)
    }

    fn stop_all(&mut self) {
        self.queue.stop_all();
    }

    fn close(&mut self) {
        // Dropping the stream halts the callback and releases the device.
        self.stream = None;
        self.reaper_running.store(false, Ordering::Relaxed);
        if let Some(reaper) = self.reaper.take() {
            if reaper.join().is_err() {
                error!("playback reaper panicked");
            }
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{buffering::frame::PlaybackBuffer, session::events::ControlMessage};
    use crossbeam_channel::Receiver;

    fn mix_voice(samples: Vec<f32>, start_frame: u64, step: f64) -> MixVoice {
        MixVoice {
            id: BufferId(0),
            samples,
            start_frame,
            step,
            pos: 0.0,
            generation: 0,
        }
    }

    fn channel() -> (VoiceQueue, Mixer, HeapCons<Retired>, SessionEventSink, Receiver<ControlMessage>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let sink = SessionEventSink::new(1, tx);
        let (queue, mixer, retired) = voice_channel(24_000, sink.clone());
        (queue, mixer, retired, sink, rx)
    }

    fn voice(id: u64, start_at: f64, len: usize) -> Voice {
        Voice {
            id: BufferId(id),
            start_at,
            buffer: PlaybackBuffer::new(vec![0.25; len], 24_000),
        }
    }

    fn finished_ids(rx: &Receiver<ControlMessage>) -> Vec<BufferId> {
        rx.try_iter()
            .filter_map(|msg| match msg {
                ControlMessage::Session {
                    event: SessionEvent::PlaybackFinished(id),
                    ..
                } => Some(id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn voice_waits_for_its_start_frame() {
        let mut v = mix_voice(vec![0.5, 0.5], 2, 1.0);
        let mut mix = vec![0.0; 4];
        v.render_into(&mut mix, 0);
        assert_eq!(mix, vec![0.0, 0.0, 0.5, 0.5]);
        assert!(v.finished());
    }

    #[test]
    fn voice_continues_across_callbacks() {
        let mut v = mix_voice(vec![0.1, 0.2, 0.3], 0, 1.0);
        let mut first = vec![0.0; 2];
        v.render_into(&mut first, 0);
        assert!(!v.finished());
        let mut second = vec![0.0; 2];
        v.render_into(&mut second, 2);
        assert_eq!(second, vec![0.3, 0.0]);
        assert!(v.finished());
    }

    #[test]
    fn half_step_interpolates() {
        let mut v = mix_voice(vec![0.0, 1.0], 0, 0.5);
        let mut mix = vec![0.0; 3];
        v.render_into(&mut mix, 0);
        assert_eq!(mix, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn finished_voices_are_reported_by_the_reaper() {
        let (mut queue, mut mixer, mut retired, sink, rx) = channel();
        queue.push(voice(3, 0.0, 4)).unwrap();
        queue.push(voice(4, 0.0, 100)).unwrap();

        let mix = mixer.render(8, 0);
        assert_eq!(mix[..4], [0.5; 4]);
        assert_eq!(mix[4..], [0.25; 4]);
        // Nothing is sent from the callback itself.
        assert!(finished_ids(&rx).is_empty());

        assert_eq!(drain_retired(&mut retired, &sink), 1);
        assert_eq!(finished_ids(&rx), vec![BufferId(3)]);
    }

    #[test]
    fn stop_all_silences_started_and_queued_voices() {
        let (mut queue, mut mixer, mut retired, sink, rx) = channel();
        for id in 0..300 {
            queue.push(voice(id, id as f64 * 0.04, 960)).unwrap();
        }
        mixer.render(64, 0);
        // More speech still sitting in the ring when barge-in happens.
        for id in 300..400 {
            queue.push(voice(id, id as f64 * 0.04, 960)).unwrap();
        }

        queue.stop_all();
        let mix = mixer.render(64, 64);
        assert!(mix.iter().all(|s| *s == 0.0));
        assert!(mixer.voices.is_empty());

        // Stopped voices are freed without a completion event.
        assert_eq!(drain_retired(&mut retired, &sink), 0);
        assert!(finished_ids(&rx).is_empty());

        // Speech after the stop plays normally.
        queue.push(voice(400, 0.0, 960)).unwrap();
        let mix = mixer.render(64, 128);
        assert!(mix.iter().all(|s| *s == 0.25));
    }

    #[test]
    fn full_voice_ring_refuses_without_blocking() {
        let (mut queue, mut mixer, _retired, _sink, _rx) = channel();
        for id in 0..VOICE_QUEUE_CAPACITY as u64 {
            queue.push(voice(id, 10.0, 1)).unwrap();
        }
        let err = queue.push(voice(9999, 10.0, 1)).unwrap_err();
        assert!(matches!(err, AgentError::PlaybackQueueFull));

        mixer.render(16, 0);
        queue.push(voice(9999, 10.0, 1)).unwrap();
    }

    #[test]
    fn full_retired_ring_still_reports_completion() {
        let (mut queue, mut mixer, _retired, _sink, rx) = channel();
        for id in 0..RETIRED_CAPACITY as u64 {
            queue.push(voice(id, 0.0, 1)).unwrap();
        }
        mixer.render(4, 0);
        assert!(finished_ids(&rx).is_empty());

        // The reaper never ran, so these two do not fit and are reported inline.
        queue.push(voice(5000, 0.0, 1)).unwrap();
        queue.push(voice(5001, 0.0, 1)).unwrap();
        mixer.render(4, 4);
        assert_eq!(finished_ids(&rx), vec![BufferId(5000), BufferId(5001)]);
    }
}
