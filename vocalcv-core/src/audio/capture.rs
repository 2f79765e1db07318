//! Microphone → fixed-size 16 kHz blocks.
//!
//! ```text
//! device callback ──push_slice──► SPSC ring ──► framing thread
//!                                                 │ resample (if needed)
//!                                                 │ FrameAssembler
//!                                                 ▼
//!                                             on_frame(AudioFrame)
//! ```
//!
//! `acquire` opens the device with the running flag cleared, so the
//! permission prompt happens up front but nothing flows until `start`.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{debug, error, info};

use super::{
    resample::{InputResampler, RESAMPLE_CHUNK},
    AudioBackend, InputStream,
};
use crate::{
    buffering::{
        assembler::FrameAssembler,
        create_audio_ring,
        frame::{AudioFrame, DEFAULT_BLOCK_SIZE, INPUT_SAMPLE_RATE},
        AudioConsumer, Consumer,
    },
    error::{AgentError, Result},
    session::events::SessionEventSink,
};

/// Samples drained from the ring per iteration.
const DRAIN_CHUNK: usize = 2048;

/// Sleep when the ring is empty (avoids busy-waiting a core).
const SLEEP_EMPTY: Duration = Duration::from_millis(4);

/// Microphone parameters.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Rate the blocks are delivered at (Hz).
    pub sample_rate: u32,
    /// Samples per delivered block.
    pub block_size: usize,
    /// Input device name to prefer over the system default.
    pub preferred_device: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: INPUT_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            preferred_device: None,
        }
    }
}

/// Owns the microphone stream and the framing thread.
pub struct CapturePipeline {
    config: CaptureConfig,
    stream: Option<Box<dyn InputStream>>,
    consumer: Option<AudioConsumer>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CapturePipeline {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            stream: None,
            consumer: None,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Open the microphone without delivering anything yet.
    ///
    /// # Errors
    /// Whatever the backend reports: `PermissionDenied`, `DeviceUnavailable`,
    /// `AudioStream`.
    pub fn acquire(&mut self, backend: &mut dyn AudioBackend, events: SessionEventSink) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let (producer, consumer) = create_audio_ring();
        self.running.store(false, Ordering::SeqCst);
        let stream = backend.open_input(&self.config, producer, Arc::clone(&self.running), events)?;
        info!(device_rate = stream.sample_rate(), "microphone acquired");
        self.stream = Some(stream);
        self.consumer = Some(consumer);
        Ok(())
    }

    /// Deliver consecutive blocks to `on_frame` until `stop`.
    ///
    /// # Errors
    /// `AgentError::DeviceUnavailable` if `acquire` has not succeeded.
    pub fn start<F>(&mut self, on_frame: F) -> Result<()>
    where
        F: FnMut(AudioFrame) + Send + 'static,
    {
        if self.worker.is_some() {
            return Ok(());
        }
        let device_rate = self
            .stream
            .as_ref()
            .map(|s| s.sample_rate())
            .ok_or_else(|| AgentError::DeviceUnavailable("microphone not acquired".into()))?;
        let consumer = self
            .consumer
            .take()
            .ok_or_else(|| AgentError::DeviceUnavailable("microphone not acquired".into()))?;

        let resampler = InputResampler::new(device_rate, self.config.sample_rate, RESAMPLE_CHUNK)?;
        let assembler = FrameAssembler::new(self.config.block_size, self.config.sample_rate);

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let spawned = thread::Builder::new()
            .name("vocalcv-capture".into())
            .spawn(move || run_framer(consumer, resampler, assembler, running, on_frame));

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                info!(
                    block_size = self.config.block_size,
                    sample_rate = self.config.sample_rate,
                    "capture started"
                );
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(AgentError::Io(e))
            }
        }
    }

    /// Release the microphone. No `on_frame` call happens after this returns.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("capture thread panicked");
            }
        }
        self.consumer = None;
        if self.stream.take().is_some() {
            info!("microphone released");
        }
    }

    /// `true` between `start` and `stop`.
    pub fn is_active(&self) -> bool {
        self.worker.is_some() && self.running.load(Ordering::SeqCst)
    }

    /// `true` while a device stream is held.
    pub fn is_acquired(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_framer<F>(
    mut consumer: AudioConsumer,
    mut resampler: InputResampler,
    mut assembler: FrameAssembler,
    running: Arc<AtomicBool>,
    mut on_frame: F,
) where
    F: FnMut(AudioFrame),
{
    let mut raw = vec![0f32; DRAIN_CHUNK];
    let mut converted = Vec::with_capacity(DRAIN_CHUNK);
    let mut delivered = 0u64;

    while running.load(Ordering::Relaxed) {
        let n = consumer.pop_slice(&mut raw);
        if n == 0 {
            thread::sleep(SLEEP_EMPTY);
            continue;
        }
        converted.clear();
        resampler.process_into(&raw[..n], &mut converted);
        assembler.push(&converted, |frame| {
            delivered += 1;
            on_frame(frame);
        });
    }
    debug!(delivered, "capture framing thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        buffering::{AudioProducer, Producer},
        playback::{tap::AnalysisTap, OutputDevice, PlaybackConfig},
        session::events::ControlMessage,
    };
    use std::time::Instant;

    struct FakeStream(u32);

    impl InputStream for FakeStream {
        fn sample_rate(&self) -> u32 {
            self.0
        }
    }

    /// Pre-fills the ring with a fixed recording when opened.
    struct RecordedMic {
        recording: Vec<f32>,
        refuse: bool,
    }

    impl AudioBackend for RecordedMic {
        fn open_input(
            &mut self,
            _config: &CaptureConfig,
            mut producer: AudioProducer,
            _running: Arc<AtomicBool>,
            _events: SessionEventSink,
        ) -> Result<Box<dyn InputStream>> {
            if self.refuse {
                return Err(AgentError::PermissionDenied("user refused".into()));
            }
            producer.push_slice(&self.recording);
            Ok(Box::new(FakeStream(INPUT_SAMPLE_RATE)))
        }

        fn open_output(
            &mut self,
            _config: &PlaybackConfig,
            _tap: Arc<AnalysisTap>,
            _events: SessionEventSink,
        ) -> Result<Box<dyn OutputDevice>> {
            Err(AgentError::DeviceUnavailable("no speaker".into()))
        }
    }

    fn sink() -> SessionEventSink {
        let (tx, _rx) = crossbeam_channel::unbounded::<ControlMessage>();
        SessionEventSink::new(1, tx)
    }

    fn config(block_size: usize) -> CaptureConfig {
        CaptureConfig {
            block_size,
            ..CaptureConfig::default()
        }
    }

    #[test]
    fn delivers_fixed_blocks_in_capture_order() {
        let recording: Vec<f32> = (0..1000).map(|i| i as f32 / 1000.0).collect();
        let mut mic = RecordedMic {
            recording: recording.clone(),
            refuse: false,
        };
        let mut pipeline = CapturePipeline::new(config(256));
        pipeline.acquire(&mut mic, sink()).unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        pipeline
            .start(move |frame| {
                let _ = tx.send(frame);
            })
            .unwrap();

        let mut frames = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        while frames.len() < 3 && Instant::now() < deadline {
            if let Ok(f) = rx.recv_timeout(Duration::from_millis(20)) {
                frames.push(f);
            }
        }
        pipeline.stop();

        assert_eq!(frames.len(), 3);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.len(), 256);
            assert_eq!(frame.sample_rate, INPUT_SAMPLE_RATE);
            assert_eq!(frame.samples, recording[i * 256..(i + 1) * 256]);
        }
        // 1000 samples make three full blocks; the tail never leaves.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn refused_permission_leaves_nothing_open() {
        let mut mic = RecordedMic {
            recording: vec![],
            refuse: true,
        };
        let mut pipeline = CapturePipeline::new(CaptureConfig::default());
        let err = pipeline.acquire(&mut mic, sink()).unwrap_err();
        assert!(matches!(err, AgentError::PermissionDenied(_)));
        assert!(!pipeline.is_acquired());
        assert!(pipeline.start(|_| {}).is_err());
    }

    #[test]
    fn stop_is_idempotent_and_final() {
        let mut mic = RecordedMic {
            recording: vec![0.1; 64],
            refuse: false,
        };
        let mut pipeline = CapturePipeline::new(config(4096));
        pipeline.acquire(&mut mic, sink()).unwrap();
        pipeline.start(|_| {}).unwrap();
        assert!(pipeline.is_active());

        pipeline.stop();
        pipeline.stop();
        assert!(!pipeline.is_active());
        assert!(!pipeline.is_acquired());
    }
}
