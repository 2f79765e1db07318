//! One voice conversation, from connect to teardown.
//!
//! ## Lifecycle
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──TransportOpened──► Connected
//!                                 │                               │
//!                                 ├── open failure / timeout ─────┼──► Error
//!                                 └── disconnect() ───────────────┴──► Disconnected
//! ```
//!
//! A `Session` is single use: once it reaches `Disconnected` or `Error`
//! after connecting, it stays there. [`agent::VoiceAgent`] creates a fresh
//! one for every connect.
//!
//! ## Threading
//!
//! A session lives on the control thread for its whole life. Device streams
//! are `!Send`, so they are opened, used and dropped there too. Everything
//! else reaches the session as a [`events::SessionEvent`].

pub mod agent;
pub mod events;
pub mod status;

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crossbeam_channel::Sender;
use tracing::{debug, error, info, trace, warn};

use crate::{
    audio::{
        capture::{CaptureConfig, CapturePipeline},
        AudioBackend,
    },
    buffering::frame::{AudioFrame, DEFAULT_BLOCK_SIZE, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE},
    codec,
    error::AgentError,
    ipc::events::SessionState,
    playback::{tap::AnalysisTap, BufferId, PlaybackActivity, PlaybackConfig, PlaybackScheduler},
    transport::{
        live::DEFAULT_OUTBOUND_QUEUE, SessionSetup, Transport, TransportLink, DEFAULT_MODEL,
        DEFAULT_VOICE,
    },
};

use events::{ControlMessage, SessionEvent, SessionEventSink};
use status::StatusBoard;

/// Configuration for a `VoiceAgent` and the sessions it runs.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Rate microphone blocks are sent at (Hz). Default: 16000.
    pub input_sample_rate: u32,
    /// Samples per microphone block. Default: 4096.
    pub block_size: usize,
    /// Rate of the model's speech (Hz). Default: 24000.
    pub output_sample_rate: u32,
    /// How long to wait for the service to acknowledge setup. Default: 15 s.
    pub connect_timeout: Duration,
    /// Outbound audio blocks buffered before new ones are dropped. Default: 32.
    pub outbound_queue_frames: usize,
    /// FFT length of the spectrum visualizer. Default: 256.
    pub fft_size: usize,
    /// Output samples kept for the visualizer. Default: 2048.
    pub tap_capacity: usize,
    /// Input device name to prefer. `None` picks the system default.
    pub preferred_input_device: Option<String>,
    pub model: String,
    pub voice_name: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: INPUT_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            connect_timeout: Duration::from_secs(15),
            outbound_queue_frames: DEFAULT_OUTBOUND_QUEUE,
            fft_size: crate::visualizer::DEFAULT_FFT_SIZE,
            tap_capacity: crate::playback::tap::DEFAULT_TAP_CAPACITY,
            preferred_input_device: None,
            model: DEFAULT_MODEL.into(),
            voice_name: DEFAULT_VOICE.into(),
        }
    }
}

impl AgentConfig {
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            sample_rate: self.input_sample_rate,
            block_size: self.block_size,
            preferred_device: self.preferred_input_device.clone(),
        }
    }

    pub fn playback_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            sample_rate: self.output_sample_rate,
        }
    }

    /// The setup message sent when a stream opens.
    pub fn session_setup(&self, system_instruction: impl Into<String>) -> SessionSetup {
        SessionSetup::new(system_instruction)
            .with_model(self.model.clone())
            .with_voice(self.voice_name.clone())
    }
}

/// Per-session counters, logged at teardown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub chunks_received: u64,
    pub chunks_malformed: u64,
    /// Well-formed chunks the output device had no room for.
    pub chunks_dropped: u64,
    pub interruptions: u64,
    pub turns_completed: u64,
}

pub struct Session {
    instance: u64,
    config: AgentConfig,
    setup: SessionSetup,
    state: SessionState,
    started: bool,
    board: StatusBoard,
    tap: Arc<AnalysisTap>,
    events: SessionEventSink,
    capture: CapturePipeline,
    playback: PlaybackScheduler,
    link: Option<Box<dyn TransportLink>>,
    deadline: Option<Instant>,
    stats: SessionStats,
}

impl Session {
    pub fn new(
        instance: u64,
        config: AgentConfig,
        setup: SessionSetup,
        board: StatusBoard,
        tap: Arc<AnalysisTap>,
        tx: Sender<ControlMessage>,
    ) -> Self {
        let capture = CapturePipeline::new(config.capture_config());
        Self {
            instance,
            config,
            setup,
            state: SessionState::Disconnected,
            started: false,
            board,
            tap,
            events: SessionEventSink::new(instance, tx),
            capture,
            playback: PlaybackScheduler::new(),
            link: None,
            deadline: None,
            stats: SessionStats::default(),
        }
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// `true` while connecting or connected.
    pub fn is_live(&self) -> bool {
        matches!(self.state, SessionState::Connecting | SessionState::Connected)
    }

    /// Buffers scheduled and not yet finished or stopped.
    pub fn active_buffers(&self) -> usize {
        self.playback.active_count()
    }

    /// `true` while any device stream or transport link is held.
    pub fn holds_resources(&self) -> bool {
        self.capture.is_acquired() || self.playback.is_open() || self.link.is_some()
    }

    /// When the pending connect attempt times out, if one is pending.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Open speaker, microphone and transport, in that order.
    ///
    /// Only acts on a fresh session; later calls are ignored. Any failure
    /// leaves the session in `Error` with everything released.
    pub fn connect(&mut self, backend: &mut dyn AudioBackend, transport: &mut dyn Transport) {
        if self.started || self.state != SessionState::Disconnected {
            debug!(instance = self.instance, state = ?self.state, "connect ignored");
            return;
        }
        self.started = true;
        self.board.clear_error();
        self.board.set_talking(false);
        self.set_state(SessionState::Connecting);
        info!(instance = self.instance, "connecting");

        if let Err(e) = self.open(backend, transport) {
            self.fail(e);
        }
    }

    fn open(
        &mut self,
        backend: &mut dyn AudioBackend,
        transport: &mut dyn Transport,
    ) -> crate::error::Result<()> {
        let output = backend.open_output(
            &self.config.playback_config(),
            Arc::clone(&self.tap),
            self.events.clone(),
        )?;
        self.playback.attach(output);
        self.capture.acquire(backend, self.events.clone())?;
        self.link = Some(transport.open(&self.setup, self.events.clone())?);
        self.deadline = Some(Instant::now() + self.config.connect_timeout);
        Ok(())
    }

    /// Apply one event reported for this session.
    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::TransportOpened => self.on_opened(),
            SessionEvent::FrameCaptured(frame) => self.on_frame(frame),
            SessionEvent::SpeechChunk(bytes) => self.on_speech(&bytes),
            SessionEvent::Interrupted => self.on_interrupted(),
            SessionEvent::TurnComplete => {
                if self.state == SessionState::Connected {
                    self.stats.turns_completed += 1;
                    debug!(instance = self.instance, "agent turn complete");
                }
            }
            SessionEvent::PlaybackFinished(id) => self.on_playback_finished(id),
            SessionEvent::TransportClosed => {
                if self.is_live() {
                    info!(instance = self.instance, "voice service closed the stream");
                    self.release(SessionState::Disconnected);
                }
            }
            SessionEvent::TransportFailed(reason) => match self.state {
                SessionState::Connecting => self.fail(AgentError::TransportOpenFailed(reason)),
                SessionState::Connected => {
                    self.fail(AgentError::TransportClosedAbnormally(reason))
                }
                _ => debug!(instance = self.instance, "late transport failure ignored: {reason}"),
            },
            SessionEvent::DeviceFailed(reason) => {
                if self.is_live() {
                    self.fail(AgentError::AudioStream(reason));
                }
            }
        }
    }

    /// Check the connect deadline against `now`.
    pub fn on_tick(&mut self, now: Instant) {
        if self.state != SessionState::Connecting {
            return;
        }
        if self.deadline.is_some_and(|d| now >= d) {
            self.fail(AgentError::ConnectTimeout(self.config.connect_timeout));
        }
    }

    /// User hang-up. Closes the stream best effort, then releases everything.
    pub fn disconnect(&mut self) {
        if !self.is_live() {
            debug!(instance = self.instance, state = ?self.state, "disconnect ignored");
            return;
        }
        if let Some(link) = self.link.as_mut() {
            if let Err(e) = link.close() {
                warn!(instance = self.instance, "transport close failed: {e}");
            }
        }
        info!(instance = self.instance, "disconnected by user");
        self.release(SessionState::Disconnected);
    }

    /// Release every resource. Safe from any state; an `Error` state is kept.
    pub fn teardown(&mut self) {
        let target = if self.state == SessionState::Error {
            SessionState::Error
        } else {
            SessionState::Disconnected
        };
        self.release(target);
    }

    fn on_opened(&mut self) {
        if self.state != SessionState::Connecting {
            debug!(instance = self.instance, state = ?self.state, "unexpected setup acknowledgment");
            return;
        }
        self.deadline = None;

        let sink = self.events.clone();
        let started = self.capture.start(move |frame| {
            sink.emit(SessionEvent::FrameCaptured(frame));
        });
        if let Err(e) = started {
            self.fail(e);
            return;
        }
        self.set_state(SessionState::Connected);
        info!(instance = self.instance, "connected, streaming microphone");
    }

    fn on_frame(&mut self, frame: AudioFrame) {
        // Frames still queued after capture stopped must not reach the wire.
        if self.state != SessionState::Connected || !self.capture.is_active() {
            trace!(instance = self.instance, "dropping frame outside a live stream");
            return;
        }
        let Some(link) = self.link.as_mut() else {
            return;
        };
        match link.send(codec::encode(&frame)) {
            Ok(()) => self.stats.frames_sent += 1,
            Err(AgentError::Backpressure) => {
                self.stats.frames_dropped += 1;
                warn!(
                    dropped = self.stats.frames_dropped,
                    "outbound audio queue full, dropping frame"
                );
            }
            Err(AgentError::SendAfterClose) => {
                self.stats.frames_dropped += 1;
                debug!(instance = self.instance, "send after close ignored");
            }
            Err(e) => self.fail(e),
        }
    }

    fn on_speech(&mut self, bytes: &[u8]) {
        if self.state != SessionState::Connected {
            debug!(instance = self.instance, state = ?self.state, "speech outside a live stream ignored");
            return;
        }
        let buffer = match codec::decode(bytes, self.config.output_sample_rate) {
            Ok(buffer) => buffer,
            Err(e) => {
                self.stats.chunks_malformed += 1;
                warn!("dropping speech chunk: {e}");
                return;
            }
        };
        if buffer.is_empty() {
            return;
        }
        match self.playback.schedule(buffer) {
            Ok(span) => {
                self.stats.chunks_received += 1;
                trace!(id = span.id.0, start_at = span.start_at, "speech scheduled");
                self.board.set_talking(true);
            }
            Err(e) if e.is_recoverable() => {
                self.stats.chunks_dropped += 1;
                warn!(dropped = self.stats.chunks_dropped, "dropping speech chunk: {e}");
            }
            Err(e) => self.fail(e),
        }
    }

    fn on_interrupted(&mut self) {
        if self.state != SessionState::Connected {
            return;
        }
        self.stats.interruptions += 1;
        self.playback.interrupt();
        self.board.set_talking(false);
        info!(instance = self.instance, "agent interrupted");
    }

    fn on_playback_finished(&mut self, id: BufferId) {
        if self.playback.complete(id) == PlaybackActivity::Idle {
            self.board.set_talking(false);
        }
    }

    fn fail(&mut self, err: AgentError) {
        error!(instance = self.instance, "session failed: {err}");
        self.board.set_error(err.user_message());
        self.release(SessionState::Error);
    }

    fn release(&mut self, target: SessionState) {
        let was_live = self.is_live();

        self.capture.stop();
        self.playback.teardown();
        // Dropping the link also ends its socket task.
        self.link = None;
        self.deadline = None;
        self.tap.clear();
        self.board.set_talking(false);

        if was_live {
            let s = self.stats;
            info!(
                instance = self.instance,
                frames_sent = s.frames_sent,
                frames_dropped = s.frames_dropped,
                chunks_received = s.chunks_received,
                chunks_malformed = s.chunks_malformed,
                chunks_dropped = s.chunks_dropped,
                interruptions = s.interruptions,
                turns = s.turns_completed,
                "session ended"
            );
        }
        self.set_state(target);
    }

    fn set_state(&mut self, state: SessionState) {
        self.state = state;
        self.board.set_state(state);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.holds_resources() {
            self.teardown();
        }
    }
}
