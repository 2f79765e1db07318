//! Connection to the hosted conversational voice model.
//!
//! The session only sees two traits: [`Transport`] opens a link for a given
//! setup, and [`TransportLink`] pushes encoded microphone chunks. Everything
//! coming back (setup acknowledgment, speech, interruptions, close) arrives
//! as `SessionEvent`s through the sink handed to `open`.

pub mod live;
pub mod messages;

pub use live::{LiveTransport, LiveTransportConfig};

use crate::{buffering::frame::EncodedChunk, error::Result, session::events::SessionEventSink};

/// Voice used when settings do not name one.
pub const DEFAULT_VOICE: &str = "Charon";

/// Model used when settings do not name one.
pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-exp";

/// What the service should answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseModality {
    Audio,
}

impl ResponseModality {
    pub fn as_wire(self) -> &'static str {
        match self {
            ResponseModality::Audio => "AUDIO",
        }
    }
}

/// Fixed configuration sent once when the stream opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSetup {
    pub model: String,
    pub voice_name: String,
    pub system_instruction: String,
    pub response_modality: ResponseModality,
}

impl SessionSetup {
    pub fn new(system_instruction: impl Into<String>) -> Self {
        Self {
            model: DEFAULT_MODEL.into(),
            voice_name: DEFAULT_VOICE.into(),
            system_instruction: system_instruction.into(),
            response_modality: ResponseModality::Audio,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_voice(mut self, voice_name: impl Into<String>) -> Self {
        self.voice_name = voice_name.into();
        self
    }
}

/// An open (or opening) stream to the service.
pub trait TransportLink {
    /// Queue one chunk without blocking.
    ///
    /// # Errors
    /// `AgentError::Backpressure` when the outbound queue is full and
    /// `AgentError::SendAfterClose` once the stream is gone. Both are
    /// recoverable: the chunk is discarded.
    fn send(&mut self, chunk: EncodedChunk) -> Result<()>;

    /// Ask the service to close. Best effort.
    fn close(&mut self) -> Result<()>;
}

/// Opens links to the service.
pub trait Transport: Send {
    /// Start opening a stream. Returns as soon as the attempt is under way;
    /// `SessionEvent::TransportOpened` follows on acknowledgment.
    ///
    /// # Errors
    /// `AgentError::TransportOpenFailed` when the attempt cannot even start.
    fn open(&mut self, setup: &SessionSetup, events: SessionEventSink)
        -> Result<Box<dyn TransportLink>>;
}
