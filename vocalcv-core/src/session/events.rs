//! Messages feeding the session control loop.
//!
//! Device callbacks, the capture thread and the transport task never touch
//! session state directly; they emit `SessionEvent`s tagged with the instance
//! that created them, and the control loop applies them in arrival order.

use crossbeam_channel::Sender;

use crate::{buffering::frame::AudioFrame, playback::BufferId};

/// Something that happened to a live session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The service acknowledged the setup message.
    TransportOpened,
    /// Raw little-endian i16 speech at the output rate.
    SpeechChunk(Vec<u8>),
    /// The service heard the user talk over the agent.
    Interrupted,
    /// The agent finished its turn.
    TurnComplete,
    /// The service closed the stream cleanly.
    TransportClosed,
    /// The stream failed to open or broke.
    TransportFailed(String),
    /// One capture block is ready to send.
    FrameCaptured(AudioFrame),
    /// A scheduled buffer played to its end.
    PlaybackFinished(BufferId),
    /// An input or output stream reported an unrecoverable error.
    DeviceFailed(String),
}

/// Everything the control loop receives.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    Connect,
    Disconnect,
    Shutdown,
    Session { instance: u64, event: SessionEvent },
}

/// Cloneable handle collaborators use to report events for one session instance.
#[derive(Debug, Clone)]
pub struct SessionEventSink {
    instance: u64,
    tx: Sender<ControlMessage>,
}

impl SessionEventSink {
    pub fn new(instance: u64, tx: Sender<ControlMessage>) -> Self {
        Self { instance, tx }
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    /// Deliver `event`. Returns `false` once the control loop has gone away.
    pub fn emit(&self, event: SessionEvent) -> bool {
        self.tx
            .send(ControlMessage::Session {
                instance: self.instance,
                event,
            })
            .is_ok()
    }
}
