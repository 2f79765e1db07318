use std::time::Duration;

use thiserror::Error;

/// All errors produced by vocalcv-core.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("failed to open voice transport: {0}")]
    TransportOpenFailed(String),

    #[error("voice transport closed abnormally: {0}")]
    TransportClosedAbnormally(String),

    #[error("malformed PCM chunk: {len} bytes is not a whole number of 16-bit samples")]
    MalformedChunk { len: usize },

    #[error("send attempted on a closed transport")]
    SendAfterClose,

    #[error("outbound audio queue is full")]
    Backpressure,

    #[error("playback queue is full")]
    PlaybackQueueFull,

    #[error("no acknowledgment from the voice service after {0:?}")]
    ConnectTimeout(Duration),

    #[error("invalid resume document: {0}")]
    InvalidResume(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AgentError {
    /// Short message suitable for showing next to the connect button.
    pub fn user_message(&self) -> String {
        match self {
            AgentError::PermissionDenied(_) => "Microphone access was denied.".into(),
            AgentError::DeviceUnavailable(_) => "No usable microphone or speaker found.".into(),
            AgentError::AudioStream(_) => "The audio device stopped unexpectedly.".into(),
            AgentError::TransportOpenFailed(_) => "Could not reach the voice service.".into(),
            AgentError::TransportClosedAbnormally(_) => "Connection error occurred.".into(),
            AgentError::ConnectTimeout(_) => "The voice service did not respond in time.".into(),
            other => other.to_string(),
        }
    }

    /// Errors the session absorbs without tearing down.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AgentError::MalformedChunk { .. }
                | AgentError::SendAfterClose
                | AgentError::Backpressure
                | AgentError::PlaybackQueueFull
        )
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
