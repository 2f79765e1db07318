//! Observable session state.

use serde::{Deserialize, Serialize};

/// Lifecycle of the connection to the voice service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session, or the last one closed cleanly.
    #[default]
    Disconnected,
    /// Devices opened, waiting for the service to acknowledge the setup.
    Connecting,
    /// Microphone streaming and speech playback active.
    Connected,
    /// The last session failed; `connect()` starts a fresh one.
    Error,
}

impl SessionState {
    /// `true` for states a session instance never leaves.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Disconnected | SessionState::Error)
    }
}

/// Snapshot broadcast on every change of state, talking flag or error.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub state: SessionState,
    /// `true` while the agent's speech is scheduled or playing.
    pub is_talking: bool,
    /// Human-readable message for the last failure, cleared on connect.
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_serializes_with_camel_case_and_lowercase_state() {
        let event = SessionStatusEvent {
            state: SessionState::Connected,
            is_talking: true,
            error: None,
        };
        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["state"], "connected");
        assert_eq!(json["isTalking"], true);
        assert!(json["error"].is_null());

        let round_trip: SessionStatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(round_trip, event);
    }

    #[test]
    fn state_rejects_non_lowercase_values() {
        assert!(serde_json::from_str::<SessionState>(r#""Connected""#).is_err());
    }

    #[test]
    fn only_idle_states_are_terminal() {
        assert!(SessionState::Disconnected.is_terminal());
        assert!(SessionState::Error.is_terminal());
        assert!(!SessionState::Connecting.is_terminal());
        assert!(!SessionState::Connected.is_terminal());
    }
}
