//! Shared, observable session status.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::ipc::events::{SessionState, SessionStatusEvent};

/// Broadcast channel capacity for slow status consumers.
const BROADCAST_CAP: usize = 64;

/// Holds the current status snapshot and notifies subscribers on change.
///
/// Only the control loop writes; any thread may read or subscribe.
#[derive(Clone)]
pub struct StatusBoard {
    current: Arc<Mutex<SessionStatusEvent>>,
    tx: broadcast::Sender<SessionStatusEvent>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            current: Arc::new(Mutex::new(SessionStatusEvent::default())),
            tx,
        }
    }

    pub fn snapshot(&self) -> SessionStatusEvent {
        self.current.lock().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.tx.subscribe()
    }

    pub fn set_state(&self, state: SessionState) {
        self.update(|s| s.state = state);
    }

    pub fn set_talking(&self, is_talking: bool) {
        self.update(|s| s.is_talking = is_talking);
    }

    pub fn set_error(&self, message: String) {
        self.update(|s| s.error = Some(message));
    }

    pub fn clear_error(&self) {
        self.update(|s| s.error = None);
    }

    fn update(&self, apply: impl FnOnce(&mut SessionStatusEvent)) {
        let snapshot = {
            let mut current = self.current.lock();
            let before = current.clone();
            apply(&mut current);
            if *current == before {
                return;
            }
            current.clone()
        };
        // No subscribers is fine.
        let _ = self.tx.send(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publishes_only_changes() {
        let board = StatusBoard::new();
        let mut rx = board.subscribe();

        board.set_talking(false);
        assert!(rx.try_recv().is_err(), "unchanged value must not publish");

        board.set_state(SessionState::Connecting);
        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.state, SessionState::Connecting);
        assert!(!ev.is_talking);
    }

    #[test]
    fn error_message_round_trip() {
        let board = StatusBoard::new();
        board.set_error("Microphone access was denied.".into());
        assert_eq!(
            board.snapshot().error.as_deref(),
            Some("Microphone access was denied.")
        );
        board.clear_error();
        assert!(board.snapshot().error.is_none());
    }
}
