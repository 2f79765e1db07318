//! `VoiceAgent`: the handle a UI holds, and the control loop behind it.
//!
//! ```text
//! VoiceAgent::connect()/disconnect() ──┐
//! device callbacks, capture thread ────┼──► crossbeam channel ──► Controller (spawn_blocking)
//! transport task ──────────────────────┘                             │
//!                                                                    ▼
//!                                                         Session state machine
//!                                                                    │
//!                                            StatusBoard ◄───────────┘──► broadcast
//! ```

use std::{sync::Arc, time::Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tokio::{runtime::Handle, sync::broadcast, task::JoinHandle};
use tracing::{debug, info, trace, warn};

use super::{
    events::{ControlMessage, SessionEvent},
    status::StatusBoard,
    AgentConfig, Session,
};
use crate::{
    audio::AudioBackend,
    error::{AgentError, Result},
    ipc::events::SessionStatusEvent,
    playback::tap::AnalysisTap,
    transport::{SessionSetup, Transport},
};

/// Owns the collaborators and the current session. Runs on one thread.
pub struct Controller {
    config: AgentConfig,
    setup: SessionSetup,
    backend: Box<dyn AudioBackend>,
    transport: Box<dyn Transport>,
    board: StatusBoard,
    tap: Arc<AnalysisTap>,
    tx: Sender<ControlMessage>,
    session: Option<Session>,
    next_instance: u64,
}

impl Controller {
    pub fn new(
        config: AgentConfig,
        setup: SessionSetup,
        backend: Box<dyn AudioBackend>,
        transport: Box<dyn Transport>,
        board: StatusBoard,
        tap: Arc<AnalysisTap>,
        tx: Sender<ControlMessage>,
    ) -> Self {
        Self {
            config,
            setup,
            backend,
            transport,
            board,
            tap,
            tx,
            session: None,
            next_instance: 0,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Apply one message. Returns `false` once the loop should exit.
    pub fn handle(&mut self, msg: ControlMessage) -> bool {
        match msg {
            ControlMessage::Connect => self.connect(),
            ControlMessage::Disconnect => match self.session.as_mut() {
                Some(session) => session.disconnect(),
                None => debug!("disconnect with no session ignored"),
            },
            ControlMessage::Shutdown => {
                if let Some(session) = self.session.as_mut() {
                    session.disconnect();
                    session.teardown();
                }
                return false;
            }
            ControlMessage::Session { instance, event } => self.dispatch(instance, event),
        }
        true
    }

    /// Check timers. Called when a receive deadline passes.
    pub fn tick(&mut self, now: Instant) {
        if let Some(session) = self.session.as_mut() {
            session.on_tick(now);
        }
    }

    /// Block on `rx` until shutdown or every sender is gone.
    pub fn run(mut self, rx: Receiver<ControlMessage>) {
        info!("voice agent control loop started");
        loop {
            let deadline = self.session.as_ref().and_then(Session::deadline);
            let msg = match deadline {
                Some(deadline) => match rx.recv_deadline(deadline) {
                    Ok(msg) => msg,
                    Err(RecvTimeoutError::Timeout) => {
                        self.tick(Instant::now());
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match rx.recv() {
                    Ok(msg) => msg,
                    Err(_) => break,
                },
            };
            if !self.handle(msg) {
                break;
            }
        }
        if let Some(session) = self.session.as_mut() {
            session.teardown();
        }
        info!("voice agent control loop stopped");
    }

    fn connect(&mut self) {
        if self.session.as_ref().is_some_and(Session::is_live) {
            debug!("connect while a session is live ignored");
            return;
        }
        // Release the previous instance before opening devices again.
        self.session = None;

        self.next_instance += 1;
        let mut session = Session::new(
            self.next_instance,
            self.config.clone(),
            self.setup.clone(),
            self.board.clone(),
            Arc::clone(&self.tap),
            self.tx.clone(),
        );
        session.connect(self.backend.as_mut(), self.transport.as_mut());
        self.session = Some(session);
    }

    fn dispatch(&mut self, instance: u64, event: SessionEvent) {
        match self.session.as_mut() {
            Some(session) if session.instance() == instance => session.handle_event(event),
            _ => trace!(instance, "event from a finished session dropped"),
        }
    }
}

/// Handle to a running voice agent.
///
/// Cheap to query from any thread. Dropping it stops the agent.
pub struct VoiceAgent {
    tx: Sender<ControlMessage>,
    board: StatusBoard,
    tap: Arc<AnalysisTap>,
    worker: Option<JoinHandle<()>>,
}

impl VoiceAgent {
    /// Start the control loop on the current Tokio runtime's blocking pool.
    ///
    /// # Errors
    /// `AgentError::Other` when called outside a Tokio runtime.
    pub fn spawn(
        config: AgentConfig,
        setup: SessionSetup,
        backend: Box<dyn AudioBackend>,
        transport: Box<dyn Transport>,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| AgentError::Other(anyhow::anyhow!("voice agent needs a Tokio runtime: {e}")))?;

        let (tx, rx) = crossbeam_channel::unbounded();
        let board = StatusBoard::new();
        let tap = Arc::new(AnalysisTap::new(config.tap_capacity));

        let (board_c, tap_c, tx_c) = (board.clone(), Arc::clone(&tap), tx.clone());
        // Sessions hold `!Send` device streams, so the controller is built
        // on the thread that runs it.
        let worker = runtime.spawn_blocking(move || {
            Controller::new(config, setup, backend, transport, board_c, tap_c, tx_c).run(rx)
        });

        Ok(Self {
            tx,
            board,
            tap,
            worker: Some(worker),
        })
    }

    /// Start a new session. Ignored while one is connecting or connected.
    pub fn connect(&self) -> Result<()> {
        self.send(ControlMessage::Connect)
    }

    /// End the current session. Ignored when nothing is live.
    pub fn disconnect(&self) -> Result<()> {
        self.send(ControlMessage::Disconnect)
    }

    /// Stop the control loop and wait for every device to be released.
    pub async fn shutdown(mut self) {
        let _ = self.tx.send(ControlMessage::Shutdown);
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!("voice agent control loop ended abnormally: {e}");
            }
        }
    }

    pub fn status(&self) -> SessionStatusEvent {
        self.board.snapshot()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.board.subscribe()
    }

    /// Most recent speaker output, for the spectrum visualizer.
    pub fn analysis_tap(&self) -> Arc<AnalysisTap> {
        Arc::clone(&self.tap)
    }

    fn send(&self, msg: ControlMessage) -> Result<()> {
        self.tx
            .send(msg)
            .map_err(|_| AgentError::Other(anyhow::anyhow!("voice agent has shut down")))
    }
}

impl Drop for VoiceAgent {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.tx.send(ControlMessage::Shutdown);
        }
    }
}
