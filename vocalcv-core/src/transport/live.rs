//! Websocket client for the hosted live voice API.
//!
//! `open` spawns one Tokio task per link. The task owns the socket; the
//! control thread talks to it through a bounded chunk queue and a oneshot
//! close signal, and hears back through the session event sink.

use futures_util::{SinkExt, StreamExt};
use tokio::{
    runtime::Handle,
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot,
    },
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::frame::coding::CloseCode, Message},
};
use tracing::{debug, info, warn};

use super::{
    messages::{parse_server_message, realtime_input_json, setup_json},
    SessionSetup, Transport, TransportLink,
};
use crate::{
    buffering::frame::EncodedChunk,
    error::{AgentError, Result},
    session::events::{SessionEvent, SessionEventSink},
};

pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Outbound chunks buffered before new ones are dropped. 32 blocks of 4096
/// samples at 16 kHz is about eight seconds of speech.
pub const DEFAULT_OUTBOUND_QUEUE: usize = 32;

#[derive(Debug, Clone)]
pub struct LiveTransportConfig {
    pub endpoint: String,
    pub api_key: String,
    pub outbound_queue: usize,
}

impl LiveTransportConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.into(),
            api_key: api_key.into(),
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
        }
    }

    fn url(&self) -> String {
        let sep = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}key={}", self.endpoint, sep, self.api_key)
    }
}

/// Opens websocket links on a Tokio runtime.
pub struct LiveTransport {
    config: LiveTransportConfig,
    runtime: Handle,
}

impl LiveTransport {
    pub fn new(config: LiveTransportConfig, runtime: Handle) -> Self {
        // TLS needs a process-wide crypto provider; a second install is a no-op.
        let _ = rustls::crypto::ring::default_provider().install_default();
        Self { config, runtime }
    }

    /// Bind to the runtime of the calling task.
    ///
    /// # Errors
    /// `AgentError::TransportOpenFailed` outside a Tokio runtime.
    pub fn on_current_runtime(config: LiveTransportConfig) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| AgentError::TransportOpenFailed(format!("no async runtime: {e}")))?;
        Ok(Self::new(config, runtime))
    }
}

impl Transport for LiveTransport {
    fn open(
        &mut self,
        setup: &SessionSetup,
        events: SessionEventSink,
    ) -> Result<Box<dyn TransportLink>> {
        if self.config.api_key.trim().is_empty() {
            return Err(AgentError::TransportOpenFailed("missing API key".into()));
        }
        let setup = setup_json(setup)
            .map_err(|e| AgentError::TransportOpenFailed(format!("setup message: {e}")))?;

        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_queue.max(1));
        let (close_tx, close_rx) = oneshot::channel();
        let url = self.config.url();

        info!(endpoint = self.config.endpoint.as_str(), "opening voice transport");
        self.runtime
            .spawn(run_socket(url, setup, outbound_rx, close_rx, events));

        Ok(Box::new(LiveLink {
            outbound: outbound_tx,
            close: Some(close_tx),
        }))
    }
}

struct LiveLink {
    outbound: mpsc::Sender<EncodedChunk>,
    close: Option<oneshot::Sender<()>>,
}

impl TransportLink for LiveLink {
    fn send(&mut self, chunk: EncodedChunk) -> Result<()> {
        self.outbound.try_send(chunk).map_err(|e| match e {
            TrySendError::Full(_) => AgentError::Backpressure,
            TrySendError::Closed(_) => AgentError::SendAfterClose,
        })
    }

    fn close(&mut self) -> Result<()> {
        match self.close.take() {
            Some(tx) => tx.send(()).map_err(|_| AgentError::SendAfterClose),
            None => Ok(()),
        }
    }
}

async fn run_socket(
    url: String,
    setup: String,
    mut outbound: mpsc::Receiver<EncodedChunk>,
    mut close: oneshot::Receiver<()>,
    events: SessionEventSink,
) {
    let ws = tokio::select! {
        _ = &mut close => {
            debug!("transport closed before the socket opened");
            return;
        }
        connected = connect_async(url.as_str()) => match connected {
            Ok((ws, _response)) => ws,
            Err(e) => {
                events.emit(SessionEvent::TransportFailed(format!("connect failed: {e}")));
                return;
            }
        },
    };
    let (mut sink, mut stream) = ws.split();

    if let Err(e) = sink.send(Message::Text(setup.into())).await {
        events.emit(SessionEvent::TransportFailed(format!("setup failed: {e}")));
        return;
    }
    debug!("setup sent, awaiting acknowledgment");

    loop {
        tokio::select! {
            // Either an explicit close or the link being dropped.
            _ = &mut close => {
                let _ = sink.send(Message::Close(None)).await;
                let _ = sink.close().await;
                debug!("transport closed by client");
                break;
            }
            chunk = outbound.recv() => {
                let Some(chunk) = chunk else {
                    let _ = sink.close().await;
                    break;
                };
                let msg = match realtime_input_json(&chunk) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!("could not encode audio chunk: {e}");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(msg.into())).await {
                    events.emit(SessionEvent::TransportFailed(format!("send failed: {e}")));
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => dispatch(text.as_str(), &events),
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => dispatch(text, &events),
                    Err(_) => warn!(len = bytes.len(), "ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    match frame {
                        Some(f) if f.code != CloseCode::Normal && f.code != CloseCode::Away => {
                            events.emit(SessionEvent::TransportFailed(format!(
                                "closed by server ({}): {}",
                                f.code, f.reason
                            )));
                        }
                        _ => {
                            events.emit(SessionEvent::TransportClosed);
                        }
                    }
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    events.emit(SessionEvent::TransportFailed(e.to_string()));
                    break;
                }
                None => {
                    events.emit(SessionEvent::TransportClosed);
                    break;
                }
            },
        }
    }
}

fn dispatch(raw: &str, events: &SessionEventSink) {
    match parse_server_message(raw) {
        Ok(parsed) => {
            for event in parsed {
                events.emit(event);
            }
        }
        Err(e) => warn!("ignoring unreadable server message: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::events::ControlMessage;

    #[test]
    fn url_appends_key() {
        let config = LiveTransportConfig::new("abc");
        assert!(config.url().ends_with("BidiGenerateContent?key=abc"));

        let custom = LiveTransportConfig {
            endpoint: "ws://localhost:9000/live?v=1".into(),
            ..LiveTransportConfig::new("k")
        };
        assert_eq!(custom.url(), "ws://localhost:9000/live?v=1&key=k");
    }

    #[tokio::test]
    async fn missing_key_fails_before_connecting() {
        let mut transport = LiveTransport::on_current_runtime(LiveTransportConfig::new("  ")).unwrap();
        let (tx, _rx) = crossbeam_channel::unbounded::<ControlMessage>();
        let err = transport
            .open(&SessionSetup::new("x"), SessionEventSink::new(1, tx))
            .err()
            .expect("open must fail");
        assert!(matches!(err, AgentError::TransportOpenFailed(_)));
    }

    #[test]
    fn full_queue_reports_backpressure_and_closed_reports_send_after_close() {
        let (outbound, rx) = mpsc::channel(1);
        let (close, _close_rx) = oneshot::channel();
        let mut link = LiveLink {
            outbound,
            close: Some(close),
        };
        let chunk = EncodedChunk {
            data: vec![0, 0],
            mime_type: "audio/pcm;rate=16000".into(),
        };
        link.send(chunk.clone()).unwrap();
        assert!(matches!(link.send(chunk.clone()), Err(AgentError::Backpressure)));

        drop(rx);
        assert!(matches!(link.send(chunk), Err(AgentError::SendAfterClose)));
    }

    #[test]
    fn close_is_best_effort_and_repeatable() {
        let (outbound, _rx) = mpsc::channel(1);
        let (close, close_rx) = oneshot::channel();
        let mut link = LiveLink {
            outbound,
            close: Some(close),
        };
        drop(close_rx);
        assert!(matches!(link.close(), Err(AgentError::SendAfterClose)));
        assert!(link.close().is_ok());
    }
}
