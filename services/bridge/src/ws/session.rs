//! The per-connection state machine.
//!
//! Client frames, provider frames, dial results and tool results all arrive
//! as [`SessionEvent`]s on one queue and are applied by a single worker, so
//! every state change and queue operation happens in arrival order.

use super::{
    error::BridgeError,
    protocol::{ClientMessage, ServerMessage},
    provider::{ProviderBridge, Upstream},
};
use crate::{
    audio::{AudioFrame, decode_base64},
    state::AppState,
};
use serde_json::Value;
use std::{collections::VecDeque, sync::Arc};
use tokio::sync::mpsc;
use tracing::{Span, debug, error, info, warn};
use voicebridge_core::ToolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the client's `init`.
    Init,
    /// Dialing the provider.
    Connecting,
    /// Provider link open; audio flows both ways.
    Ready,
    Closed,
}

/// Everything a session reacts to.
pub enum SessionEvent {
    /// A text frame from the client.
    ClientText(String),
    ClientClosed(Option<String>),
    UpstreamOpened(Box<dyn Upstream>),
    DialFailed(BridgeError),
    Upstream(hume_evi::ServerMessage),
    UpstreamClosed(Option<String>),
    ToolFinished {
        call_id: String,
        outcome: Result<Value, ToolError>,
    },
}

pub struct Session {
    state: SessionState,
    app: Arc<AppState>,
    session_id: Option<String>,
    bridge: Option<ProviderBridge>,
    pending: VecDeque<AudioFrame>,
    client: Option<mpsc::Sender<ServerMessage>>,
    events: mpsc::Sender<SessionEvent>,
}

impl Session {
    /// `client` feeds the client socket writer; `events` is the sending side
    /// of the queue later passed to [`Session::run`].
    pub fn new(
        app: Arc<AppState>,
        client: mpsc::Sender<ServerMessage>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            state: SessionState::Init,
            app,
            session_id: None,
            bridge: None,
            pending: VecDeque::new(),
            client: Some(client),
            events,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Applies events until the session closes.
    pub async fn run(mut self, mut events: mpsc::Receiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
            if self.state == SessionState::Closed {
                break;
            }
        }
        self.close(None).await;

        // A dial may have completed while the session was closing.
        events.close();
        while let Some(event) = events.recv().await {
            if let SessionEvent::UpstreamOpened(mut upstream) = event {
                upstream.close().await;
            }
        }
        info!("Session finished.");
    }

    pub async fn handle(&mut self, event: SessionEvent) {
        if self.state == SessionState::Closed {
            if let SessionEvent::UpstreamOpened(mut upstream) = event {
                upstream.close().await;
            }
            return;
        }

        match event {
            SessionEvent::ClientText(text) => self.on_client_text(&text).await,
            SessionEvent::ClientClosed(reason) => {
                info!(reason = reason.as_deref().unwrap_or(""), "Client disconnected.");
                self.client = None;
                self.close(None).await;
            }
            SessionEvent::UpstreamOpened(upstream) => self.on_upstream_open(upstream).await,
            SessionEvent::DialFailed(e) => {
                error!(error = %e, "Upstream dial failed.");
                self.close(Some(e.to_string())).await;
            }
            SessionEvent::Upstream(message) => {
                let result = match self.bridge.as_mut() {
                    Some(bridge) => bridge.on_upstream(message).await,
                    None => Err(BridgeError::NotConnected),
                };
                self.check(result).await;
            }
            SessionEvent::UpstreamClosed(reason) => {
                warn!(reason = reason.as_deref().unwrap_or(""), "Upstream closed the link.");
                if let Some(bridge) = self.bridge.as_mut() {
                    bridge.upstream_lost();
                }
                let message = match reason.filter(|r| !r.is_empty()) {
                    Some(reason) => format!("upstream connection closed: {reason}"),
                    None => "upstream connection closed".to_string(),
                };
                self.close(Some(message)).await;
            }
            SessionEvent::ToolFinished { call_id, outcome } => {
                let result = match self.bridge.as_mut() {
                    Some(bridge) => bridge.complete_tool(&call_id, outcome).await,
                    None => Ok(()),
                };
                self.check(result).await;
            }
        }
    }

    /// Tears down the provider link and releases the client socket, after
    /// telling the client why when `reason` is given. Repeated calls do nothing.
    pub async fn close(&mut self, reason: Option<String>) {
        if self.state == SessionState::Closed {
            return;
        }
        self.transition(SessionState::Closed);

        if let (Some(message), Some(client)) = (reason, self.client.as_ref()) {
            if client.send(ServerMessage::error(message)).await.is_err() {
                debug!("Client already gone; error not delivered");
            }
        }
        if let Some(mut bridge) = self.bridge.take() {
            bridge.shutdown().await;
        }
        // Dropping the last sender lets the writer close the client socket.
        self.client = None;
        if !self.pending.is_empty() {
            debug!(frames = self.pending.len(), "Discarding buffered audio");
            self.pending.clear();
        }
    }

    async fn on_client_text(&mut self, text: &str) {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping malformed client message");
                return;
            }
        };
        match message {
            ClientMessage::Init { uuid } => self.on_init(uuid),
            ClientMessage::Audio { audio } => self.on_audio(audio).await,
        }
    }

    fn on_init(&mut self, uuid: String) {
        if self.state != SessionState::Init {
            warn!(state = ?self.state, "Ignoring repeated init");
            return;
        }
        if uuid.trim().is_empty() {
            warn!("Ignoring init without a session id");
            return;
        }
        let Some(client) = self.client.clone() else {
            return;
        };

        Span::current().record("session_uuid", uuid.as_str());
        let mut bridge = ProviderBridge::new(uuid.clone(), &self.app, client, self.events.clone());
        bridge.start_dial();
        self.bridge = Some(bridge);
        self.session_id = Some(uuid);
        self.transition(SessionState::Connecting);
    }

    async fn on_audio(&mut self, audio: Option<String>) {
        let Some(encoded) = audio.filter(|a| !a.is_empty()) else {
            debug!("Ignoring audio message without payload");
            return;
        };
        let pcm = match decode_base64(&encoded) {
            Ok(pcm) if pcm.is_empty() => return,
            Ok(pcm) => pcm,
            Err(e) => {
                warn!(error = %e, "Dropping audio with invalid base64");
                return;
            }
        };
        let frame = AudioFrame::new(self.app.config.client_sample_rate, pcm);

        if self.state == SessionState::Ready && self.pending.is_empty() {
            let result = self.forward(frame).await;
            self.check(result).await;
            return;
        }

        let limit = self.app.config.max_pending_frames;
        if self.pending.len() >= limit {
            error!(limit, "Pending audio queue overflow");
            self.close(Some(format!("pending audio exceeded {limit} frames before the upstream link opened")))
                .await;
            return;
        }
        self.pending.push_back(frame);
        if self.state == SessionState::Ready {
            self.flush().await;
        }
    }

    async fn on_upstream_open(&mut self, mut upstream: Box<dyn Upstream>) {
        if self.state != SessionState::Connecting {
            warn!(state = ?self.state, "Unexpected upstream link; closing it");
            upstream.close().await;
            return;
        }
        let Some(bridge) = self.bridge.as_mut() else {
            upstream.close().await;
            return;
        };
        bridge.attach(upstream);
        self.transition(SessionState::Ready);

        let greeted = match self.bridge.as_mut() {
            Some(bridge) => bridge.greet().await,
            None => Ok(()),
        };
        self.check(greeted).await;
        self.flush().await;
    }

    /// Sends every buffered frame in arrival order. Nothing else runs between
    /// steps, so new audio can't overtake the backlog.
    async fn flush(&mut self) {
        if !self.pending.is_empty() {
            info!(frames = self.pending.len(), "Flushing buffered audio");
        }
        while self.state == SessionState::Ready {
            let Some(frame) = self.pending.pop_front() else {
                break;
            };
            let result = self.forward(frame).await;
            self.check(result).await;
        }
    }

    async fn forward(&mut self, frame: AudioFrame) -> Result<(), BridgeError> {
        match self.bridge.as_mut() {
            Some(bridge) => bridge.forward_audio(frame).await,
            None => Err(BridgeError::NotConnected),
        }
    }

    /// Closes on fatal errors; anything else only costs the current message.
    async fn check(&mut self, result: Result<(), BridgeError>) {
        match result {
            Ok(()) => {}
            Err(BridgeError::ClientGone) => {
                info!("Client went away mid-send.");
                self.client = None;
                self.close(None).await;
            }
            Err(e) if e.is_fatal() => {
                error!(error = %e, "Session failed.");
                self.close(Some(e.to_string())).await;
            }
            Err(e) => warn!(error = %e, "Dropping message"),
        }
    }

    fn transition(&mut self, next: SessionState) {
        info!(from = ?self.state, to = ?next, "Session state changed.");
        self.state = next;
    }
}
