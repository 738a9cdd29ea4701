//! In-memory stand-ins for the provider link, shared by the session and bridge tests.

use super::{
    error::BridgeError,
    provider::{DialRequest, Dialer, Upstream},
    session::SessionEvent,
};
use crate::{audio::RubatoFactory, config::Config, state::AppState};
use async_trait::async_trait;
use hume_evi::{ClientMessage, EviError};
use serde_json::Value;
use std::{
    future::Future,
    io::Cursor,
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::{mpsc, oneshot};
use tracing::Level;
use voicebridge_core::{ToolError, ToolHandler, ToolRegistry};

pub fn test_config() -> Config {
    Config {
        bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
        hume_api_key: "test-key".into(),
        hume_endpoint: "ws://127.0.0.1:1/chat".into(),
        hume_config_id: None,
        hume_voice_id: None,
        system_prompt: None,
        greeting: None,
        client_sample_rate: 16000,
        upstream_sample_rate: 16000,
        frame_duration_ms: 100,
        max_pending_frames: 1000,
        log_level: Level::DEBUG,
    }
}

pub fn app_state(config: Config, tools: ToolRegistry, dialer: impl Dialer + 'static) -> Arc<AppState> {
    Arc::new(AppState {
        config: Arc::new(config),
        tools: Arc::new(tools),
        dialer: Arc::new(dialer),
        resamplers: Arc::new(RubatoFactory),
    })
}

/// Waits briefly for the next message, panicking if none arrives.
pub async fn next<T>(rx: &mut mpsc::Receiver<T>) -> T {
    match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
        Ok(Some(message)) => message,
        Ok(None) => panic!("channel closed"),
        Err(_) => panic!("timed out waiting for a message"),
    }
}

/// Asserts that nothing arrives within a short grace period.
pub async fn assert_quiet<T: std::fmt::Debug>(rx: &mut mpsc::Receiver<T>) {
    if let Ok(Some(message)) = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
        panic!("unexpected message {message:?}");
    }
}

/// What the test side sees of the fake links.
pub struct UpstreamProbe {
    pub sent: mpsc::Receiver<ClientMessage>,
    closes: Arc<AtomicUsize>,
    listens: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<DialRequest>>>,
    events: Arc<Mutex<Option<mpsc::Sender<SessionEvent>>>>,
}

impl UpstreamProbe {
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn listens(&self) -> usize {
        self.listens.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<DialRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// The event queue of the most recently dialed session, for playing the
    /// provider's side of the conversation.
    pub fn session_events(&self) -> mpsc::Sender<SessionEvent> {
        self.events
            .lock()
            .unwrap()
            .clone()
            .expect("no session has dialed yet")
    }
}

/// Records everything sent to it.
pub struct FakeUpstream {
    sent: mpsc::Sender<ClientMessage>,
    closes: Arc<AtomicUsize>,
    listens: Arc<AtomicUsize>,
}

impl FakeUpstream {
    pub fn new() -> (Self, UpstreamProbe) {
        let (tx, rx) = mpsc::channel(256);
        let closes = Arc::new(AtomicUsize::new(0));
        let listens = Arc::new(AtomicUsize::new(0));
        let upstream = Self {
            sent: tx,
            closes: closes.clone(),
            listens: listens.clone(),
        };
        let probe = UpstreamProbe {
            sent: rx,
            closes,
            listens,
            requests: Arc::default(),
            events: Arc::default(),
        };
        (upstream, probe)
    }
}

#[async_trait]
impl Upstream for FakeUpstream {
    async fn send(&mut self, message: ClientMessage) -> Result<(), BridgeError> {
        self.sent
            .send(message)
            .await
            .map_err(|_| BridgeError::NotConnected)
    }

    fn listen(&mut self) {
        self.listens.fetch_add(1, Ordering::SeqCst);
    }

    async fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out [`FakeUpstream`]s sharing one probe. A gated dialer waits for
/// the test to open the gate before the link "connects".
pub struct FakeDialer {
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    fail: bool,
    sent: mpsc::Sender<ClientMessage>,
    closes: Arc<AtomicUsize>,
    listens: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<DialRequest>>>,
    events: Arc<Mutex<Option<mpsc::Sender<SessionEvent>>>>,
}

impl FakeDialer {
    pub fn new() -> (Self, UpstreamProbe) {
        Self::build(None, false)
    }

    pub fn gated() -> (Self, oneshot::Sender<()>, UpstreamProbe) {
        let (open, gate) = oneshot::channel();
        let (dialer, probe) = Self::build(Some(gate), false);
        (dialer, open, probe)
    }

    pub fn failing() -> (Self, UpstreamProbe) {
        Self::build(None, true)
    }

    fn build(gate: Option<oneshot::Receiver<()>>, fail: bool) -> (Self, UpstreamProbe) {
        let (upstream, probe) = FakeUpstream::new();
        let dialer = Self {
            gate: Mutex::new(gate),
            fail,
            sent: upstream.sent,
            closes: upstream.closes,
            listens: upstream.listens,
            requests: probe.requests.clone(),
            events: probe.events.clone(),
        };
        (dialer, probe)
    }
}

#[async_trait]
impl Dialer for FakeDialer {
    async fn dial(
        &self,
        request: DialRequest,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Box<dyn Upstream>, BridgeError> {
        self.requests.lock().unwrap().push(request);
        *self.events.lock().unwrap() = Some(events);
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if self.fail {
            return Err(BridgeError::Dial(EviError::InvalidEndpoint(
                "ws://127.0.0.1:1/chat".into(),
            )));
        }
        Ok(Box::new(FakeUpstream {
            sent: self.sent.clone(),
            closes: self.closes.clone(),
            listens: self.listens.clone(),
        }))
    }
}

/// Encodes integer samples as a WAV file.
pub fn wav_bytes(rate: u32, channels: u16, bits: u16, samples: &[i16]) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: bits,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &sample in samples {
            if bits == 8 {
                writer.write_sample(sample as i8).unwrap();
            } else {
                writer.write_sample(sample).unwrap();
            }
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// A tool handler backed by a closure.
pub struct FnTool<F>(pub F);

#[async_trait]
impl<F, Fut> ToolHandler for FnTool<F>
where
    F: Fn(String, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send,
{
    async fn call(&self, session_id: &str, parameters: Value) -> Result<Value, ToolError> {
        (self.0)(session_id.to_string(), parameters).await
    }
}
