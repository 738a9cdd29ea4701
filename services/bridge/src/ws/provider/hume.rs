//! The Hume EVI link.

use super::{DialRequest, Dialer, Upstream};
use crate::{
    config::Config,
    ws::{error::BridgeError, session::SessionEvent},
};
use async_trait::async_trait;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use hume_evi::{ClientMessage, EviConfig, EviError, EviSocket};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tracing::{Instrument, debug, info, warn};

pub struct HumeDialer {
    config: EviConfig,
}

impl HumeDialer {
    pub fn new(config: EviConfig) -> Self {
        Self { config }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            EviConfig::new(config.hume_api_key.clone())
                .with_endpoint(config.hume_endpoint.clone())
                .with_config_id(config.hume_config_id.clone())
                .with_voice_id(config.hume_voice_id.clone()),
        )
    }
}

#[async_trait]
impl Dialer for HumeDialer {
    async fn dial(
        &self,
        request: DialRequest,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Box<dyn Upstream>, BridgeError> {
        let socket = hume_evi::connect(&self.config)
            .await
            .map_err(BridgeError::Dial)?;
        let (mut sink, stream) = socket.split();

        let settings = hume_evi::encode(&ClientMessage::SessionSettings(request.settings))
            .map_err(BridgeError::Dial)?;
        sink.send(settings)
            .await
            .map_err(|e| BridgeError::Dial(EviError::from(e)))?;
        info!(session_id = %request.session_id, "Session settings sent to EVI.");

        Ok(Box::new(HumeUpstream {
            sink,
            stream: Some(stream),
            events,
            reader: None,
        }))
    }
}

struct HumeUpstream {
    sink: SplitSink<EviSocket, WsMessage>,
    /// Taken by the reader task on `listen`.
    stream: Option<SplitStream<EviSocket>>,
    events: mpsc::Sender<SessionEvent>,
    reader: Option<JoinHandle<()>>,
}

impl HumeUpstream {
    fn stop_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

#[async_trait]
impl Upstream for HumeUpstream {
    async fn send(&mut self, message: ClientMessage) -> Result<(), BridgeError> {
        let frame = hume_evi::encode(&message)?;
        self.sink.send(frame).await.map_err(EviError::from)?;
        Ok(())
    }

    fn listen(&mut self) {
        if let Some(stream) = self.stream.take() {
            let reader = read_upstream(stream, self.events.clone());
            self.reader = Some(tokio::spawn(reader.in_current_span()));
        }
    }

    async fn close(&mut self) {
        self.stream = None;
        self.stop_reader();
        if let Err(e) = self.sink.close().await {
            debug!(error = %e, "EVI socket was already closed");
        }
    }
}

impl Drop for HumeUpstream {
    fn drop(&mut self) {
        self.stop_reader();
    }
}

/// Posts every EVI message to the session, then one close notification.
async fn read_upstream(mut stream: SplitStream<EviSocket>, events: mpsc::Sender<SessionEvent>) {
    let reason = loop {
        match stream.next().await {
            Some(Ok(WsMessage::Text(text))) => match hume_evi::decode(text.as_str()) {
                Ok(message) => {
                    if events.send(SessionEvent::Upstream(message)).await.is_err() {
                        return;
                    }
                }
                Err(e) => warn!(error = %e, "Dropping malformed EVI message"),
            },
            Some(Ok(WsMessage::Close(frame))) => {
                break frame.map(|f| f.reason.as_str().to_owned());
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => break Some(e.to_string()),
            None => break None,
        }
    };
    info!(reason = reason.as_deref().unwrap_or(""), "EVI socket closed.");
    let _ = events.send(SessionEvent::UpstreamClosed(reason)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::testing::next;
    use std::time::Duration;
    use tokio::{net::TcpListener, time::timeout};

    /// A one-connection EVI stand-in that reads the settings frame and then
    /// immediately asks for a tool.
    async fn eager_evi() -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut socket = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let settings = socket.next().await.unwrap().unwrap();
            let call = r#"{"type":"tool_call","tool_call_id":"early-1","name":"get_current_time","parameters":"{}"}"#;
            socket.send(WsMessage::Text(call.into())).await.unwrap();
            // Hold the socket open until the bridge hangs up.
            while let Some(Ok(frame)) = socket.next().await {
                if frame.is_close() {
                    break;
                }
            }
            settings.to_text().unwrap().to_owned()
        });
        (format!("ws://{addr}/v0/evi/chat"), server)
    }

    fn request() -> DialRequest {
        DialRequest {
            session_id: "call-7".into(),
            settings: hume_evi::SessionSettings {
                custom_session_id: Some("call-7".into()),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_messages_wait_for_listen() {
        let (endpoint, server) = eager_evi().await;
        let dialer = HumeDialer::new(EviConfig::new("test-key").with_endpoint(endpoint));
        let (events_tx, mut events_rx) = mpsc::channel(8);

        let mut upstream = dialer.dial(request(), events_tx).await.unwrap();
        assert!(
            timeout(Duration::from_millis(100), events_rx.recv()).await.is_err(),
            "provider message delivered before listen"
        );

        upstream.listen();
        match next(&mut events_rx).await {
            SessionEvent::Upstream(hume_evi::ServerMessage::ToolCall(call)) => {
                assert_eq!(call.tool_call_id, "early-1");
            }
            _ => panic!("expected the tool call after listen"),
        }

        upstream.close().await;
        let settings = server.await.unwrap();
        assert!(settings.contains(r#""type":"session_settings""#), "{settings}");
        assert!(settings.contains("call-7"), "{settings}");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_a_dial_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let dialer = HumeDialer::new(EviConfig::new("k").with_endpoint(format!("ws://{addr}/chat")));
        let (events_tx, _events_rx) = mpsc::channel(1);

        let err = dialer.dial(request(), events_tx).await.err().unwrap();
        assert!(matches!(err, BridgeError::Dial(_)));
    }
}
