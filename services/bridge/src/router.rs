//! Axum Router Configuration

use crate::{state::AppState, ws::ws_handler};
use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{decode_base64, encode_base64},
        ws::{
            session::SessionEvent,
            testing::{FakeDialer, app_state, next, test_config},
        },
    };
    use futures_util::{SinkExt, StreamExt};
    use hume_evi::ClientMessage as EviClientMessage;
    use serde_json::{Value, json};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
    };
    use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
    use voicebridge_core::ToolRegistry;

    async fn serve(state: Arc<AppState>) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, create_router(state)).await.unwrap() });
        addr
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (dialer, _probe) = FakeDialer::new();
        let addr = serve(app_state(test_config(), ToolRegistry::default(), dialer)).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.ends_with("ok"), "{response}");
    }

    #[tokio::test]
    async fn test_websocket_session_end_to_end() {
        let (dialer, mut probe) = FakeDialer::new();
        let addr = serve(app_state(test_config(), ToolRegistry::default(), dialer)).await;

        let (mut socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        socket
            .send(WsMessage::Text(r#"{"type":"init","uuid":"e2e-1"}"#.into()))
            .await
            .unwrap();
        let audio = json!({"type": "audio", "audio": encode_base64(&[1, 2, 3, 4])});
        socket
            .send(WsMessage::Text(audio.to_string().into()))
            .await
            .unwrap();

        match next(&mut probe.sent).await {
            EviClientMessage::AudioInput(input) => {
                assert_eq!(decode_base64(&input.data).unwrap(), vec![1, 2, 3, 4]);
                assert_eq!(input.custom_session_id.as_deref(), Some("e2e-1"));
            }
            other => panic!("expected audio_input, got {other:?}"),
        }

        let transcript = hume_evi::ServerMessage::from_json(
            r#"{"type":"assistant_message","message":{"role":"assistant","content":"Hello!"}}"#,
        )
        .unwrap();
        probe
            .session_events()
            .send(SessionEvent::Upstream(transcript))
            .await
            .unwrap();

        let frame = socket.next().await.unwrap().unwrap();
        let received: Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
        assert_eq!(received, json!({"type": "transcript", "role": "agent", "text": "Hello!"}));

        socket.close(None).await.unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while probe.closes() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("upstream was not closed after the client hung up");
    }
}
