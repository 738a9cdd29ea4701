//! Accepts client sockets and wires them to a [`Session`].

use super::{
    protocol::ServerMessage,
    session::{Session, SessionEvent},
};
use crate::state::AppState;
use anyhow::Result;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, instrument, warn};

const CLIENT_QUEUE_DEPTH: usize = 256;
const EVENT_QUEUE_DEPTH: usize = 256;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Runs one client connection to completion.
///
/// The socket is split: a reader task turns frames into session events and a
/// writer task drains the session's outgoing messages. The session itself
/// runs here, and once it finishes the writer flushes and closes the socket.
#[instrument(name = "client_session", skip_all, fields(conn_id, session_uuid))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let conn_id: u32 = rand::random();
    tracing::Span::current().record("conn_id", conn_id);
    info!("New client connection.");

    let (socket_tx, socket_rx) = socket.split();
    let (client_tx, client_rx) = mpsc::channel(CLIENT_QUEUE_DEPTH);
    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

    let writer = tokio::spawn(write_client(socket_tx, client_rx).in_current_span());
    let reader = tokio::spawn(read_client(socket_rx, events_tx.clone()).in_current_span());

    Session::new(state, client_tx, events_tx).run(events_rx).await;

    reader.abort();
    if let Err(e) = writer.await {
        debug!(error = %e, "Client writer ended abnormally");
    }
    info!("Client connection closed.");
}

async fn read_client(mut socket_rx: SplitStream<WebSocket>, events: mpsc::Sender<SessionEvent>) {
    let reason = loop {
        match socket_rx.next().await {
            Some(Ok(Message::Text(text))) => {
                if events
                    .send(SessionEvent::ClientText(text.as_str().to_owned()))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Some(Ok(Message::Binary(_))) => warn!("Ignoring binary frame from client."),
            Some(Ok(Message::Close(frame))) => break frame.map(|f| f.reason.as_str().to_owned()),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Err(e)) => break Some(e.to_string()),
            None => break None,
        }
    };
    let _ = events.send(SessionEvent::ClientClosed(reason)).await;
}

async fn write_client(
    mut socket_tx: SplitSink<WebSocket, Message>,
    mut outgoing: mpsc::Receiver<ServerMessage>,
) {
    while let Some(message) = outgoing.recv().await {
        if let Err(e) = send_msg(&mut socket_tx, message).await {
            warn!(error = %e, "Failed to write to client socket.");
            return;
        }
    }
    if let Err(e) = socket_tx.close().await {
        debug!(error = %e, "Client socket was already closed");
    }
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
