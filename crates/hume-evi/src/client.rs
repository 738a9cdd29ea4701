use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, protocol::Message},
};
use tracing::info;

use crate::{ClientMessage, EviConfig, EviError, ServerMessage};

/// An open EVI chat socket.
pub type EviSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens the chat socket. Session settings are the caller's first send.
pub async fn connect(config: &EviConfig) -> Result<EviSocket, EviError> {
    let url = config.socket_url()?;
    let mut request = url.as_str().into_client_request()?;
    let api_key = HeaderValue::from_str(config.api_key())
        .map_err(|e| EviError::InvalidCredential(e.to_string()))?;
    request
        .headers_mut()
        .insert(crate::config::API_KEY_HEADER, api_key);

    let (socket, response) = connect_async(request).await?;
    info!(status = %response.status(), endpoint = %url.path(), "Connected to EVI chat socket.");
    Ok(socket)
}

/// Serializes a client envelope into a text frame.
pub fn encode(message: &ClientMessage) -> Result<Message, EviError> {
    Ok(Message::Text(message.to_json()?.into()))
}

/// Parses a text frame into a server envelope.
pub fn decode(text: &str) -> Result<ServerMessage, EviError> {
    Ok(ServerMessage::from_json(text)?)
}
