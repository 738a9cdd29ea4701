//! Hume EVI chat protocol
//!
//! Typed envelopes for the EVI chat socket plus the dial that opens it. The
//! crate holds no session state; reading and writing the socket is left to
//! the caller.

mod client;
mod config;
mod messages;

pub use client::{EviSocket, connect, decode, encode};
pub use config::{API_KEY_HEADER, DEFAULT_EVI_URL, EviConfig};
pub use messages::*;

/// Errors raised while dialing or framing EVI traffic.
#[derive(Debug, thiserror::Error)]
pub enum EviError {
    #[error("Invalid EVI endpoint {0}")]
    InvalidEndpoint(String),
    #[error("Invalid EVI credential: {0}")]
    InvalidCredential(String),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Malformed EVI message: {0}")]
    Json(#[from] serde_json::Error),
}
