//! WebSocket Session Management
//!
//! - `protocol`: the JSON messages exchanged with the telephony client.
//! - `session`: the per-connection state machine.
//! - `provider`: the link to the voice provider and tool dispatch.
//! - `handler`: the axum endpoint that accepts client sockets.

pub mod error;
mod handler;
pub mod protocol;
pub mod provider;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use error::BridgeError;
pub use handler::ws_handler;
