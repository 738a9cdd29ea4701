//! Voice Bridge Library Crate
//!
//! Bridges telephony clients speaking a small JSON audio protocol to the Hume
//! EVI voice API. The `voicebridge` binary is a thin wrapper around this library.

pub mod audio;
pub mod config;
pub mod router;
pub mod state;
pub mod ws;
