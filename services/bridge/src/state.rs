//! Shared Application State

use crate::{audio::ResamplerFactory, config::Config, ws::provider::Dialer};
use std::sync::Arc;
use voicebridge_core::ToolRegistry;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Read-only after startup; shared by every session.
    pub tools: Arc<ToolRegistry>,
    pub dialer: Arc<dyn Dialer>,
    /// Each session builds its own resamplers from this.
    pub resamplers: Arc<dyn ResamplerFactory>,
}
