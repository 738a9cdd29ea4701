use crate::audio::ResampleError;
use hume_evi::EviError;

/// Failures inside one session's bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("upstream connection failed: {0}")]
    Dial(#[source] EviError),
    #[error("upstream send failed: {0}")]
    Upstream(#[from] EviError),
    #[error("upstream link is not open")]
    NotConnected,
    #[error("audio conversion failed: {0}")]
    Resample(#[from] ResampleError),
    #[error("client socket closed")]
    ClientGone,
}

impl BridgeError {
    /// Whether the session must close. Non-fatal errors only cost the current message.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Dial(_) | Self::Upstream(_) | Self::ClientGone => true,
            Self::NotConnected | Self::Resample(_) => false,
        }
    }
}
