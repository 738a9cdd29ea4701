//! Defines the JSON message protocol between the telephony client and the bridge.

use serde::{Deserialize, Serialize};

/// Messages sent from the client to the server.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Starts the session. Only the first one is honoured.
    Init {
        /// Opaque session token chosen by the client.
        uuid: String,
    },
    /// A chunk of caller audio (base64 PCM16 mono at the client rate).
    Audio {
        #[serde(default)]
        audio: Option<String>,
    },
}

/// Speaker tag on relayed transcripts.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

/// Messages sent from the server to the client.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Assistant speech, base64 PCM16 mono at the client rate.
    Audio { audio: String },
    Transcript { role: Role, text: String },
    /// The caller started talking over the assistant.
    Interruption,
    /// Reports a problem to the client. Fatal only when the socket closes after it.
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}
