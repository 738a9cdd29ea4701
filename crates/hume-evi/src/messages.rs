//! Envelope types for the EVI chat socket.
//!
//! Every frame on the socket is a JSON object discriminated by its `type`
//! field. Only the kinds the bridge produces or consumes are modelled; any
//! other server kind decodes to [`ServerMessage::Unknown`].

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};

/// Messages sent from the bridge to EVI.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Per-chat settings, sent once right after connecting.
    SessionSettings(SessionSettings),
    /// A chunk of caller audio.
    AudioInput(AudioInput),
    /// Text the assistant should speak verbatim.
    AssistantInput(AssistantInput),
    /// The result of a tool invocation, correlated by `tool_call_id`.
    ToolResponse(ToolResponse),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_session_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioSettings {
    pub encoding: AudioEncoding,
    pub sample_rate: u32,
    pub channels: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioEncoding {
    /// Signed 16-bit little-endian PCM.
    #[default]
    Linear16,
}

/// A tool announced to EVI in the session settings.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: ToolKind,
    pub name: String,
    /// JSON schema of the parameters, encoded as a JSON string.
    pub parameters: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    #[default]
    Function,
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioInput {
    /// Base64-encoded PCM16 mono.
    pub data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_session_id: Option<String>,
}

impl AudioInput {
    pub fn from_pcm(pcm: &[u8], custom_session_id: Option<String>) -> Self {
        Self {
            data: BASE64.encode(pcm),
            custom_session_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AssistantInput {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolResponse {
    pub tool_call_id: String,
    /// Tool result, encoded as a JSON string.
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

/// Messages received from EVI.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ChatMetadata(ChatMetadata),
    UserMessage(ChatMessage),
    AssistantMessage(ChatMessage),
    UserInterruption(UserInterruption),
    AudioOutput(AudioOutput),
    AssistantEnd(AssistantEnd),
    ToolCall(ToolCall),
    Error(EviErrorMessage),
    /// Any kind this crate does not model.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMetadata {
    pub chat_id: String,
    pub chat_group_id: String,
}

/// A transcript line, used for both `user_message` and `assistant_message`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub id: Option<String>,
    pub message: MessageContent,
    #[serde(default)]
    pub interim: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageContent {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserInterruption {
    #[serde(default)]
    pub time: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioOutput {
    #[serde(default)]
    pub id: Option<String>,
    /// Base64 audio; usually a complete WAV file.
    pub data: String,
}

impl AudioOutput {
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.data)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantEnd {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolCall {
    pub tool_call_id: String,
    pub name: String,
    /// Arguments as a JSON string; may be empty.
    #[serde(default)]
    pub parameters: String,
    #[serde(default)]
    pub response_required: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EviErrorMessage {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    pub message: String,
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ServerMessage {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
