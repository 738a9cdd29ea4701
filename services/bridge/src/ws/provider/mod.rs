//! Provider Bridge
//!
//! Owns one session's link to the voice provider: dials it, converts caller
//! audio into provider frames, and turns provider events back into client
//! messages. Tool calls are handed to [`dispatch::ToolDispatcher`].

pub mod dispatch;
pub mod hume;

use super::{
    error::BridgeError,
    protocol::{Role, ServerMessage},
    session::SessionEvent,
};
use crate::{
    audio::{
        AudioFrame, BYTES_PER_SAMPLE, Chunker, ResamplerBank, downmix_to_mono, encode_base64,
        pcm16_from_le_bytes, pcm16_to_le_bytes, wav,
    },
    config::Config,
    state::AppState,
};
use async_trait::async_trait;
use bytes::Bytes;
use dispatch::ToolDispatcher;
use hume_evi::{
    self as evi, AssistantInput, AudioEncoding, AudioInput, AudioSettings, ClientMessage,
    SessionSettings, ToolDefinition, ToolKind,
};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{Instrument, debug, info, warn};
use voicebridge_core::{ToolError, ToolRegistry};

/// An open link to the provider.
///
/// Sends on one link are issued one at a time by the owning session, so
/// implementations never see concurrent calls.
#[async_trait]
pub trait Upstream: Send {
    async fn send(&mut self, message: ClientMessage) -> Result<(), BridgeError>;

    /// Starts delivering provider messages to the session. Called once the
    /// session has attached the link, so replies always have somewhere to go.
    fn listen(&mut self);

    /// Closes the link. Calling it on an already closed link does nothing.
    async fn close(&mut self);
}

/// Everything the provider needs to open a chat for one session.
#[derive(Debug, Clone)]
pub struct DialRequest {
    pub session_id: String,
    /// Sent as the first message on the new link.
    pub settings: SessionSettings,
}

/// Opens provider links.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Connects and announces `request.settings`.
    ///
    /// Once [`Upstream::listen`] is called, messages arriving on the link are
    /// posted to `events` as [`SessionEvent::Upstream`], followed by exactly
    /// one [`SessionEvent::UpstreamClosed`] when the link ends.
    async fn dial(
        &self,
        request: DialRequest,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Box<dyn Upstream>, BridgeError>;
}

pub struct ProviderBridge {
    session_id: String,
    config: Arc<Config>,
    dialer: Arc<dyn Dialer>,
    tools: Arc<ToolRegistry>,
    upstream: Option<Box<dyn Upstream>>,
    dial_task: Option<JoinHandle<()>>,
    resamplers: ResamplerBank,
    chunker: Chunker,
    dispatcher: ToolDispatcher,
    client: mpsc::Sender<ServerMessage>,
    events: mpsc::Sender<SessionEvent>,
}

impl ProviderBridge {
    pub fn new(
        session_id: String,
        state: &AppState,
        client: mpsc::Sender<ServerMessage>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let config = state.config.clone();
        let chunker = Chunker::for_format(
            config.upstream_sample_rate,
            1,
            BYTES_PER_SAMPLE,
            Duration::from_millis(config.frame_duration_ms as u64),
        );
        Self {
            dispatcher: ToolDispatcher::new(session_id.clone(), state.tools.clone(), events.clone()),
            session_id,
            config,
            dialer: state.dialer.clone(),
            tools: state.tools.clone(),
            upstream: None,
            dial_task: None,
            resamplers: ResamplerBank::new(state.resamplers.clone()),
            chunker,
            client,
            events,
        }
    }

    /// The settings announced when the link opens: audio format, system
    /// prompt and every registered tool.
    pub fn session_settings(&self) -> SessionSettings {
        let tools = self
            .tools
            .specs()
            .map(|spec| ToolDefinition {
                kind: ToolKind::Function,
                name: spec.name.clone(),
                parameters: spec.input_schema.to_string(),
                description: Some(spec.description.clone()).filter(|d| !d.is_empty()),
            })
            .collect();
        SessionSettings {
            audio: Some(AudioSettings {
                encoding: AudioEncoding::Linear16,
                sample_rate: self.config.upstream_sample_rate,
                channels: 1,
            }),
            system_prompt: self.config.system_prompt.clone(),
            custom_session_id: Some(self.session_id.clone()),
            tools,
        }
    }

    /// Dials in the background. The result comes back to the session as
    /// [`SessionEvent::UpstreamOpened`] or [`SessionEvent::DialFailed`].
    pub fn start_dial(&mut self) {
        if self.upstream.is_some() || self.dial_task.is_some() {
            warn!("Upstream already dialed; ignoring");
            return;
        }
        let request = DialRequest {
            session_id: self.session_id.clone(),
            settings: self.session_settings(),
        };
        info!(tools = request.settings.tools.len(), "Dialing upstream");

        let dialer = self.dialer.clone();
        let events = self.events.clone();
        let task = async move {
            let event = match dialer.dial(request, events.clone()).await {
                Ok(upstream) => SessionEvent::UpstreamOpened(upstream),
                Err(e) => SessionEvent::DialFailed(e),
            };
            if let Err(mpsc::error::SendError(SessionEvent::UpstreamOpened(mut upstream))) =
                events.send(event).await
            {
                debug!("Session closed while dialing; dropping new link");
                upstream.close().await;
            }
        };
        self.dial_task = Some(tokio::spawn(task.in_current_span()));
    }

    pub fn attach(&mut self, mut upstream: Box<dyn Upstream>) {
        self.dial_task = None;
        upstream.listen();
        self.upstream = Some(upstream);
        info!("Upstream link open");
    }

    #[cfg(test)]
    pub(crate) fn is_connected(&self) -> bool {
        self.upstream.is_some()
    }

    /// Asks the assistant to speak the configured greeting, if any.
    pub async fn greet(&mut self) -> Result<(), BridgeError> {
        let Some(text) = self.config.greeting.clone() else {
            return Ok(());
        };
        debug!("Sending greeting");
        self.send_upstream(ClientMessage::AssistantInput(AssistantInput { text }))
            .await
    }

    /// Sends one caller frame upstream: resampled to the provider rate, then
    /// split into frames sent in order.
    pub async fn forward_audio(&mut self, frame: AudioFrame) -> Result<(), BridgeError> {
        if self.upstream.is_none() {
            return Err(BridgeError::NotConnected);
        }
        let frame = self
            .resamplers
            .convert(frame, self.config.upstream_sample_rate)?;
        for chunk in self.chunker.split(frame.pcm) {
            let input = AudioInput::from_pcm(&chunk, Some(self.session_id.clone()));
            self.send_upstream(ClientMessage::AudioInput(input)).await?;
        }
        Ok(())
    }

    /// Translates one provider event for the client.
    pub async fn on_upstream(&mut self, message: evi::ServerMessage) -> Result<(), BridgeError> {
        match message {
            evi::ServerMessage::UserMessage(message) => {
                if message.interim == Some(true) {
                    return Ok(());
                }
                self.relay_transcript(Role::User, message.message.content).await
            }
            evi::ServerMessage::AssistantMessage(message) => {
                self.relay_transcript(Role::Agent, message.message.content).await
            }
            evi::ServerMessage::UserInterruption(_) => {
                debug!("Caller interrupted the assistant");
                self.resamplers.reset_into(self.config.client_sample_rate);
                self.send_client(ServerMessage::Interruption).await
            }
            evi::ServerMessage::AudioOutput(output) => self.relay_audio(output).await,
            evi::ServerMessage::ToolCall(call) => match self.dispatcher.dispatch(call) {
                Some(response) => {
                    self.send_upstream(ClientMessage::ToolResponse(response))
                        .await
                }
                None => Ok(()),
            },
            evi::ServerMessage::Error(error) => {
                warn!(code = ?error.code, slug = ?error.slug, message = %error.message, "Upstream reported an error");
                self.send_client(ServerMessage::error(error.message)).await
            }
            evi::ServerMessage::ChatMetadata(metadata) => {
                info!(chat_id = %metadata.chat_id, chat_group_id = %metadata.chat_group_id, "Upstream chat started");
                Ok(())
            }
            evi::ServerMessage::AssistantEnd(_) => {
                debug!("Assistant finished its turn");
                Ok(())
            }
            evi::ServerMessage::Unknown => {
                debug!("Ignoring unrecognised upstream message");
                Ok(())
            }
        }
    }

    /// Reports a finished tool call upstream.
    pub async fn complete_tool(
        &mut self,
        call_id: &str,
        outcome: Result<Value, ToolError>,
    ) -> Result<(), BridgeError> {
        match self.dispatcher.complete(call_id, outcome) {
            Some(response) => {
                self.send_upstream(ClientMessage::ToolResponse(response))
                    .await
            }
            None => Ok(()),
        }
    }

    /// Forgets a link the provider already closed, without sending on it.
    pub fn upstream_lost(&mut self) {
        self.upstream = None;
    }

    /// Stops dialing, abandons pending tool calls and closes the link.
    /// Safe to call more than once.
    pub async fn shutdown(&mut self) {
        if let Some(task) = self.dial_task.take() {
            task.abort();
        }
        self.dispatcher.abandon();
        if let Some(mut upstream) = self.upstream.take() {
            upstream.close().await;
            info!("Upstream link closed");
        }
    }

    async fn relay_transcript(&mut self, role: Role, text: Option<String>) -> Result<(), BridgeError> {
        match text.filter(|t| !t.is_empty()) {
            Some(text) => self.send_client(ServerMessage::Transcript { role, text }).await,
            None => Ok(()),
        }
    }

    async fn relay_audio(&mut self, output: evi::AudioOutput) -> Result<(), BridgeError> {
        let bytes = match output.decode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Dropping upstream audio with invalid base64");
                return Ok(());
            }
        };
        let parsed = wav::parse(Bytes::from(bytes));
        let (sample_rate, channels) = match parsed.format {
            Some(format) if format.bits_per_sample != 16 => {
                warn!(bits = format.bits_per_sample, "Dropping upstream audio that is not 16-bit PCM");
                return Ok(());
            }
            Some(format) => (format.sample_rate, format.channels as usize),
            None => (self.config.upstream_sample_rate, 1),
        };
        let pcm = if channels > 1 {
            let mono = downmix_to_mono(&pcm16_from_le_bytes(&parsed.payload), channels);
            Bytes::from(pcm16_to_le_bytes(&mono))
        } else {
            parsed.payload
        };

        // Each audio_output is a whole utterance.
        let frame = self.resamplers.convert_complete(
            AudioFrame::new(sample_rate, pcm),
            self.config.client_sample_rate,
        )?;
        if frame.is_empty() {
            return Ok(());
        }
        self.send_client(ServerMessage::Audio {
            audio: encode_base64(&frame.pcm),
        })
        .await
    }

    async fn send_upstream(&mut self, message: ClientMessage) -> Result<(), BridgeError> {
        let upstream = self.upstream.as_mut().ok_or(BridgeError::NotConnected)?;
        upstream.send(message).await
    }

    async fn send_client(&mut self, message: ServerMessage) -> Result<(), BridgeError> {
        self.client
            .send(message)
            .await
            .map_err(|_| BridgeError::ClientGone)
    }
}
