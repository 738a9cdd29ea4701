use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::EviError;

/// Production chat socket endpoint.
pub const DEFAULT_EVI_URL: &str = "wss://api.hume.ai/v0/evi/chat";

/// Header carrying the API key on the upgrade request.
pub const API_KEY_HEADER: &str = "X-Hume-Api-Key";

/// Connection parameters for an EVI chat socket.
#[derive(Debug)]
pub struct EviConfig {
    api_key: SecretString,
    pub endpoint: String,
    /// Dashboard configuration to run the chat with.
    pub config_id: Option<String>,
    pub voice_id: Option<String>,
}

impl EviConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::from(api_key.into()),
            endpoint: DEFAULT_EVI_URL.to_string(),
            config_id: None,
            voice_id: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_config_id(mut self, config_id: Option<String>) -> Self {
        self.config_id = config_id;
        self
    }

    pub fn with_voice_id(mut self, voice_id: Option<String>) -> Self {
        self.voice_id = voice_id;
        self
    }

    pub(crate) fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// Builds the socket URL. The credential travels in a header, never in the query.
    pub fn socket_url(&self) -> Result<Url, EviError> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| EviError::InvalidEndpoint(format!("{}: {e}", self.endpoint)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(EviError::InvalidEndpoint(format!(
                "{}: scheme must be ws or wss",
                self.endpoint
            )));
        }
        {
            let mut query = url.query_pairs_mut();
            if let Some(config_id) = &self.config_id {
                query.append_pair("config_id", config_id);
            }
            if let Some(voice_id) = &self.voice_id {
                query.append_pair("voice_id", voice_id);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        Ok(url)
    }
}
