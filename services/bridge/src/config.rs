use hume_evi::DEFAULT_EVI_URL;
use std::net::SocketAddr;
use std::str::FromStr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub hume_api_key: String,
    pub hume_endpoint: String,
    pub hume_config_id: Option<String>,
    pub hume_voice_id: Option<String>,
    pub system_prompt: Option<String>,
    /// Spoken by the assistant as soon as the upstream link is ready.
    pub greeting: Option<String>,
    pub client_sample_rate: u32,
    pub upstream_sample_rate: u32,
    pub frame_duration_ms: u32,
    pub max_pending_frames: usize,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address = match std::env::var("BIND_ADDRESS") {
            Ok(addr) => addr
                .parse::<SocketAddr>()
                .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?,
            Err(_) => {
                let port: u16 = parse_var("PORT", 8080)?;
                SocketAddr::from(([0, 0, 0, 0], port))
            }
        };

        let hume_api_key = std::env::var("HUME_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("HUME_API_KEY".to_string()))?;

        let hume_endpoint =
            std::env::var("HUME_EVI_URL").unwrap_or_else(|_| DEFAULT_EVI_URL.to_string());

        let client_sample_rate = parse_positive("CLIENT_SAMPLE_RATE", 8000)?;
        let upstream_sample_rate = parse_positive("UPSTREAM_SAMPLE_RATE", 48000)?;
        let frame_duration_ms = parse_positive("FRAME_DURATION_MS", 100)?;
        let max_pending_frames = parse_positive("MAX_PENDING_FRAMES", 1000)?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            hume_api_key,
            hume_endpoint,
            hume_config_id: optional_var("HUME_CONFIG_ID"),
            hume_voice_id: optional_var("HUME_VOICE_ID"),
            system_prompt: optional_var("SYSTEM_PROMPT"),
            greeting: optional_var("GREETING"),
            client_sample_rate,
            upstream_sample_rate,
            frame_duration_ms,
            max_pending_frames,
            log_level,
        })
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

fn parse_positive<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let value = parse_var(name, default)?;
    if value <= T::default() {
        return Err(ConfigError::InvalidValue(
            name.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(value)
}
