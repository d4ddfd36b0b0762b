use std::net::{IpAddr, SocketAddr};
use tracing::Level;

/// Default inbound message limit: 50 MiB, enough for a recorded voice clip.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 50 * 1024 * 1024;

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
    pub client_url: String,
    pub openai_api_key: String,
    pub openai_api_base: String,
    pub chat_model: String,
    pub ml_service_url: String,
    pub log_level: Level,
    pub max_message_bytes: usize,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let host_str = std::env::var("BIND_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let host = host_str
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_HOST".to_string(), e.to_string()))?;

        let port_str = std::env::var("PORT").unwrap_or_else(|_| "3001".to_string());
        let port = port_str
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), e.to_string()))?;

        let client_url =
            std::env::var("CLIENT_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
        if client_url.parse::<axum::http::HeaderValue>().is_err() {
            return Err(ConfigError::InvalidValue(
                "CLIENT_URL".to_string(),
                format!("'{}' is not a valid origin", client_url),
            ));
        }

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let openai_api_base = std::env::var("OPENAI_API_BASE")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

        let chat_model =
            std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-3.5-turbo".to_string());

        let ml_service_url =
            std::env::var("ML_SERVICE_URL").unwrap_or_else(|_| "http://localhost:5000".to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let max_message_bytes = match std::env::var("MAX_MESSAGE_BYTES") {
            Ok(value) => value.parse::<usize>().map_err(|e| {
                ConfigError::InvalidValue("MAX_MESSAGE_BYTES".to_string(), e.to_string())
            })?,
            Err(_) => DEFAULT_MAX_MESSAGE_BYTES,
        };

        Ok(Self {
            bind_address: SocketAddr::new(host, port),
            client_url,
            openai_api_key,
            openai_api_base,
            chat_model,
            ml_service_url,
            log_level,
            max_message_bytes,
        })
    }
}
