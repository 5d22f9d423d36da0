//! Service configuration, loaded once from the environment at startup.

use std::env;
use std::time::Duration;

/// Holds all configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub openai_api_key: String,
    pub chat_model: String,
    pub transcribe_model: String,
    pub tesseract_bin: String,
    pub bind_addr: String,
    /// How long a session outlives its connection so the report endpoint
    /// can still find it.
    pub session_linger: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidVar(String, String),
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// * `OPENAI_API_KEY`: Required. Used for transcription, question
    ///   generation, evaluation, and reports.
    /// * `CHAT_MODEL`: (Optional) Generation model. Defaults to "gpt-4".
    /// * `TRANSCRIBE_MODEL`: (Optional) Defaults to "whisper-1".
    /// * `TESSERACT_BIN`: (Optional) OCR binary. Defaults to "tesseract".
    /// * `BIND_ADDR`: (Optional) Defaults to "0.0.0.0:8000".
    /// * `SESSION_LINGER_SECS`: (Optional) Defaults to 300.
    ///
    /// Logging is configured separately through `RUST_LOG` filter
    /// directives, read by the tracing subscriber in `main`.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env for local development; ignored if not present.
        dotenvy::dotenv().ok();

        let openai_api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let chat_model = env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4".to_string());
        let transcribe_model =
            env::var("TRANSCRIBE_MODEL").unwrap_or_else(|_| "whisper-1".to_string());
        let tesseract_bin = env::var("TESSERACT_BIN").unwrap_or_else(|_| "tesseract".to_string());
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());

        let linger_str = env::var("SESSION_LINGER_SECS").unwrap_or_else(|_| "300".to_string());
        let session_linger = linger_str
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidVar("SESSION_LINGER_SECS".to_string(), linger_str))?;

        Ok(Self {
            openai_api_key,
            chat_model,
            transcribe_model,
            tesseract_bin,
            bind_addr,
            session_linger,
        })
    }
}
