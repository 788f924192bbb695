//! Error types for the Timewalk voice core

use thiserror::Error;
use timewalk_core::CoreError;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur in the voice orchestration system
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Recognizer error: {0}")]
    Stt(String),

    #[error("Recognizer stream closed")]
    SttClosed,

    #[error("TTS error: {0}")]
    Tts(String),

    /// Session acquisition failed (capacity limit, handshake, or setup rejected).
    #[error("Synthesis unavailable: {0}")]
    SynthesisUnavailable(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Tool argument error for {tool}: {message}")]
    ToolArguments { tool: String, message: String },

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Client channel closed")]
    ClientClosed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl VoiceError {
    /// Whether a synthesis acquisition failure may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VoiceError::SynthesisUnavailable(_) | VoiceError::WebSocket(_) | VoiceError::Http(_)
        )
    }
}
