//! Error types for Magi

use thiserror::Error;

/// Result type alias for Magi operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Magi
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or decoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Wake word detection error
    #[error("wake word error: {0}")]
    WakeWord(String),

    /// Remote assistant API error
    #[error("assistant error: {0}")]
    Assistant(String),

    /// Local tool execution error
    #[error("tool error: {0}")]
    Tool(String),

    /// Remote resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation aborted by a shutdown request
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Operation exceeded its time budget
    #[error("timed out: {0}")]
    Timeout(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WAV encoding/decoding error
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
}
