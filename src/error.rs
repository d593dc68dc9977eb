//! Error types for the overhear pipeline

use thiserror::Error;

/// Result type alias for overhear operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (malformed trigger phrase, out-of-range threshold, missing key)
    #[error("configuration error: {0}")]
    Config(String),

    /// Caller passed an unusable argument (empty text, unknown trigger kind)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No usable capture or output device; the subsystem is disabled, not fatal
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Audio processing error (stream build, WAV encode, MP3 decode)
    #[error("audio error: {0}")]
    Audio(String),

    /// Transcription provider failed for one segment
    #[error("transcription unavailable: {0}")]
    TranscriptionUnavailable(String),

    /// Speech synthesis provider failed for one utterance
    #[error("speech synthesis unavailable: {0}")]
    SynthesisUnavailable(String),

    /// Completion provider failed for one prompt
    #[error("completion unavailable: {0}")]
    CompletionUnavailable(String),

    /// VAD model acquisition failed (download, extract, verify, load)
    #[error("vad model error: {0}")]
    VadModel(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
