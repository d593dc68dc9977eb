//! External collaborator interfaces
//!
//! The pipeline only ever sees these traits; the concrete HTTP
//! backends live in the submodules and are selected by configuration.

mod llm;
mod stt;
mod tts;

pub use llm::ChatCompletion;
pub use stt::SpeechToText;
pub use tts::TextToSpeech;

use async_trait::async_trait;

use crate::Result;
use crate::audio::AudioSegment;

/// One transcription result for a speech segment
///
/// `alternatives` are confidence-ranked and never include the primary
/// transcript; they may be empty (Whisper returns a single hypothesis).
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    /// Best hypothesis
    pub text: String,

    /// Lower-ranked hypotheses, best first
    pub alternatives: Vec<TranscriptAlternative>,
}

/// A ranked alternative transcription
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptAlternative {
    pub text: String,
    pub confidence: f32,
}

impl Transcript {
    /// A transcript with no alternatives
    #[must_use]
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            alternatives: Vec::new(),
        }
    }
}

/// Converts one audio segment into a transcript
#[async_trait]
pub trait TranscriptionClient: Send + Sync {
    /// Transcribe a segment
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::TranscriptionUnavailable`] on provider failure.
    async fn transcribe(&self, segment: &AudioSegment) -> Result<Transcript>;
}

/// Synthesizes speech audio from text
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    /// Synthesize `text`, returning encoded audio (MP3)
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::SynthesisUnavailable`] on provider failure.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Produces a text completion for a prompt
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Complete `prompt`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::CompletionUnavailable`] on provider failure.
    async fn complete(&self, prompt: &str) -> Result<String>;
}
