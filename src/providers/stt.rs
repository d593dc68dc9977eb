//! Speech-to-text (STT) backends

use async_trait::async_trait;

use crate::audio::{AudioSegment, samples_to_wav};
use crate::{Error, Result};

use super::{Transcript, TranscriptAlternative, TranscriptionClient};

const WHISPER_BASE_URL: &str = "https://api.openai.com";
const DEEPGRAM_BASE_URL: &str = "https://api.deepgram.com";

/// How many ranked alternatives to request from providers that support them
const MAX_ALTERNATIVES: usize = 4;

/// Response from OpenAI Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
    #[serde(default)]
    confidence: f32,
}

/// STT provider backend
#[derive(Clone, Copy, Debug)]
enum SttBackend {
    Whisper,
    Deepgram,
}

/// Transcribes speech segments via a cloud STT provider
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: String,
    model: String,
    backend: SttBackend,
    base_url: String,
}

impl SpeechToText {
    /// Create a new STT client using `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_whisper(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            backend: SttBackend::Whisper,
            base_url: WHISPER_BASE_URL.to_string(),
        })
    }

    /// Create a new STT client using Deepgram
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_deepgram(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("Deepgram API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            backend: SttBackend::Deepgram,
            base_url: DEEPGRAM_BASE_URL.to_string(),
        })
    }

    /// Override the API base URL (self-hosted gateways, tests)
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Transcribe using OpenAI Whisper (single hypothesis, no alternatives)
    async fn transcribe_whisper(&self, audio: Vec<u8>) -> Result<Transcript> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::TranscriptionUnavailable(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post(format!("{}/v1/audio/transcriptions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::TranscriptionUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::TranscriptionUnavailable(format!(
                "Whisper API error {status}"
            )));
        }

        let result: WhisperResponse = response
            .json()
            .await
            .map_err(|e| Error::TranscriptionUnavailable(e.to_string()))?;

        tracing::debug!(transcript = %result.text, "transcription complete");
        Ok(Transcript::plain(result.text.trim()))
    }

    /// Transcribe using Deepgram, requesting ranked alternatives
    async fn transcribe_deepgram(&self, audio: Vec<u8>) -> Result<Transcript> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let url = format!(
            "{}/v1/listen?model={}&punctuate=true&alternatives={MAX_ALTERNATIVES}",
            self.base_url, self.model
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(audio)
            .send()
            .await
            .map_err(|e| Error::TranscriptionUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(Error::TranscriptionUnavailable(format!(
                "Deepgram API error {status}"
            )));
        }

        let result: DeepgramResponse = response
            .json()
            .await
            .map_err(|e| Error::TranscriptionUnavailable(e.to_string()))?;

        let mut hypotheses = result
            .results
            .channels
            .into_iter()
            .next()
            .map(|c| c.alternatives)
            .unwrap_or_default()
            .into_iter();

        let primary = hypotheses
            .next()
            .map(|a| a.transcript.trim().to_string())
            .unwrap_or_default();

        let alternatives = hypotheses
            .filter(|a| !a.transcript.trim().is_empty())
            .map(|a| TranscriptAlternative {
                text: a.transcript.trim().to_string(),
                confidence: a.confidence,
            })
            .collect();

        tracing::debug!(transcript = %primary, "transcription complete");
        Ok(Transcript {
            text: primary,
            alternatives,
        })
    }
}

#[async_trait]
impl TranscriptionClient for SpeechToText {
    async fn transcribe(&self, segment: &AudioSegment) -> Result<Transcript> {
        let wav = samples_to_wav(&segment.samples, segment.sample_rate)?;

        match self.backend {
            SttBackend::Whisper => self.transcribe_whisper(wav).await,
            SttBackend::Deepgram => self.transcribe_deepgram(wav).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_rejected() {
        assert!(SpeechToText::new_whisper(String::new(), "whisper-1".to_string()).is_err());
        assert!(SpeechToText::new_deepgram(String::new(), "nova-2".to_string()).is_err());
    }
}
