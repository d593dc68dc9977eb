//! Text-to-speech (TTS) backends

use async_trait::async_trait;

use crate::{Error, Result};

use super::SpeechProvider;

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io";

/// TTS provider backend
#[derive(Clone, Copy, Debug)]
enum TtsBackend {
    OpenAi,
    ElevenLabs,
}

/// Synthesizes speech from text via a cloud TTS provider
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: String,
    voice: String,
    speed: f32,
    model: String,
    backend: TtsBackend,
    base_url: String,
}

impl TextToSpeech {
    /// Create a new TTS client using `OpenAI`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai(api_key: String, voice: String, speed: f32, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice,
            speed,
            model,
            backend: TtsBackend::OpenAi,
            base_url: OPENAI_BASE_URL.to_string(),
        })
    }

    /// Create a new TTS client using `ElevenLabs`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_elevenlabs(api_key: String, voice_id: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice: voice_id,
            speed: 1.0,
            model,
            backend: TtsBackend::ElevenLabs,
            base_url: ELEVENLABS_BASE_URL.to_string(),
        })
    }

    /// Override the API base URL (self-hosted gateways, tests)
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Synthesize using OpenAI TTS
    async fn synthesize_openai(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
        };

        let response = self
            .client
            .post(format!("{}/v1/audio/speech", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::SynthesisUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "OpenAI TTS error");
            return Err(Error::SynthesisUnavailable(format!(
                "OpenAI TTS error {status}"
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::SynthesisUnavailable(e.to_string()))?;
        Ok(audio.to_vec())
    }

    /// Synthesize using ElevenLabs TTS
    async fn synthesize_elevenlabs(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!("{}/v1/text-to-speech/{}", self.base_url, self.voice);

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::SynthesisUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "ElevenLabs TTS error");
            return Err(Error::SynthesisUnavailable(format!(
                "ElevenLabs TTS error {status}"
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::SynthesisUnavailable(e.to_string()))?;
        Ok(audio.to_vec())
    }
}

#[async_trait]
impl SpeechProvider for TextToSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        match self.backend {
            TtsBackend::OpenAi => self.synthesize_openai(text).await,
            TtsBackend::ElevenLabs => self.synthesize_elevenlabs(text).await,
        }
    }
}
