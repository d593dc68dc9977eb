//! Chat-completion backend

use async_trait::async_trait;

use crate::{Error, Result};

use super::CompletionProvider;

const OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Token budget for a single spoken reply
const MAX_COMPLETION_TOKENS: u32 = 1024;

#[derive(serde::Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(serde::Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(serde::Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(serde::Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(serde::Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Produces completions via an OpenAI-compatible chat API
pub struct ChatCompletion {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl ChatCompletion {
    /// Create a new completion client
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for completions".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url: OPENAI_BASE_URL.to_string(),
        })
    }

    /// Override the API base URL (self-hosted gateways, tests)
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl CompletionProvider for ChatCompletion {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            max_tokens: MAX_COMPLETION_TOKENS,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::CompletionUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "completion API error");
            return Err(Error::CompletionUnavailable(format!(
                "completion API error {status}"
            )));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::CompletionUnavailable(e.to_string()))?;

        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::CompletionUnavailable("empty completion response".to_string()))
    }
}
