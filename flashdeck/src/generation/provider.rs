//! Clients for the OpenAI-compatible text generation and speech endpoints.

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use crate::config::ProviderConfig;

/// One system + user exchange sent to the text generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPrompt {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechRequest {
    pub text: String,
    pub voice: String,
    pub instructions: String,
}

/// Produces text for a prompt. See [`OpenAiClient`] for the HTTP implementation.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, prompt: &ChatPrompt) -> anyhow::Result<String>;
}

/// Turns text into encoded audio.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, request: &SpeechRequest) -> anyhow::Result<Bytes>;
}

/// Talks to `/chat/completions` and `/audio/speech` with a single bearer key.
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    base_url: Url,
    api_key: String,
    chat_model: String,
    temperature: f32,
    tts_model: String,
    audio_format: String,
    request_timeout: Duration,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url.as_str())
            .field("chat_model", &self.chat_model)
            .field("tts_model", &self.tts_model)
            .finish_non_exhaustive()
    }
}

impl OpenAiClient {
    pub fn new(client: Client, config: &ProviderConfig, api_key: String) -> Self {
        Self {
            client,
            base_url: config.base_url.clone(),
            api_key,
            chat_model: config.chat_model.clone(),
            temperature: config.temperature,
            tts_model: config.tts_model.clone(),
            audio_format: config.audio_format.clone(),
            request_timeout: config.request_timeout,
        }
    }

    fn endpoint(&self, path: &str) -> anyhow::Result<Url> {
        ensure_slash(&self.base_url)
            .join(path)
            .map_err(|e| anyhow!("Failed to construct {} URL: {}", path, e))
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> anyhow::Result<reqwest::Response> {
        let url = self.endpoint(path)?;
        debug!("Calling provider endpoint {}", url);

        let response = self
            .client
            .post(url.clone())
            .bearer_auth(&self.api_key)
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Provider request to {} failed with {}", url, status);
            return Err(anyhow!("OpenAI API error: {} - {}", status, provider_error_message(&body)));
        }

        Ok(response)
    }
}

/// Makes sure a url has a trailing slash, so `join` appends instead of replacing the last
/// path segment (`/v1` + `chat/completions` would otherwise become `/chat/completions`).
fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let path = format!("{}/", new_url.path());
        new_url.set_path(&path);
        new_url
    }
}

/// Pull `error.message` out of an OpenAI error body, falling back to the raw text.
fn provider_error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: ErrorDetail,
    }
    #[derive(Deserialize)]
    struct ErrorDetail {
        message: String,
    }

    serde_json::from_str::<ErrorBody>(body)
        .map(|parsed| parsed.error.message)
        .unwrap_or_else(|_| body.chars().take(500).collect())
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Serialize)]
struct SpeechBody<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    instructions: &'a str,
    response_format: &'a str,
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    #[instrument(skip(self, prompt), fields(model = %self.chat_model), err)]
    async fn complete(&self, prompt: &ChatPrompt) -> anyhow::Result<String> {
        let mut messages = Vec::with_capacity(2);
        if !prompt.system.trim().is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: &prompt.system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &prompt.user,
        });

        let body = ChatCompletionRequest {
            model: &self.chat_model,
            temperature: self.temperature,
            messages,
        };

        let response = self.post("chat/completions", &body).await?;
        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("error decoding chat completion response: {}", e))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(anyhow!("The model returned an empty response"));
        }
        Ok(content)
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiClient {
    #[instrument(skip(self, request), fields(model = %self.tts_model, voice = %request.voice), err)]
    async fn synthesize(&self, request: &SpeechRequest) -> anyhow::Result<Bytes> {
        let body = SpeechBody {
            model: &self.tts_model,
            voice: &request.voice,
            input: request.text.trim(),
            instructions: request.instructions.trim(),
            response_format: &self.audio_format,
        };

        let audio = self.post("audio/speech", &body).await?.bytes().await?;
        if audio.is_empty() {
            return Err(anyhow!("The speech endpoint returned no audio"));
        }
        Ok(audio)
    }
}
