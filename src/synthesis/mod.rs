// Answer synthesis
// Sends an assembled prompt to an OpenAI-compatible chat completion endpoint


use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::CompletionConfig;
use crate::gateway::{HttpGateway, run_blocking};
use crate::{RagError, Result};

/// External text-completion function consuming an assembled prompt
#[async_trait]
pub trait AnswerSynthesizer: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct ChatCompletionClient {
    endpoint: Url,
    model: String,
    temperature: f32,
    api_key: String,
    http: HttpGateway,
}

impl std::fmt::Debug for ChatCompletionClient {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

impl ChatCompletionClient {
    /// Build a client, reading the API key from the configured environment variable
    #[inline]
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            RagError::Config(format!(
                "environment variable {} must hold the completion API key",
                config.api_key_env
            ))
        })?;
        Self::with_api_key(config, api_key)
    }

    #[inline]
    pub fn with_api_key(config: &CompletionConfig, api_key: String) -> Result<Self> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let endpoint = Url::parse(&base)
            .and_then(|url| url.join("chat/completions"))
            .with_context(|| format!("Invalid completion base URL: {}", config.base_url))?;

        Ok(Self {
            endpoint,
            model: config.model.clone(),
            temperature: config.temperature,
            api_key,
            http: HttpGateway::new("completion", Duration::from_secs(config.timeout_secs)),
        })
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.http = self.http.with_retry_attempts(attempts);
        self
    }

    #[inline]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.http = self.http.with_backoff(backoff);
        self
    }

    #[inline]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Request a completion, blocking the current thread
    #[inline]
    pub fn generate(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
        };
        let request_json =
            serde_json::to_string(&request).context("Failed to serialize completion request")?;

        debug!(
            "Requesting completion from {} ({} prompt characters)",
            self.model,
            prompt.chars().count()
        );
        let response_text = self
            .http
            .post_json(&self.endpoint, &request_json, Some(&self.api_key))?;

        let response: ChatResponse = serde_json::from_str(&response_text).map_err(|e| {
            RagError::Gateway(format!("Failed to parse completion response: {}", e))
        })?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| RagError::Gateway("completion response held no answer".to_string()))
    }
}

#[async_trait]
impl AnswerSynthesizer for ChatCompletionClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let client = self.clone();
        let prompt = prompt.to_string();
        let timeout = self
            .http
            .timeout()
            .saturating_mul(self.http.retry_attempts());
        run_blocking("completion", timeout, move || client.generate(&prompt)).await
    }
}
