//! Chat provider abstraction.
//!
//! The orchestrator and the memory store's fact extractor talk to a model
//! through [`ChatProvider`]. [`OpenAiCompatibleChat`] covers OpenAI and any
//! server exposing the same `/chat/completions` endpoint (OpenRouter, Ollama,
//! vLLM, ...).

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::types::ChatMessage;
use crate::settings::get_with_env_fallback;
use crate::settings::schema::LlmSettings;

/// Default temperature for turn calls.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Per-call generation options.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ChatOptions {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// A model reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub content: String,
    pub usage: Option<Usage>,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
        }
    }
}

/// A chat-completion model.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<ChatResponse>;

    /// Name for logs.
    fn provider_name(&self) -> &'static str;
}

/// Client for OpenAI-compatible chat completion APIs.
pub struct OpenAiCompatibleChat {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    default_temperature: f32,
    default_max_tokens: Option<u32>,
}

impl OpenAiCompatibleChat {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        let api_key = get_with_env_fallback(&settings.api_key, &["OPENAI_API_KEY"], None);
        let base_url = settings.base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            bail!("LLM base_url is not configured");
        }
        if api_key.is_none() {
            tracing::debug!("No API key configured for {}, sending unauthenticated", base_url);
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: settings.model.clone(),
            base_url,
            default_temperature: settings.temperature,
            default_max_tokens: settings.max_tokens,
        })
    }

    fn request_body(&self, messages: &[ChatMessage], options: &ChatOptions) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": options.temperature.unwrap_or(self.default_temperature),
        });
        if let Some(max_tokens) = options.max_tokens.or(self.default_max_tokens) {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        body
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatibleChat {
    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<ChatResponse> {
        let body = self.request_body(messages, options);

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .context("Failed to send chat completion request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Chat API error ({}): {}", status, body);
        }

        let response_body: serde_json::Value = response.json().await?;
        let content = response_body["choices"][0]["message"]["content"]
            .as_str()
            .context("Invalid response format from chat API")?
            .trim()
            .to_string();
        let usage = serde_json::from_value::<Usage>(response_body["usage"].clone()).ok();

        Ok(ChatResponse { content, usage })
    }

    fn provider_name(&self) -> &'static str {
        "openai_compatible"
    }
}
