//! Text-completion service abstraction and implementations.
//!
//! - **[`OpenAIChat`]**: OpenAI Chat Completions (`POST /v1/chat/completions`),
//!   or any compatible gateway via `completion.url`.
//! - **[`OllamaChat`]**: a local Ollama instance's `POST /api/chat` with
//!   streaming disabled.
//!
//! Every prompt is sent as a single user message. The pipeline always calls
//! with temperature `0.0`; [`CompletionOptions::deterministic`] builds those
//! options from the configured retry budget.

use anyhow::bail;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::config::{CompletionConfig, Credentials};
use crate::error::{PipelineError, Result};
use crate::http;

/// Per-call generation options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_retries: u32,
}

impl CompletionOptions {
    /// Temperature fixed at `0.0`.
    pub fn deterministic(max_retries: u32) -> Self {
        Self {
            temperature: 0.0,
            max_retries,
        }
    }
}

/// A prompt-in, text-out language model.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String>;
}

/// OpenAI Chat Completions client.
pub struct OpenAIChat {
    model: String,
    api_key: String,
    base_url: String,
    max_tokens: u32,
    http: reqwest::Client,
}

impl OpenAIChat {
    pub fn new(config: &CompletionConfig, credentials: &Credentials) -> anyhow::Result<Self> {
        let api_key = match &credentials.openai_api_key {
            Some(key) => key.clone(),
            None => bail!("OPENAI_API_KEY environment variable not set"),
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            api_key,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            max_tokens: config.max_tokens,
            http,
        })
    }

    fn build_request_body(&self, prompt: &str, options: &CompletionOptions) -> Value {
        serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": options.temperature,
            "messages": [{ "role": "user", "content": prompt }],
        })
    }
}

#[async_trait]
impl CompletionModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String> {
        let body = self.build_request_body(prompt, options);
        let url = format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        let json = http::post_json(
            &self.http,
            &url,
            Some(&self.api_key),
            &body,
            options.max_retries,
        )
        .await
        .map_err(PipelineError::Completion)?;
        parse_openai_completion(&json)
    }
}

fn parse_openai_completion(json: &Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(|content| content.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            PipelineError::Completion(
                "invalid OpenAI response: missing choices[0].message.content".to_string(),
            )
        })
}

/// Ollama chat client (`stream = false`).
pub struct OllamaChat {
    model: String,
    url: String,
    http: reqwest::Client,
}

impl OllamaChat {
    pub fn new(config: &CompletionConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            http,
        })
    }
}

#[async_trait]
impl CompletionModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "stream": false,
            "options": { "temperature": options.temperature },
            "messages": [{ "role": "user", "content": prompt }],
        });
        let url = format!("{}/api/chat", self.url.trim_end_matches('/'));
        let json = http::post_json(&self.http, &url, None, &body, options.max_retries)
            .await
            .map_err(|e| {
                PipelineError::Completion(format!("{} (is Ollama running at {}?)", e, self.url))
            })?;

        json.get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                PipelineError::Completion(
                    "invalid Ollama response: missing message.content".to_string(),
                )
            })
    }
}

/// Create the configured [`CompletionModel`].
pub fn create_completion_model(
    config: &CompletionConfig,
    credentials: &Credentials,
) -> anyhow::Result<Box<dyn CompletionModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAIChat::new(config, credentials)?)),
        "ollama" => Ok(Box::new(OllamaChat::new(config)?)),
        other => bail!("Unknown completion provider: {}", other),
    }
}
