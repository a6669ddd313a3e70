//! Chat-completion client abstraction.
//!
//! Defines the [`CompletionClient`] trait and [`ChatCompletionsClient`], which
//! calls any OpenAI-compatible `POST {base_url}/chat/completions` endpoint
//! (Zhipu GLM by default).
//!
//! No structured-output mode is requested: some vision models reject
//! `response_format`, so the reply is plain text expected to hold JSON.
//! Calls are not retried.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::LlmConfig;

#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Returns the model identifier.
    fn model_name(&self) -> &str;

    /// Send a system + user message pair and return the assistant text.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

pub struct ChatCompletionsClient {
    http: reqwest::Client,
    url: String,
    model: String,
    api_key: String,
}

impl ChatCompletionsClient {
    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if no API key was configured or found in the
    /// environment variable named by `llm.api_key_env`.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            anyhow::anyhow!("{} environment variable not set", config.api_key_env)
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            url: config.chat_completions_url(),
            model: config.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl CompletionClient for ChatCompletionsClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Completion API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_completion_response(&json)
    }
}

/// Extract `choices[0].message.content`.
fn parse_completion_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid completion response: missing choices[0].message.content"))
}
