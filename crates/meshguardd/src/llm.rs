//! Chat-completions client for the external LLM collaborator.
//!
//! The endpoint is treated as unreliable: short timeout, no retries, and the
//! caller always has a deterministic fallback when this errors out.

use crate::config::LlmConfig;
use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::time::Duration;

pub struct LlmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build LLM HTTP client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    /// Send a system+user chat request and return the raw completion text.
    pub async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": 0.2,
            "max_tokens": 1000,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("LLM request failed")?;

        if !response.status().is_success() {
            return Err(anyhow!("LLM request failed: HTTP {}", response.status()));
        }

        let json: Value = response
            .json()
            .await
            .context("LLM response was not valid JSON")?;

        json.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|choice| {
                choice
                    .pointer("/message/content")
                    .or_else(|| choice.get("text"))
            })
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("LLM response contained no completion content"))
    }
}
