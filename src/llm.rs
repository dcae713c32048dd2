//! LLM client implementations.
//!
//! Concrete backends for the core [`LlmClient`] trait:
//! - **[`DisabledClient`]**: fails every call; used when `llm.provider = "disabled"`.
//! - **[`OpenAiClient`]**: OpenAI-compatible `chat/completions`; `base_url`
//!   points it at any compatible gateway.
//! - **[`AnthropicClient`]**: Anthropic `messages` API.
//!
//! # Retry Strategy
//!
//! Both HTTP clients retry transient failures with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 401/403 → [`LlmError::Auth`], no retry
//! - Other HTTP 4xx → [`LlmError::Client`], no retry
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use repo_tutor_core::error::LlmError;
use repo_tutor_core::llm::{CallOptions, LlmClient, LlmResponse};
use repo_tutor_core::models::TokenUsage;

use crate::config::LlmConfig;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

// ============ Disabled Client ============

pub struct DisabledClient;

#[async_trait]
impl LlmClient for DisabledClient {
    fn provider(&self) -> &str {
        "disabled"
    }
    fn model(&self) -> &str {
        "none"
    }
    async fn complete(&self, _prompt: &str, _options: &CallOptions) -> Result<LlmResponse, LlmError> {
        Err(LlmError::Disabled)
    }
}

// ============ Shared HTTP plumbing ============

fn read_api_key(config: &LlmConfig) -> Result<String> {
    let var = config.api_key_var();
    match std::env::var(&var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => bail!(LlmError::MissingApiKey(var)),
    }
}

fn http_client(config: &LlmConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

fn model_of(config: &LlmConfig) -> Result<String> {
    config
        .model
        .clone()
        .ok_or_else(|| anyhow::anyhow!("llm.model required for provider '{}'", config.provider))
}

fn base_url(config: &LlmConfig, default: &str) -> String {
    config
        .base_url
        .as_deref()
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}

/// Map a non-success HTTP status to an error kind.
pub fn classify_status(status: u16, body: &str) -> LlmError {
    let detail = format!("HTTP {}: {}", status, body.trim());
    match status {
        429 => LlmError::RateLimited(detail),
        401 | 403 => LlmError::Auth(detail),
        s if s >= 500 => LlmError::Server(detail),
        _ => LlmError::Client(detail),
    }
}

/// POST `body` to `url`, retrying retryable failures, and return the JSON reply.
async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    headers: &[(&str, String)],
    body: &Value,
    max_retries: u32,
) -> Result<Value, LlmError> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(attempt, delay_secs = delay.as_secs(), "retrying LLM call");
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        for (name, value) in headers {
            request = request.header(*name, value);
        }

        let err = match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return response
                        .json::<Value>()
                        .await
                        .map_err(|e| LlmError::InvalidResponse(e.to_string()));
                }
                let body_text = response.text().await.unwrap_or_default();
                classify_status(status.as_u16(), &body_text)
            }
            Err(e) => LlmError::Transport(e.to_string()),
        };

        if !err.is_retryable() {
            return Err(err);
        }
        tracing::warn!(attempt, error = %err, "transient LLM failure");
        last_err = Some(err);
    }

    Err(last_err.unwrap_or_else(|| LlmError::Transport("LLM call failed after retries".to_string())))
}

// ============ OpenAI-compatible Client ============

pub struct OpenAiClient {
    http: reqwest::Client,
    model: String,
    base_url: String,
    api_key: String,
    max_retries: u32,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            http: http_client(config)?,
            model: model_of(config)?,
            base_url: base_url(config, OPENAI_BASE_URL),
            api_key: read_api_key(config)?,
            max_retries: config.max_retries,
        })
    }
}

/// Extract text and usage from a `chat/completions` reply.
pub fn parse_openai_response(json: &Value) -> Result<LlmResponse, LlmError> {
    let text = json
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| LlmError::InvalidResponse("missing choices[0].message.content".to_string()))?;
    let usage = json.get("usage").map(|u| {
        let prompt = u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0);
        let completion = u.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0);
        TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: u
                .get("total_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(prompt + completion),
        }
    });
    Ok(LlmResponse {
        text: text.to_string(),
        usage,
    })
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn provider(&self) -> &str {
        "openai"
    }
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, options: &CallOptions) -> Result<LlmResponse, LlmError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
        });
        let headers = [("Authorization", format!("Bearer {}", self.api_key))];
        let url = format!("{}/chat/completions", self.base_url);
        let json = post_with_retry(&self.http, &url, &headers, &body, self.max_retries).await?;
        parse_openai_response(&json)
    }
}

// ============ Anthropic Client ============

pub struct AnthropicClient {
    http: reqwest::Client,
    model: String,
    base_url: String,
    api_key: String,
    max_retries: u32,
}

impl AnthropicClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            http: http_client(config)?,
            model: model_of(config)?,
            base_url: base_url(config, ANTHROPIC_BASE_URL),
            api_key: read_api_key(config)?,
            max_retries: config.max_retries,
        })
    }
}

/// Extract text and usage from a `messages` reply.
pub fn parse_anthropic_response(json: &Value) -> Result<LlmResponse, LlmError> {
    let blocks = json
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| LlmError::InvalidResponse("missing content array".to_string()))?;
    let text: String = blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect();
    if text.is_empty() {
        return Err(LlmError::InvalidResponse("no text content blocks".to_string()));
    }
    let usage = json.get("usage").map(|u| {
        let prompt = u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
        let completion = u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);
        TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        }
    });
    Ok(LlmResponse { text, usage })
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn provider(&self) -> &str {
        "anthropic"
    }
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, options: &CallOptions) -> Result<LlmResponse, LlmError> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let headers = [
            ("x-api-key", self.api_key.clone()),
            ("anthropic-version", ANTHROPIC_VERSION.to_string()),
        ];
        let url = format!("{}/v1/messages", self.base_url);
        let json = post_with_retry(&self.http, &url, &headers, &body, self.max_retries).await?;
        parse_anthropic_response(&json)
    }
}

/// Create the [`LlmClient`] named by `config.provider`.
///
/// | Config Value | Client |
/// |-------------|--------|
/// | `"disabled"` | [`DisabledClient`] |
/// | `"openai"` | [`OpenAiClient`] |
/// | `"anthropic"` | [`AnthropicClient`] |
pub fn create_client(config: &LlmConfig) -> Result<Box<dyn LlmClient>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledClient)),
        "openai" => Ok(Box::new(OpenAiClient::new(config)?)),
        "anthropic" => Ok(Box::new(AnthropicClient::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}
