//! LLM call service trait.
//!
//! Defines the [`LlmClient`] trait every model backend implements. The
//! pipeline treats a call as an opaque async function from prompt to
//! text; request shaping, auth and retries belong to the implementation.
//!
//! Concrete clients (OpenAI-compatible, Anthropic, disabled) live in the
//! `repo-tutor` app crate.

use async_trait::async_trait;

use crate::error::LlmError;
use crate::models::TokenUsage;

/// Per-call sampling options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 4096,
        }
    }
}

/// Text returned by a model plus its reported token usage.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Provider identifier (e.g. `"openai"`), part of the prompt cache scope.
    fn provider(&self) -> &str;

    /// Model identifier, part of the prompt cache scope.
    fn model(&self) -> &str;

    async fn complete(&self, prompt: &str, options: &CallOptions) -> Result<LlmResponse, LlmError>;
}
