//! Cached model call path.
//!
//! Every model-backed stage goes through [`LlmCaller::call`]: consult the
//! prompt cache, call the client on a miss, record usage and cost, then
//! add the new entry. Cache read or write failures are logged and never
//! fail the call.

use std::sync::Mutex;

use repo_tutor_core::error::PipelineError;
use repo_tutor_core::llm::{CallOptions, LlmClient};
use repo_tutor_core::models::StageName;
use repo_tutor_core::prompt_cache::{
    normalize_prompt, prompt_hash, CacheHit, CacheLookup, PromptCache,
};

use crate::config::PricingConfig;

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CallStats {
    pub llm_calls: u64,
    pub cache_hits: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost: f64,
}

/// Result of a cached call.
#[derive(Debug, Clone)]
pub struct CallResult {
    pub text: String,
    pub prompt_hash: String,
    pub from_cache: bool,
}

pub struct LlmCaller<'a> {
    client: &'a dyn LlmClient,
    cache: Option<&'a PromptCache>,
    options: CallOptions,
    pricing: Option<PricingConfig>,
    stats: Mutex<CallStats>,
}

impl<'a> LlmCaller<'a> {
    /// `cache = None` bypasses the prompt cache entirely.
    pub fn new(
        client: &'a dyn LlmClient,
        cache: Option<&'a PromptCache>,
        options: CallOptions,
        pricing: Option<PricingConfig>,
    ) -> Self {
        Self {
            client,
            cache,
            options,
            pricing,
            stats: Mutex::new(CallStats::default()),
        }
    }

    pub fn provider(&self) -> &str {
        self.client.provider()
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    pub fn stats(&self) -> CallStats {
        self.stats.lock().map(|s| *s).unwrap_or_default()
    }

    fn record(&self, update: impl FnOnce(&mut CallStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            update(&mut stats);
        }
    }

    /// `lookup` limits which cache tiers may answer; see [`CacheLookup`].
    pub async fn call(
        &self,
        stage: StageName,
        prompt: &str,
        lookup: CacheLookup,
    ) -> Result<CallResult, PipelineError> {
        let provider = self.client.provider();
        let model = self.client.model();

        if let Some(cache) = self.cache {
            match cache.find_with(prompt, provider, model, lookup).await {
                Ok(Some(hit)) => {
                    self.record(|s| s.cache_hits += 1);
                    if let CacheHit::Fuzzy { similarity } = hit.hit {
                        tracing::info!(stage = %stage, similarity = %format!("{:.3}", similarity), "using fuzzy prompt cache match");
                    }
                    return Ok(CallResult {
                        text: hit.response,
                        prompt_hash: hit.prompt_hash,
                        from_cache: true,
                    });
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(stage = %stage, error = %e, "prompt cache lookup failed"),
            }
        }

        tracing::info!(stage = %stage, provider, model, prompt_chars = prompt.len(), "calling LLM");
        let response = self
            .client
            .complete(prompt, &self.options)
            .await
            .map_err(|source| PipelineError::LlmCall { stage, source })?;

        let cost = match (&self.pricing, &response.usage) {
            (Some(pricing), Some(usage)) => Some(pricing.cost(usage)),
            _ => None,
        };
        self.record(|s| {
            s.llm_calls += 1;
            if let Some(usage) = &response.usage {
                s.prompt_tokens += usage.prompt_tokens;
                s.completion_tokens += usage.completion_tokens;
            }
            s.cost += cost.unwrap_or(0.0);
        });

        let hash = prompt_hash(&normalize_prompt(prompt));
        if let Some(cache) = self.cache {
            if let Err(e) = cache
                .add(prompt, &response.text, provider, model, response.usage, cost)
                .await
            {
                tracing::warn!(stage = %stage, error = %e, "failed to store prompt cache entry");
            }
        }

        Ok(CallResult {
            text: response.text,
            prompt_hash: hash,
            from_cache: false,
        })
    }
}
