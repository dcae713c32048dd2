//! Content-addressed, fuzzy-matched prompt cache.
//!
//! Lookups are two-tier:
//!
//! 1. **Exact**: SHA-256 of the normalized prompt (line endings unified,
//!    quote styles unified, whitespace collapsed, case-folded).
//! 2. **Fuzzy**: Jaccard similarity over word sets (words of two characters
//!    or fewer ignored) against every entry with the same provider/model.
//!    The most similar entry at or above the threshold (default `0.95`)
//!    wins.
//!
//! Entries are only ever added. A newer entry with the same hash shadows
//! the older one. Age/size eviction lives in [`PromptCache::cleanup`].
//!
//! ```rust
//! use repo_tutor_core::prompt_cache::{normalize_prompt, prompt_hash};
//!
//! let a = normalize_prompt("Explain  the 'Parser'\r\n module");
//! let b = normalize_prompt("explain the \"parser\" module");
//! assert_eq!(prompt_hash(&a), prompt_hash(&b));
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};

use crate::hash::content_hash;
use crate::models::{PromptCacheEntry, TokenUsage};
use crate::store::{PromptCandidate, PromptStore};

/// Minimum Jaccard similarity accepted by the fuzzy tier.
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.95;

/// Normalize a prompt for hashing and comparison.
pub fn normalize_prompt(prompt: &str) -> String {
    let unified: String = prompt
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .chars()
        .map(|c| match c {
            '\'' | '`' | '\u{2018}' | '\u{2019}' | '\u{201C}' | '\u{201D}' | '\u{00B4}' => '"',
            other => other,
        })
        .collect();
    unified
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Hash of an already-normalized prompt.
pub fn prompt_hash(normalized: &str) -> String {
    content_hash(normalized.as_bytes())
}

/// Words longer than two characters.
pub fn word_set(normalized: &str) -> HashSet<&str> {
    normalized
        .split_whitespace()
        .filter(|w| w.chars().count() > 2)
        .collect()
}

/// `|a ∩ b| / |a ∪ b|`, or `0.0` when both sets are empty.
pub fn jaccard(a: &HashSet<&str>, b: &HashSet<&str>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Which tiers a lookup may use.
///
/// Content that is being rewritten because its inputs changed must not be
/// answered by a near-duplicate of the prompt that produced the old text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheLookup {
    #[default]
    ExactOrFuzzy,
    ExactOnly,
}

/// How a cached response was found.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CacheHit {
    Exact,
    Fuzzy { similarity: f64 },
}

/// A response served from the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub response: String,
    pub hit: CacheHit,
    /// Hash of the entry that matched.
    pub prompt_hash: String,
}

/// Counters since the cache was constructed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PromptCacheStats {
    pub exact_hits: u64,
    pub fuzzy_hits: u64,
    pub misses: u64,
    pub inserts: u64,
}

impl PromptCacheStats {
    pub fn hits(&self) -> u64 {
        self.exact_hits + self.fuzzy_hits
    }
}

/// Bounds applied by [`PromptCache::cleanup`].
#[derive(Debug, Clone, Default)]
pub struct PromptCleanupPolicy {
    pub max_age: Option<Duration>,
    pub max_entries: Option<usize>,
}

/// Prompt cache over a pluggable [`PromptStore`].
pub struct PromptCache {
    store: Arc<dyn PromptStore>,
    fuzzy_threshold: f64,
    exact_hits: AtomicU64,
    fuzzy_hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
}

impl PromptCache {
    pub fn new(store: Arc<dyn PromptStore>) -> Self {
        Self {
            store,
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            exact_hits: AtomicU64::new(0),
            fuzzy_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
        }
    }

    pub fn with_fuzzy_threshold(mut self, threshold: f64) -> Self {
        self.fuzzy_threshold = threshold;
        self
    }

    pub fn fuzzy_threshold(&self) -> f64 {
        self.fuzzy_threshold
    }

    /// Look up a response for `prompt` within the provider/model scope,
    /// trying the exact tier and then the fuzzy tier.
    pub async fn find(
        &self,
        prompt: &str,
        provider: &str,
        model: &str,
    ) -> Result<Option<CachedResponse>> {
        self.find_with(prompt, provider, model, CacheLookup::ExactOrFuzzy).await
    }

    /// Exact-hash lookup only.
    pub async fn find_exact(
        &self,
        prompt: &str,
        provider: &str,
        model: &str,
    ) -> Result<Option<CachedResponse>> {
        self.find_with(prompt, provider, model, CacheLookup::ExactOnly).await
    }

    pub async fn find_with(
        &self,
        prompt: &str,
        provider: &str,
        model: &str,
        lookup: CacheLookup,
    ) -> Result<Option<CachedResponse>> {
        let normalized = normalize_prompt(prompt);
        let hash = prompt_hash(&normalized);

        if let Some(entry) = self.store.find_by_hash(&hash, provider, model).await? {
            self.exact_hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(hash = %short(&hash), provider, model, "prompt cache exact hit");
            return Ok(Some(CachedResponse {
                response: entry.response,
                hit: CacheHit::Exact,
                prompt_hash: entry.prompt_hash,
            }));
        }

        if lookup == CacheLookup::ExactOrFuzzy {
            if let Some(found) = self.find_fuzzy(&normalized, provider, model).await? {
                self.fuzzy_hits.fetch_add(1, Ordering::Relaxed);
                if let CacheHit::Fuzzy { similarity } = found.hit {
                    tracing::debug!(
                        hash = %short(&hash),
                        matched = %short(&found.prompt_hash),
                        similarity = %format!("{:.3}", similarity),
                        "prompt cache fuzzy hit"
                    );
                }
                return Ok(Some(found));
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(hash = %short(&hash), provider, model, ?lookup, "prompt cache miss");
        Ok(None)
    }

    async fn find_fuzzy(
        &self,
        normalized: &str,
        provider: &str,
        model: &str,
    ) -> Result<Option<CachedResponse>> {
        let words = word_set(normalized);
        let mut best: Option<(f64, PromptCandidate)> = None;
        for candidate in self.store.fuzzy_candidates(provider, model).await? {
            let similarity = jaccard(&words, &word_set(&candidate.normalized_prompt));
            if similarity < self.fuzzy_threshold {
                continue;
            }
            let better = match &best {
                None => true,
                Some((s, b)) => {
                    similarity > *s || (similarity == *s && candidate.timestamp > b.timestamp)
                }
            };
            if better {
                best = Some((similarity, candidate));
            }
        }

        let Some((similarity, candidate)) = best else {
            return Ok(None);
        };
        // The winning row may have been evicted since the scan.
        let entry = self
            .store
            .find_by_hash(&candidate.prompt_hash, provider, model)
            .await?;
        Ok(entry.map(|entry| CachedResponse {
            response: entry.response,
            hit: CacheHit::Fuzzy { similarity },
            prompt_hash: entry.prompt_hash,
        }))
    }

    /// Record a prompt/response pair and return the stored entry.
    pub async fn add(
        &self,
        prompt: &str,
        response: &str,
        provider: &str,
        model: &str,
        token_usage: Option<TokenUsage>,
        cost: Option<f64>,
    ) -> Result<PromptCacheEntry> {
        let normalized = normalize_prompt(prompt);
        let entry = PromptCacheEntry {
            prompt_hash: prompt_hash(&normalized),
            normalized_prompt: normalized,
            response: response.to_string(),
            timestamp: Utc::now(),
            provider: provider.to_string(),
            model: model.to_string(),
            token_usage,
            cost,
        };
        self.store.insert(&entry).await?;
        self.inserts.fetch_add(1, Ordering::Relaxed);
        Ok(entry)
    }

    /// Evict entries by age, then by count. Returns the number removed.
    pub async fn cleanup(&self, policy: &PromptCleanupPolicy) -> Result<usize> {
        let mut removed = 0;
        if let Some(max_age) = policy.max_age {
            removed += self.store.remove_older_than(Utc::now() - max_age).await?;
        }
        if let Some(max_entries) = policy.max_entries {
            removed += self.store.retain_newest(max_entries).await?;
        }
        tracing::info!(removed, "prompt cache cleanup");
        Ok(removed)
    }

    pub async fn len(&self) -> Result<usize> {
        self.store.count().await
    }

    pub fn stats(&self) -> PromptCacheStats {
        PromptCacheStats {
            exact_hits: self.exact_hits.load(Ordering::Relaxed),
            fuzzy_hits: self.fuzzy_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
        }
    }
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryPromptStore;

    fn cache() -> PromptCache {
        PromptCache::new(Arc::new(InMemoryPromptStore::new()))
    }

    fn words(n: usize, prefix: &str) -> Vec<String> {
        (0..n).map(|i| format!("{}word{:03}", prefix, i)).collect()
    }

    #[test]
    fn normalization_collapses_style_differences() {
        let a = normalize_prompt("Hello   'World'\r\nthis is `code`");
        let b = normalize_prompt("hello \"world\"\nTHIS IS \"code\"");
        assert_eq!(a, b);
        assert_eq!(a, "hello \"world\" this is \"code\"");
    }

    #[test]
    fn short_words_are_ignored() {
        let set = word_set("a an the parser of it");
        assert!(set.contains("the"));
        assert!(set.contains("parser"));
        assert!(!set.contains("an"));
        assert_eq!(set.len(), 2);
    }

    #[tokio::test]
    async fn add_then_find_returns_exact_response() {
        let cache = cache();
        cache
            .add("Write chapter 1", "# Chapter 1: Intro", "openai", "gpt", None, None)
            .await
            .unwrap();
        let hit = cache.find("write   chapter 1", "openai", "gpt").await.unwrap().unwrap();
        assert_eq!(hit.response, "# Chapter 1: Intro");
        assert_eq!(hit.hit, CacheHit::Exact);
        assert_eq!(cache.stats().exact_hits, 1);
    }

    #[tokio::test]
    async fn scope_is_provider_and_model() {
        let cache = cache();
        cache.add("same prompt text", "r", "openai", "gpt", None, None).await.unwrap();
        assert!(cache.find("same prompt text", "openai", "other").await.unwrap().is_none());
        assert!(cache.find("same prompt text", "anthropic", "gpt").await.unwrap().is_none());
        assert_eq!(cache.stats().misses, 2);
    }

    #[tokio::test]
    async fn fuzzy_match_above_threshold() {
        let cache = cache();
        let base = words(100, "");
        cache.add(&base.join(" "), "cached", "p", "m", None, None).await.unwrap();

        // one word swapped: 99 / 101 ≈ 0.980
        let mut near = base.clone();
        near[50] = "different".to_string();
        let hit = cache.find(&near.join(" "), "p", "m").await.unwrap().unwrap();
        assert_eq!(hit.response, "cached");
        match hit.hit {
            CacheHit::Fuzzy { similarity } => assert!(similarity >= 0.95),
            CacheHit::Exact => panic!("expected fuzzy hit"),
        }
    }

    #[tokio::test]
    async fn exact_only_lookup_skips_near_duplicates() {
        let cache = cache();
        let base = words(100, "");
        cache.add(&base.join(" "), "stale", "p", "m", None, None).await.unwrap();

        let mut edited = base.clone();
        edited[50] = "flush_rows_to_disk()".to_string();
        let prompt = edited.join(" ");
        assert!(cache.find(&prompt, "p", "m").await.unwrap().is_some());
        assert!(cache.find_exact(&prompt, "p", "m").await.unwrap().is_none());
        assert_eq!(cache.stats().misses, 1);

        let hit = cache.find_exact(&base.join(" "), "p", "m").await.unwrap().unwrap();
        assert_eq!(hit.hit, CacheHit::Exact);
    }

    #[tokio::test]
    async fn fuzzy_miss_below_threshold() {
        let cache = cache();
        let base = words(100, "");
        cache.add(&base.join(" "), "cached", "p", "m", None, None).await.unwrap();

        // ten words swapped: 90 / 110 ≈ 0.818
        let mut far = base.clone();
        for (i, w) in words(10, "x").into_iter().enumerate() {
            far[i] = w;
        }
        assert!(cache.find(&far.join(" "), "p", "m").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fuzzy_picks_most_similar() {
        let cache = cache().with_fuzzy_threshold(0.9);
        let base = words(100, "");
        let mut two_off = base.clone();
        two_off[0] = "aaa".into();
        two_off[1] = "bbb".into();
        let mut one_off = base.clone();
        one_off[0] = "ccc".into();
        cache.add(&two_off.join(" "), "two", "p", "m", None, None).await.unwrap();
        cache.add(&one_off.join(" "), "one", "p", "m", None, None).await.unwrap();

        let hit = cache.find(&base.join(" "), "p", "m").await.unwrap().unwrap();
        assert_eq!(hit.response, "one");
    }

    #[tokio::test]
    async fn cleanup_by_count() {
        let cache = cache();
        for i in 0..4 {
            cache.add(&format!("prompt {}", i), "r", "p", "m", None, None).await.unwrap();
        }
        let removed = cache
            .cleanup(&PromptCleanupPolicy {
                max_age: None,
                max_entries: Some(1),
            })
            .await
            .unwrap();
        assert_eq!(removed, 3);
        assert_eq!(cache.len().await.unwrap(), 1);
    }
}
