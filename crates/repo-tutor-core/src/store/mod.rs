//! Storage abstraction for Repo Tutor.
//!
//! Two durable stores back an incremental run:
//!
//! - [`PromptStore`]: append-only prompt/response pairs used by
//!   [`PromptCache`](crate::prompt_cache::PromptCache).
//! - [`RepoCacheStore`]: one [`RepositoryCache`] record per repository.
//!
//! Both traits are async (via `async-trait`) so the app crate can back
//! them with SQLite or the filesystem, while tests use the in-memory
//! implementations in [`memory`]. Eviction is a separate maintenance
//! operation and never runs on the read/write hot path.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{PromptCacheEntry, RepositoryCache};

/// Append-only store of prompt cache entries.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`find_by_hash`](PromptStore::find_by_hash) | Newest entry for a hash within a provider/model scope |
/// | [`fuzzy_candidates`](PromptStore::fuzzy_candidates) | Hash and normalized prompt of every entry in a provider/model scope |
/// | [`insert`](PromptStore::insert) | Add an entry; a newer entry supersedes older ones with the same hash |
/// | [`remove_older_than`](PromptStore::remove_older_than) | Age-based eviction |
/// | [`retain_newest`](PromptStore::retain_newest) | Count-based eviction |
#[async_trait]
pub trait PromptStore: Send + Sync {
    async fn find_by_hash(
        &self,
        prompt_hash: &str,
        provider: &str,
        model: &str,
    ) -> Result<Option<PromptCacheEntry>>;

    /// Lightweight rows for the fuzzy scan; responses are not loaded.
    async fn fuzzy_candidates(&self, provider: &str, model: &str) -> Result<Vec<PromptCandidate>>;

    async fn insert(&self, entry: &PromptCacheEntry) -> Result<()>;

    /// Delete entries written before `cutoff`. Returns the number removed.
    async fn remove_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Keep only the `max_entries` newest entries. Returns the number removed.
    async fn retain_newest(&self, max_entries: usize) -> Result<usize>;

    async fn count(&self) -> Result<usize>;
}

/// The part of a [`PromptCacheEntry`] the fuzzy tier compares against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptCandidate {
    pub prompt_hash: String,
    pub normalized_prompt: String,
    pub timestamp: DateTime<Utc>,
}

/// One line of the repository cache index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoIndexEntry {
    pub repo_id: String,
    pub repo_url: String,
    pub file_name: String,
    pub last_accessed: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Bounds applied by [`RepoCacheStore::cleanup`].
#[derive(Debug, Clone, Default)]
pub struct RepoCleanupPolicy {
    pub max_age: Option<Duration>,
    pub max_entries: Option<usize>,
    pub max_total_bytes: Option<u64>,
}

/// Durable per-repository cache keyed by normalized repository id.
#[async_trait]
pub trait RepoCacheStore: Send + Sync {
    /// Load the record for `repo_id`, updating its last-accessed time.
    async fn load(&self, repo_id: &str) -> Result<Option<RepositoryCache>>;

    /// Write (replace) the record for `cache.repo_id`.
    async fn save(&self, cache: &RepositoryCache) -> Result<()>;

    /// Delete the record. Returns whether one existed.
    async fn remove(&self, repo_id: &str) -> Result<bool>;

    /// Index entries, most recently accessed first.
    async fn list(&self) -> Result<Vec<RepoIndexEntry>>;

    /// Evict records violating `policy`. Returns the evicted repository ids.
    async fn cleanup(&self, policy: &RepoCleanupPolicy) -> Result<Vec<String>>;
}

/// Choose which index entries to evict under `policy`.
///
/// Order of application: age, then count, then total size. Within the
/// count and size passes the least recently accessed entries go first.
pub fn select_evictions(
    entries: &[RepoIndexEntry],
    policy: &RepoCleanupPolicy,
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut live: Vec<&RepoIndexEntry> = entries.iter().collect();
    live.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
    let mut evicted = Vec::new();

    if let Some(max_age) = policy.max_age {
        let cutoff = now - max_age;
        live.retain(|e| {
            if e.last_accessed < cutoff {
                evicted.push(e.repo_id.clone());
                false
            } else {
                true
            }
        });
    }

    if let Some(max_entries) = policy.max_entries {
        while live.len() > max_entries {
            if let Some(e) = live.pop() {
                evicted.push(e.repo_id.clone());
            }
        }
    }

    if let Some(max_bytes) = policy.max_total_bytes {
        let mut total: u64 = live.iter().map(|e| e.size_bytes).sum();
        while total > max_bytes {
            match live.pop() {
                Some(e) => {
                    total -= e.size_bytes;
                    evicted.push(e.repo_id.clone());
                }
                None => break,
            }
        }
    }

    evicted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, age_days: i64, size: u64, now: DateTime<Utc>) -> RepoIndexEntry {
        RepoIndexEntry {
            repo_id: id.to_string(),
            repo_url: id.to_string(),
            file_name: format!("{}.json", id),
            last_accessed: now - Duration::days(age_days),
            size_bytes: size,
        }
    }

    #[test]
    fn evicts_by_age_then_count_then_size() {
        let now = Utc::now();
        let entries = vec![
            entry("fresh", 0, 100, now),
            entry("week", 7, 100, now),
            entry("month", 31, 100, now),
            entry("stale", 400, 100, now),
        ];

        let by_age = select_evictions(
            &entries,
            &RepoCleanupPolicy {
                max_age: Some(Duration::days(90)),
                ..Default::default()
            },
            now,
        );
        assert_eq!(by_age, vec!["stale"]);

        let by_count = select_evictions(
            &entries,
            &RepoCleanupPolicy {
                max_entries: Some(2),
                ..Default::default()
            },
            now,
        );
        assert_eq!(by_count, vec!["stale", "month"]);

        let by_size = select_evictions(
            &entries,
            &RepoCleanupPolicy {
                max_total_bytes: Some(150),
                ..Default::default()
            },
            now,
        );
        assert_eq!(by_size, vec!["stale", "month", "week"]);
    }

    #[test]
    fn empty_policy_keeps_everything() {
        let now = Utc::now();
        let entries = vec![entry("a", 1000, u64::MAX / 2, now)];
        assert!(select_evictions(&entries, &RepoCleanupPolicy::default(), now).is_empty());
    }
}
