//! In-memory store implementations for tests and embedding.
//!
//! Both stores keep their data behind `std::sync::RwLock`; cleanup
//! follows the same policy logic as the durable backends.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{PromptCacheEntry, RepositoryCache};

use super::{
    select_evictions, PromptCandidate, PromptStore, RepoCacheStore, RepoCleanupPolicy, RepoIndexEntry,
};

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

/// In-memory [`PromptStore`].
#[derive(Default)]
pub struct InMemoryPromptStore {
    entries: RwLock<Vec<PromptCacheEntry>>,
}

impl InMemoryPromptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PromptStore for InMemoryPromptStore {
    async fn find_by_hash(
        &self,
        prompt_hash: &str,
        provider: &str,
        model: &str,
    ) -> Result<Option<PromptCacheEntry>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries
            .iter()
            .filter(|e| e.prompt_hash == prompt_hash && e.provider == provider && e.model == model)
            .max_by_key(|e| e.timestamp)
            .cloned())
    }

    async fn fuzzy_candidates(&self, provider: &str, model: &str) -> Result<Vec<PromptCandidate>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries
            .iter()
            .filter(|e| e.provider == provider && e.model == model)
            .map(|e| PromptCandidate {
                prompt_hash: e.prompt_hash.clone(),
                normalized_prompt: e.normalized_prompt.clone(),
                timestamp: e.timestamp,
            })
            .collect())
    }

    async fn insert(&self, entry: &PromptCacheEntry) -> Result<()> {
        self.entries.write().map_err(poisoned)?.push(entry.clone());
        Ok(())
    }

    async fn remove_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        let before = entries.len();
        entries.retain(|e| e.timestamp >= cutoff);
        Ok(before - entries.len())
    }

    async fn retain_newest(&self, max_entries: usize) -> Result<usize> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        if entries.len() <= max_entries {
            return Ok(0);
        }
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let removed = entries.len() - max_entries;
        entries.truncate(max_entries);
        Ok(removed)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().map_err(poisoned)?.len())
    }
}

struct StoredRepo {
    cache: RepositoryCache,
    last_accessed: DateTime<Utc>,
    size_bytes: u64,
}

/// In-memory [`RepoCacheStore`]. Records are cloned in and out so callers
/// never share state with the store.
#[derive(Default)]
pub struct InMemoryRepoCacheStore {
    repos: RwLock<HashMap<String, StoredRepo>>,
}

impl InMemoryRepoCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RepoCacheStore for InMemoryRepoCacheStore {
    async fn load(&self, repo_id: &str) -> Result<Option<RepositoryCache>> {
        let mut repos = self.repos.write().map_err(poisoned)?;
        Ok(repos.get_mut(repo_id).map(|stored| {
            stored.last_accessed = Utc::now();
            stored.cache.clone()
        }))
    }

    async fn save(&self, cache: &RepositoryCache) -> Result<()> {
        let size_bytes = serde_json::to_vec(cache)?.len() as u64;
        self.repos.write().map_err(poisoned)?.insert(
            cache.repo_id.clone(),
            StoredRepo {
                cache: cache.clone(),
                last_accessed: Utc::now(),
                size_bytes,
            },
        );
        Ok(())
    }

    async fn remove(&self, repo_id: &str) -> Result<bool> {
        Ok(self.repos.write().map_err(poisoned)?.remove(repo_id).is_some())
    }

    async fn list(&self) -> Result<Vec<RepoIndexEntry>> {
        let repos = self.repos.read().map_err(poisoned)?;
        let mut entries: Vec<RepoIndexEntry> = repos
            .iter()
            .map(|(id, stored)| RepoIndexEntry {
                repo_id: id.clone(),
                repo_url: stored.cache.repo_url.clone(),
                file_name: format!("{}.json", id),
                last_accessed: stored.last_accessed,
                size_bytes: stored.size_bytes,
            })
            .collect();
        entries.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
        Ok(entries)
    }

    async fn cleanup(&self, policy: &RepoCleanupPolicy) -> Result<Vec<String>> {
        let entries = self.list().await?;
        let evicted = select_evictions(&entries, policy, Utc::now());
        let mut repos = self.repos.write().map_err(poisoned)?;
        for id in &evicted {
            repos.remove(id);
        }
        Ok(evicted)
    }
}
