//! JSON-file [`RepoCacheStore`].
//!
//! Layout under the configured cache directory:
//!
//! ```text
//! <dir>/
//!   index.json              repo id → file name, last access, size
//!   repos/<repo-id>.json    one RepositoryCache per repository
//! ```
//!
//! Every write goes to a temporary sibling first and is renamed into
//! place, so a crashed or cancelled run never leaves a truncated record.
//! Runs against the same repository are not coordinated; the last
//! completed write wins.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use repo_tutor_core::models::RepositoryCache;
use repo_tutor_core::store::{select_evictions, RepoCacheStore, RepoCleanupPolicy, RepoIndexEntry};

#[derive(Debug, Default, Serialize, Deserialize)]
struct RepoIndex {
    #[serde(default)]
    repos: BTreeMap<String, RepoIndexEntry>,
}

pub struct FileRepoCacheStore {
    dir: PathBuf,
}

impl FileRepoCacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("index.json")
    }

    fn file_name(repo_id: &str) -> String {
        format!("{}.json", repo_id)
    }

    fn record_path(&self, repo_id: &str) -> PathBuf {
        self.dir.join("repos").join(Self::file_name(repo_id))
    }

    async fn read_index(&self) -> Result<RepoIndex> {
        let path = self.index_path();
        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(index) => Ok(index),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "unreadable cache index, starting fresh");
                    Ok(RepoIndex::default())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RepoIndex::default()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    async fn write_index(&self, index: &RepoIndex) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(index)?;
        write_atomic(&self.index_path(), &bytes).await
    }

    /// Record an access in the index, adding the entry if it is missing.
    async fn touch(&self, repo_id: &str, repo_url: &str, size_bytes: u64) -> Result<()> {
        let mut index = self.read_index().await?;
        let entry = index.repos.entry(repo_id.to_string()).or_insert_with(|| RepoIndexEntry {
            repo_id: repo_id.to_string(),
            repo_url: repo_url.to_string(),
            file_name: Self::file_name(repo_id),
            last_accessed: Utc::now(),
            size_bytes,
        });
        entry.last_accessed = Utc::now();
        self.write_index(&index).await
    }
}

/// Write `bytes` to a temp file beside `path`, then rename over it.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e).with_context(|| format!("Failed to replace {}", path.display()));
    }
    Ok(())
}

#[async_trait]
impl RepoCacheStore for FileRepoCacheStore {
    async fn load(&self, repo_id: &str) -> Result<Option<RepositoryCache>> {
        let path = self.record_path(repo_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };
        let cache: RepositoryCache = serde_json::from_slice(&bytes)
            .with_context(|| format!("Corrupt repository cache: {}", path.display()))?;

        if let Err(e) = self.touch(repo_id, &cache.repo_url, bytes.len() as u64).await {
            tracing::warn!(repo_id, error = %format!("{:#}", e), "could not update last-accessed time");
        }
        Ok(Some(cache))
    }

    async fn save(&self, cache: &RepositoryCache) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(cache)?;
        write_atomic(&self.record_path(&cache.repo_id), &bytes).await?;

        let mut index = self.read_index().await?;
        index.repos.insert(
            cache.repo_id.clone(),
            RepoIndexEntry {
                repo_id: cache.repo_id.clone(),
                repo_url: cache.repo_url.clone(),
                file_name: Self::file_name(&cache.repo_id),
                last_accessed: Utc::now(),
                size_bytes: bytes.len() as u64,
            },
        );
        self.write_index(&index).await?;

        tracing::debug!(repo_id = %cache.repo_id, bytes = bytes.len(), "repository cache saved");
        Ok(())
    }

    async fn remove(&self, repo_id: &str) -> Result<bool> {
        let path = self.record_path(repo_id);
        let existed = match tokio::fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        };

        let mut index = self.read_index().await?;
        let indexed = index.repos.remove(repo_id).is_some();
        if indexed {
            self.write_index(&index).await?;
        }
        Ok(existed || indexed)
    }

    async fn list(&self) -> Result<Vec<RepoIndexEntry>> {
        let index = self.read_index().await?;
        let mut entries: Vec<RepoIndexEntry> = index.repos.into_values().collect();
        entries.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
        Ok(entries)
    }

    async fn cleanup(&self, policy: &RepoCleanupPolicy) -> Result<Vec<String>> {
        let entries = self.list().await?;
        let evicted = select_evictions(&entries, policy, Utc::now());
        for repo_id in &evicted {
            self.remove(repo_id).await?;
        }
        tracing::info!(evicted = evicted.len(), "repository cache cleanup");
        Ok(evicted)
    }
}
