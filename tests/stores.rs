use std::sync::Arc;

use chrono::{Duration, Utc};
use tempfile::TempDir;

use repo_tutor::prompt_store::SqlitePromptStore;
use repo_tutor::repo_store::FileRepoCacheStore;
use repo_tutor_core::models::{PromptCacheEntry, RepositoryCache, TokenUsage};
use repo_tutor_core::prompt_cache::{CacheHit, PromptCache, PromptCleanupPolicy};
use repo_tutor_core::store::{PromptStore, RepoCacheStore, RepoCleanupPolicy};

fn entry(hash: &str, response: &str, age_days: i64) -> PromptCacheEntry {
    PromptCacheEntry {
        prompt_hash: hash.to_string(),
        normalized_prompt: format!("prompt for {}", hash),
        response: response.to_string(),
        timestamp: Utc::now() - Duration::days(age_days),
        provider: "openai".to_string(),
        model: "gpt-4o-mini".to_string(),
        token_usage: Some(TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        cost: Some(0.0001),
    }
}

#[tokio::test]
async fn sqlite_store_round_trips_entries() {
    let tmp = TempDir::new().unwrap();
    let store = SqlitePromptStore::open(&tmp.path().join("prompts.sqlite")).await.unwrap();

    store.insert(&entry("h1", "first", 0)).await.unwrap();
    let found = store.find_by_hash("h1", "openai", "gpt-4o-mini").await.unwrap().unwrap();

    assert_eq!(found.response, "first");
    assert_eq!(found.token_usage.unwrap().total_tokens, 15);
    assert!(store.find_by_hash("h1", "anthropic", "gpt-4o-mini").await.unwrap().is_none());
    store.close().await;
}

#[tokio::test]
async fn sqlite_store_prefers_the_newest_row_for_a_hash() {
    let tmp = TempDir::new().unwrap();
    let store = SqlitePromptStore::open(&tmp.path().join("prompts.sqlite")).await.unwrap();

    store.insert(&entry("h1", "stale", 2)).await.unwrap();
    store.insert(&entry("h1", "fresh", 0)).await.unwrap();

    let found = store.find_by_hash("h1", "openai", "gpt-4o-mini").await.unwrap().unwrap();
    assert_eq!(found.response, "fresh");
    assert_eq!(store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn sqlite_store_evicts_by_age_then_count() {
    let tmp = TempDir::new().unwrap();
    let store = SqlitePromptStore::open(&tmp.path().join("prompts.sqlite")).await.unwrap();
    for (i, age) in [40, 3, 2, 1, 0].iter().enumerate() {
        store.insert(&entry(&format!("h{}", i), "r", *age)).await.unwrap();
    }

    let removed = store.remove_older_than(Utc::now() - Duration::days(30)).await.unwrap();
    assert_eq!(removed, 1);

    let removed = store.retain_newest(2).await.unwrap();
    assert_eq!(removed, 2);
    assert!(store.find_by_hash("h4", "openai", "gpt-4o-mini").await.unwrap().is_some());
    assert!(store.find_by_hash("h1", "openai", "gpt-4o-mini").await.unwrap().is_none());
}

#[tokio::test]
async fn prompt_cache_over_sqlite_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let db = tmp.path().join("prompts.sqlite");
    let prompt = "Identify the core abstractions of   the widget project.";

    {
        let store = Arc::new(SqlitePromptStore::open(&db).await.unwrap());
        let cache = PromptCache::new(store.clone());
        cache.add(prompt, "cached answer", "openai", "gpt-4o-mini", None, None).await.unwrap();
        store.close().await;
    }

    let cache = PromptCache::new(Arc::new(SqlitePromptStore::open(&db).await.unwrap()));
    let hit = cache
        .find("Identify the core abstractions of the widget project.", "openai", "gpt-4o-mini")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hit.response, "cached answer");
    assert_eq!(hit.hit, CacheHit::Exact);

    let removed = cache
        .cleanup(&PromptCleanupPolicy {
            max_age: None,
            max_entries: Some(0),
        })
        .await
        .unwrap();
    assert_eq!(removed, 1);
}

#[tokio::test]
async fn fuzzy_scan_reads_candidates_then_the_winning_row() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(SqlitePromptStore::open(&tmp.path().join("prompts.sqlite")).await.unwrap());
    let words: Vec<String> = (0..60).map(|i| format!("token{:02}", i)).collect();
    let cache = PromptCache::new(store.clone());
    cache.add(&words.join(" "), "full response body", "openai", "gpt-4o-mini", None, None)
        .await
        .unwrap();

    let candidates = store.fuzzy_candidates("openai", "gpt-4o-mini").await.unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].normalized_prompt, words.join(" "));
    assert!(store.fuzzy_candidates("openai", "other").await.unwrap().is_empty());

    let mut near = words.clone();
    near[30] = "replaced".to_string();
    let hit = cache.find(&near.join(" "), "openai", "gpt-4o-mini").await.unwrap().unwrap();
    assert_eq!(hit.response, "full response body");
    assert!(matches!(hit.hit, CacheHit::Fuzzy { .. }));
    assert_eq!(hit.prompt_hash, candidates[0].prompt_hash);
}

fn record(url: &str, chapters: usize) -> RepositoryCache {
    let mut cache = RepositoryCache::new(url);
    cache.metadata.project_name = "widget".to_string();
    cache.metadata.chapter_count = chapters;
    cache
}

#[tokio::test]
async fn file_store_saves_and_loads_records() {
    let tmp = TempDir::new().unwrap();
    let store = FileRepoCacheStore::new(tmp.path());
    let cache = record("https://github.com/acme/widget", 3);

    store.save(&cache).await.unwrap();
    let loaded = store.load(&cache.repo_id).await.unwrap().unwrap();

    assert_eq!(loaded, cache);
    assert!(tmp.path().join("index.json").exists());
    assert!(tmp
        .path()
        .join("repos")
        .join(format!("{}.json", cache.repo_id))
        .exists());
    assert!(store.load("github_com_acme_other").await.unwrap().is_none());
}

#[tokio::test]
async fn file_store_overwrites_and_leaves_no_temp_files() {
    let tmp = TempDir::new().unwrap();
    let store = FileRepoCacheStore::new(tmp.path());

    store.save(&record("https://github.com/acme/widget", 1)).await.unwrap();
    store.save(&record("https://github.com/acme/widget", 2)).await.unwrap();

    let loaded = store.load("github_com_acme_widget").await.unwrap().unwrap();
    assert_eq!(loaded.metadata.chapter_count, 2);

    let leftovers: Vec<_> = std::fs::read_dir(tmp.path().join("repos"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains("tmp-"))
        .collect();
    assert!(leftovers.is_empty());
    assert_eq!(store.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn file_store_remove_and_cleanup() {
    let tmp = TempDir::new().unwrap();
    let store = FileRepoCacheStore::new(tmp.path());
    for name in ["one", "two", "three"] {
        store
            .save(&record(&format!("https://github.com/acme/{}", name), 1))
            .await
            .unwrap();
    }

    assert!(store.remove("github_com_acme_one").await.unwrap());
    assert!(!store.remove("github_com_acme_one").await.unwrap());

    let evicted = store
        .cleanup(&RepoCleanupPolicy {
            max_age: None,
            max_entries: Some(1),
            max_total_bytes: None,
        })
        .await
        .unwrap();
    assert_eq!(evicted.len(), 1);
    assert_eq!(store.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn corrupt_index_is_treated_as_empty() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("index.json"), "{not json").unwrap();
    let store = FileRepoCacheStore::new(tmp.path());

    assert!(store.list().await.unwrap().is_empty());
    store.save(&record("https://github.com/acme/widget", 1)).await.unwrap();
    assert_eq!(store.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn load_succeeds_when_the_index_cannot_be_written() {
    let tmp = TempDir::new().unwrap();
    let store = FileRepoCacheStore::new(tmp.path());
    let cache = record("https://github.com/acme/widget", 2);
    store.save(&cache).await.unwrap();

    // A directory in place of index.json makes every index read and write fail.
    let index = tmp.path().join("index.json");
    std::fs::remove_file(&index).unwrap();
    std::fs::create_dir(&index).unwrap();

    let loaded = store.load(&cache.repo_id).await.unwrap().unwrap();
    assert_eq!(loaded.metadata.chapter_count, 2);
    assert!(index.is_dir());
}
