//! `tutor cache` subcommands: stats, cleanup, clear.
//!
//! Stats reads the SQLite prompt table directly for a per-model
//! breakdown; cleanup and clear go through the store traits so the same
//! eviction rules apply as in library use.

use anyhow::Result;
use sqlx::Row;
use std::sync::Arc;

use repo_tutor_core::hash::normalize_repo_id;
use repo_tutor_core::prompt_cache::PromptCache;
use repo_tutor_core::store::RepoCacheStore;

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::prompt_store::SqlitePromptStore;
use crate::repo_store::FileRepoCacheStore;

/// Per provider/model breakdown of the prompt cache.
struct ScopeStats {
    provider: String,
    model: String,
    entries: i64,
    tokens: i64,
    cost: f64,
    newest_ms: Option<i64>,
}

/// Print a summary of the prompt cache and repository cache.
pub async fn run_cache_stats(config: &Config) -> Result<()> {
    let pool = db::connect(&config.cache.prompt_db).await?;
    migrate::create_schema(&pool).await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM prompt_cache")
        .fetch_one(&pool)
        .await?;

    let rows = sqlx::query(
        r#"
        SELECT provider, model,
               COUNT(*) AS entries,
               COALESCE(SUM(total_tokens), 0) AS tokens,
               COALESCE(SUM(cost), 0.0) AS cost,
               MAX(created_at_ms) AS newest_ms
        FROM prompt_cache
        GROUP BY provider, model
        ORDER BY entries DESC
        "#,
    )
    .fetch_all(&pool)
    .await?;
    let scopes: Vec<ScopeStats> = rows
        .iter()
        .map(|row| ScopeStats {
            provider: row.get("provider"),
            model: row.get("model"),
            entries: row.get("entries"),
            tokens: row.get("tokens"),
            cost: row.get("cost"),
            newest_ms: row.get("newest_ms"),
        })
        .collect();
    pool.close().await;

    let db_size = std::fs::metadata(&config.cache.prompt_db)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Repo Tutor Cache Stats");
    println!("======================");
    println!();
    println!("  Prompt cache:  {}", config.cache.prompt_db.display());
    println!("  Size:          {}", format_bytes(db_size));
    println!("  Entries:       {}", total);

    if !scopes.is_empty() {
        println!();
        println!(
            "  {:<12} {:<28} {:>8} {:>10} {:>10}   {}",
            "PROVIDER", "MODEL", "ENTRIES", "TOKENS", "COST", "NEWEST"
        );
        println!("  {}", "-".repeat(84));
        for s in &scopes {
            let newest = s
                .newest_ms
                .map(|ms| format_ts_relative(ms / 1000))
                .unwrap_or_else(|| "never".to_string());
            println!(
                "  {:<12} {:<28} {:>8} {:>10} {:>10}   {}",
                s.provider,
                s.model,
                s.entries,
                s.tokens,
                format!("${:.4}", s.cost),
                newest
            );
        }
    }

    let repo_store = FileRepoCacheStore::new(&config.cache.dir);
    let repos = repo_store.list().await?;
    let repo_bytes: u64 = repos.iter().map(|r| r.size_bytes).sum();

    println!();
    println!("  Repository cache: {}", config.cache.dir.display());
    println!("  Repositories:     {}", repos.len());
    println!("  Size:             {}", format_bytes(repo_bytes));

    if !repos.is_empty() {
        println!();
        println!("  {:<48} {:>10}   {}", "REPOSITORY", "SIZE", "LAST ACCESS");
        println!("  {}", "-".repeat(76));
        for r in &repos {
            println!(
                "  {:<48} {:>10}   {}",
                r.repo_url,
                format_bytes(r.size_bytes),
                format_ts_relative(r.last_accessed.timestamp())
            );
        }
    }

    println!();
    Ok(())
}

/// Apply the configured eviction policies to both caches.
pub async fn run_cache_cleanup(config: &Config) -> Result<()> {
    let store = Arc::new(SqlitePromptStore::open(&config.cache.prompt_db).await?);
    let cache = PromptCache::new(store.clone());
    let prompts_removed = cache.cleanup(&config.cache.prompt_cleanup_policy()).await?;
    store.close().await;

    let repo_store = FileRepoCacheStore::new(&config.cache.dir);
    let evicted = repo_store.cleanup(&config.cache.repo_cleanup_policy()).await?;

    println!("Removed {} prompt cache entries.", prompts_removed);
    println!("Evicted {} repository records.", evicted.len());
    for id in &evicted {
        println!("  - {}", id);
    }
    Ok(())
}

/// Drop the cached record for one repository.
pub async fn run_cache_clear(config: &Config, repo_url: &str) -> Result<()> {
    let repo_store = FileRepoCacheStore::new(&config.cache.dir);
    let repo_id = normalize_repo_id(repo_url);
    if repo_store.remove(&repo_id).await? {
        println!("Cleared cached generation for {} ({}).", repo_url, repo_id);
    } else {
        println!("No cached generation for {} ({}).", repo_url, repo_id);
    }
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Relative time for a Unix timestamp ("3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }
    let plural = |n: i64| if n == 1 { "" } else { "s" };
    match delta {
        d if d < 60 => "just now".to_string(),
        d if d < 3600 => format!("{} min{} ago", d / 60, plural(d / 60)),
        d if d < 86400 => format!("{} hour{} ago", d / 3600, plural(d / 3600)),
        d if d < 86400 * 30 => format!("{} day{} ago", d / 86400, plural(d / 86400)),
        _ => format_ts_iso(ts),
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
