//! SQLite-backed [`PromptStore`].
//!
//! Rows in `prompt_cache` are append-only. Lookup picks the newest row for
//! a hash inside a provider/model scope, so a later insert for the same
//! prompt supersedes earlier ones without an update.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use repo_tutor_core::models::{PromptCacheEntry, TokenUsage};
use repo_tutor_core::store::{PromptCandidate, PromptStore};

use crate::{db, migrate};

const SELECT_COLUMNS: &str = "SELECT prompt_hash, normalized_prompt, response, created_at_ms, \
     provider, model, prompt_tokens, completion_tokens, total_tokens, cost FROM prompt_cache";

pub struct SqlitePromptStore {
    pool: SqlitePool,
}

impl SqlitePromptStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `db_path`, creating the schema if needed.
    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = db::connect(db_path).await?;
        migrate::create_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn ts_from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn row_to_entry(row: &SqliteRow) -> PromptCacheEntry {
    let prompt_tokens: Option<i64> = row.get("prompt_tokens");
    let completion_tokens: Option<i64> = row.get("completion_tokens");
    let total_tokens: Option<i64> = row.get("total_tokens");
    let token_usage = match (prompt_tokens, completion_tokens, total_tokens) {
        (Some(p), Some(c), Some(t)) => Some(TokenUsage {
            prompt_tokens: p as u64,
            completion_tokens: c as u64,
            total_tokens: t as u64,
        }),
        _ => None,
    };
    PromptCacheEntry {
        prompt_hash: row.get("prompt_hash"),
        normalized_prompt: row.get("normalized_prompt"),
        response: row.get("response"),
        timestamp: ts_from_millis(row.get("created_at_ms")),
        provider: row.get("provider"),
        model: row.get("model"),
        token_usage,
        cost: row.get("cost"),
    }
}

#[async_trait]
impl PromptStore for SqlitePromptStore {
    async fn find_by_hash(
        &self,
        prompt_hash: &str,
        provider: &str,
        model: &str,
    ) -> Result<Option<PromptCacheEntry>> {
        let row = sqlx::query(&format!(
            "{} WHERE provider = ? AND model = ? AND prompt_hash = ? \
             ORDER BY created_at_ms DESC, id DESC LIMIT 1",
            SELECT_COLUMNS
        ))
        .bind(provider)
        .bind(model)
        .bind(prompt_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_entry))
    }

    async fn fuzzy_candidates(&self, provider: &str, model: &str) -> Result<Vec<PromptCandidate>> {
        let rows = sqlx::query(
            "SELECT prompt_hash, normalized_prompt, created_at_ms FROM prompt_cache \
             WHERE provider = ? AND model = ? ORDER BY created_at_ms DESC, id DESC",
        )
        .bind(provider)
        .bind(model)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| PromptCandidate {
                prompt_hash: row.get("prompt_hash"),
                normalized_prompt: row.get("normalized_prompt"),
                timestamp: ts_from_millis(row.get("created_at_ms")),
            })
            .collect())
    }

    async fn insert(&self, entry: &PromptCacheEntry) -> Result<()> {
        let usage = entry.token_usage;
        sqlx::query(
            r#"
            INSERT INTO prompt_cache (prompt_hash, normalized_prompt, response, created_at_ms,
                                      provider, model, prompt_tokens, completion_tokens,
                                      total_tokens, cost)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.prompt_hash)
        .bind(&entry.normalized_prompt)
        .bind(&entry.response)
        .bind(entry.timestamp.timestamp_millis())
        .bind(&entry.provider)
        .bind(&entry.model)
        .bind(usage.map(|u| u.prompt_tokens as i64))
        .bind(usage.map(|u| u.completion_tokens as i64))
        .bind(usage.map(|u| u.total_tokens as i64))
        .bind(entry.cost)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let result = sqlx::query("DELETE FROM prompt_cache WHERE created_at_ms < ?")
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn retain_newest(&self, max_entries: usize) -> Result<usize> {
        let result = sqlx::query(
            r#"
            DELETE FROM prompt_cache WHERE id NOT IN (
                SELECT id FROM prompt_cache ORDER BY created_at_ms DESC, id DESC LIMIT ?
            )
            "#,
        )
        .bind(max_entries as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM prompt_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}
