use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the prompt cache database and the repository cache directory.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(&config.cache.prompt_db).await?;
    create_schema(&pool).await?;
    pool.close().await;

    std::fs::create_dir_all(config.cache.dir.join("repos"))?;
    Ok(())
}

/// Idempotent schema creation for the prompt cache.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // Entries are append-only; the newest row for a hash wins on lookup.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS prompt_cache (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            prompt_hash TEXT NOT NULL,
            normalized_prompt TEXT NOT NULL,
            response TEXT NOT NULL,
            created_at_ms INTEGER NOT NULL,
            provider TEXT NOT NULL,
            model TEXT NOT NULL,
            prompt_tokens INTEGER,
            completion_tokens INTEGER,
            total_tokens INTEGER,
            cost REAL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_prompt_cache_scope_hash \
         ON prompt_cache(provider, model, prompt_hash)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_prompt_cache_created_at ON prompt_cache(created_at_ms DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
