use std::str::FromStr;

use crate::config::SessionConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

pub async fn create_pool(config: &SessionConfig) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(&config.database_url)?.create_if_missing(true);
    SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await
}

/// Single-connection in-memory pool; every connection to `:memory:` is its own database.
pub async fn memory_pool() -> Result<SqlitePool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
}

pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS conversation_sessions (
            user_id         TEXT    PRIMARY KEY NOT NULL,
            conversation_id TEXT,
            updated_at      TEXT    NOT NULL,
            is_expired      BOOLEAN NOT NULL DEFAULT 0,
            agent_key       TEXT    NOT NULL DEFAULT 'default',
            state           TEXT
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_conversation_sessions_updated
         ON conversation_sessions (updated_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn health_check(pool: &SqlitePool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT sqlite_version()").fetch_one(pool).await?;
    Ok(row.0)
}
