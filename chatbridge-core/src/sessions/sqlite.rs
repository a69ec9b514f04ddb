use async_trait::async_trait;
use sqlx::SqlitePool;

use super::SessionRepository;
use crate::error::Result;
use crate::models::SessionRecord;

/// SQLite-backed session repository. Call `db::migrate` on the pool first.
#[derive(Debug, Clone)]
pub struct SqliteSessionRepository {
    pool: SqlitePool,
}

impl SqliteSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for SqliteSessionRepository {
    async fn find(&self, user_id: &str) -> Result<Option<SessionRecord>> {
        let record = sqlx::query_as::<_, SessionRecord>(
            "SELECT user_id, conversation_id, updated_at, is_expired, agent_key, state
             FROM conversation_sessions
             WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn upsert(&self, record: &SessionRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO conversation_sessions
             (user_id, conversation_id, updated_at, is_expired, agent_key, state)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                conversation_id = excluded.conversation_id,
                updated_at      = excluded.updated_at,
                is_expired      = excluded.is_expired,
                agent_key       = excluded.agent_key,
                state           = excluded.state",
        )
        .bind(&record.user_id)
        .bind(&record.conversation_id)
        .bind(record.updated_at)
        .bind(record.is_expired)
        .bind(&record.agent_key)
        .bind(&record.state)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_expired(&self, user_id: &str) -> Result<()> {
        sqlx::query("UPDATE conversation_sessions SET is_expired = 1 WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_recent(&self, user_id: &str, count: u32) -> Result<Vec<SessionRecord>> {
        let records = sqlx::query_as::<_, SessionRecord>(
            "SELECT user_id, conversation_id, updated_at, is_expired, agent_key, state
             FROM conversation_sessions
             WHERE user_id = ?
             ORDER BY updated_at DESC
             LIMIT ?",
        )
        .bind(user_id)
        .bind(count)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn health(&self) -> Result<String> {
        let version = crate::db::health_check(&self.pool).await?;
        Ok(format!("sqlite {}", version))
    }
}
