use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::SessionRepository;
use crate::error::Result;
use crate::models::SessionRecord;

/// Process-local repository. Loses everything on restart; meant for tests and demos.
#[derive(Debug, Default)]
pub struct MemorySessionRepository {
    records: RwLock<HashMap<String, SessionRecord>>,
}

impl MemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for MemorySessionRepository {
    async fn find(&self, user_id: &str) -> Result<Option<SessionRecord>> {
        Ok(self.records.read().await.get(user_id).cloned())
    }

    async fn upsert(&self, record: &SessionRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(record.user_id.clone(), record.clone());
        Ok(())
    }

    async fn mark_expired(&self, user_id: &str) -> Result<()> {
        if let Some(record) = self.records.write().await.get_mut(user_id) {
            record.is_expired = true;
        }
        Ok(())
    }

    async fn list_recent(&self, user_id: &str, count: u32) -> Result<Vec<SessionRecord>> {
        let records = self.records.read().await;
        Ok(records
            .get(user_id)
            .filter(|_| count > 0)
            .cloned()
            .into_iter()
            .collect())
    }

    async fn health(&self) -> Result<String> {
        let count = self.records.read().await.len();
        Ok(format!("memory ({} sessions)", count))
    }
}
