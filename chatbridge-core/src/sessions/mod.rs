//! Conversation session store with soft, time-based expiry.
//!
//! `SessionStore` owns the expiry policy; the storage engine sits behind the
//! `SessionRepository` port. Reads never fail for a non-empty user id: a
//! missing, explicitly expired or idle-too-long record comes back as a fresh
//! default session. Storage failures still propagate as
//! `BridgeError::Persistence`.
//!
//! There is no locking here. A caller must fetch once, mutate, and write once;
//! the server serializes those steps per user when configured to.

mod memory;
mod sqlite;

pub use memory::MemorySessionRepository;
pub use sqlite::SqliteSessionRepository;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::{BridgeError, Result};
use crate::models::{ConversationSession, SessionRecord};

/// Persistence port for session records, keyed by `user_id`.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find(&self, user_id: &str) -> Result<Option<SessionRecord>>;

    /// Insert or replace the record for `record.user_id`.
    async fn upsert(&self, record: &SessionRecord) -> Result<()>;

    /// Flag the record as expired without deleting it. No-op for unknown users.
    async fn mark_expired(&self, user_id: &str) -> Result<()>;

    /// Up to `count` records for `user_id`, newest first.
    async fn list_recent(&self, user_id: &str, count: u32) -> Result<Vec<SessionRecord>>;

    /// Backend description for health reporting.
    async fn health(&self) -> Result<String>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Clone)]
pub struct SessionStore {
    repo: Arc<dyn SessionRepository>,
    timeout: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    /// `timeout_seconds <= 0` disables time-based expiry.
    pub fn new(repo: Arc<dyn SessionRepository>, timeout_seconds: f64) -> Self {
        let timeout = if timeout_seconds > 0.0 {
            Some(Duration::milliseconds((timeout_seconds * 1000.0) as i64))
        } else {
            None
        };
        Self {
            repo,
            timeout,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn get(&self, user_id: &str) -> Result<ConversationSession> {
        require_user_id(user_id)?;
        let now = self.clock.now();

        let record = match self.repo.find(user_id).await? {
            Some(r) => r,
            None => return Ok(ConversationSession::fresh(user_id, now)),
        };

        if record.is_expired {
            tracing::debug!(user_id, "Session explicitly expired, starting fresh");
            return Ok(ConversationSession::fresh(user_id, now));
        }

        if let Some(timeout) = self.timeout {
            if now - record.updated_at > timeout {
                tracing::debug!(
                    user_id,
                    updated_at = %record.updated_at,
                    "Session idle past timeout, starting fresh"
                );
                return Ok(ConversationSession::fresh(user_id, now));
            }
        }

        Ok(record.into_session())
    }

    /// Upsert `session`, stamping `updated_at` (never moved backwards) and clearing any expiry mark.
    pub async fn set(&self, session: &mut ConversationSession) -> Result<()> {
        require_user_id(&session.user_id)?;
        session.updated_at = self.clock.now().max(session.updated_at);
        self.repo.upsert(&SessionRecord::from_session(session)).await
    }

    pub async fn expire(&self, user_id: &str) -> Result<()> {
        require_user_id(user_id)?;
        self.repo.mark_expired(user_id).await
    }

    /// Up to `count` stored sessions for `user_id`, oldest first.
    pub async fn list_recent(&self, user_id: &str, count: u32) -> Result<Vec<ConversationSession>> {
        require_user_id(user_id)?;
        let mut records = self.repo.list_recent(user_id, count).await?;
        records.reverse();
        Ok(records.into_iter().map(SessionRecord::into_session).collect())
    }

    pub async fn health(&self) -> Result<String> {
        self.repo.health().await
    }
}

fn require_user_id(user_id: &str) -> Result<()> {
    if user_id.is_empty() {
        return Err(BridgeError::Argument("user_id is required".to_string()));
    }
    Ok(())
}
