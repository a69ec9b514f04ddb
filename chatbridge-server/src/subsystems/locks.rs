//! Per-user mutual exclusion for the session read → invoke → write sequence.
//!
//! Entries are created on demand and dropped once no task holds or waits on
//! them, so the map stays proportional to the number of users in flight.
//! Scope is a single process.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default, Clone)]
pub struct UserLocks {
    inner: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

/// Held for the duration of one event. Releasing it may prune the map entry.
pub struct UserLockGuard {
    user_id: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, user_id: &str) -> UserLockGuard {
        let mutex = self
            .inner
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        UserLockGuard {
            user_id: user_id.to_string(),
            guard: Some(guard),
            locks: Arc::clone(&self.inner),
        }
    }

    /// Users with a live lock entry.
    pub fn active(&self) -> usize {
        self.inner.len()
    }
}

impl Drop for UserLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map itself still references the mutex: nobody holds or awaits it.
        self.locks
            .remove_if(&self.user_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
