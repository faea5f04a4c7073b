use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::info;
use uuid::Uuid;

use crate::{context::SessionContext, error::Result, guard::RateLimitGuard};

/// A user session. Clones share the same context.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    context: Arc<Mutex<SessionContext>>,
    /// Unix millis of the last request that loaded this session.
    last_seen: Arc<AtomicI64>,
}

impl Session {
    pub fn new(guard: RateLimitGuard) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), guard)
    }

    pub fn with_id(id: impl Into<String>, guard: RateLimitGuard) -> Self {
        let created_at = Utc::now();
        Self {
            id: id.into(),
            created_at,
            context: Arc::new(Mutex::new(SessionContext::new(guard))),
            last_seen: Arc::new(AtomicI64::new(created_at.timestamp_millis())),
        }
    }

    /// Record activity on this session.
    pub fn touch(&self) {
        self.last_seen
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn idle_for(&self) -> Duration {
        let idle_ms = Utc::now().timestamp_millis() - self.last_seen.load(Ordering::Relaxed);
        Duration::from_millis(idle_ms.max(0) as u64)
    }

    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.idle_for() > ttl
    }

    /// Lock the session context. Do not hold the guard across an outbound call.
    pub async fn context(&self) -> MutexGuard<'_, SessionContext> {
        self.context.lock().await
    }
}

/// Trait for storing and retrieving sessions
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn save(&self, session: Session) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Session>>;
    async fn delete(&self, id: &str) -> Result<()>;
    async fn len(&self) -> usize;
    /// Drop every session idle for longer than `ttl`. Returns how many were removed.
    async fn purge_idle(&self, ttl: Duration) -> usize;
}

/// In-memory implementation of SessionStorage
pub struct InMemorySessionStorage {
    sessions: Arc<DashMap<String, Session>>,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemorySessionStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn save(&self, session: Session) -> Result<()> {
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.get(id).map(|entry| entry.clone()))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.sessions.remove(id);
        Ok(())
    }

    async fn len(&self) -> usize {
        self.sessions.len()
    }

    async fn purge_idle(&self, ttl: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_expired(ttl));
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            info!("Purged {} idle sessions", removed);
        }
        removed
    }
}
