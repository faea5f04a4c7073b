pub mod auth;
pub mod context;
pub mod error;
pub mod guard;
pub mod parameters;
pub mod storage;

// Re-export commonly used types
pub use auth::PasswordGate;
pub use context::{AnalysisKind, AnalysisResult, SessionContext};
pub use error::{Result, SessionError};
pub use guard::{DEFAULT_MIN_INTERVAL, RateLimitGuard};
pub use parameters::{AssistRatio, ParameterUpdate, SessionParameters};
pub use storage::{InMemorySessionStorage, Session, SessionStorage};

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clones_share_context() {
        let session = Session::new(RateLimitGuard::default());
        let clone = session.clone();

        session.context().await.parameters.heart_rate = "80".to_string();

        assert_eq!(clone.context().await.parameters.heart_rate, "80");
    }

    #[tokio::test]
    async fn test_storage() {
        let storage = InMemorySessionStorage::new();
        let session = Session::with_id("session1", RateLimitGuard::default());

        storage.save(session.clone()).await.unwrap();
        assert_eq!(storage.len().await, 1);

        let retrieved = storage.get("session1").await.unwrap();
        assert!(retrieved.is_some());

        storage.delete("session1").await.unwrap();
        assert!(storage.get("session1").await.unwrap().is_none());
        assert_eq!(storage.len().await, 0);
    }

    #[tokio::test]
    async fn test_purge_idle_drops_only_stale_sessions() {
        let storage = InMemorySessionStorage::new();
        let stale = Session::with_id("stale", RateLimitGuard::default());
        let active = Session::with_id("active", RateLimitGuard::default());
        storage.save(stale).await.unwrap();
        storage.save(active.clone()).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        active.touch();

        let removed = storage
            .purge_idle(std::time::Duration::from_millis(50))
            .await;

        assert_eq!(removed, 1);
        assert!(storage.get("stale").await.unwrap().is_none());
        assert!(storage.get("active").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_user_api_key_blank_is_cleared() {
        let session = Session::new(RateLimitGuard::default());
        let mut ctx = session.context().await;

        ctx.set_user_api_key("  sk-ant-123  ");
        assert_eq!(ctx.user_api_key.as_deref(), Some("sk-ant-123"));

        ctx.set_user_api_key("   ");
        assert!(ctx.user_api_key.is_none());
    }
}
