//! Conversation State Store
//!
//! The only mutation path for session data. Writes to one session are
//! serialized by a per-session async lock; different sessions never wait on
//! each other.

use crate::db::Database;
use crate::error::Result;
use crate::models::{Session, SessionSummary, Turn, WorkingMemory};
use async_trait::async_trait;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Storage behind the store
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<Session>>;

    async fn append_turn(&self, session_id: &str, requester_id: &str, turn: &Turn) -> Result<()>;

    async fn merge_memory(&self, session_id: &str, requester_id: &str, partial: &WorkingMemory) -> Result<()>;

    /// Append a turn and merge memory atomically
    async fn record_exchange(
        &self,
        session_id: &str,
        requester_id: &str,
        turn: &Turn,
        partial: &WorkingMemory,
    ) -> Result<()>;

    async fn list(&self, limit: usize) -> Result<Vec<SessionSummary>>;

    async fn ping(&self) -> Result<()>;
}

#[async_trait]
impl SessionBackend for Database {
    async fn load(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.get_session(session_id)?)
    }

    async fn append_turn(&self, session_id: &str, requester_id: &str, turn: &Turn) -> Result<()> {
        Ok(self.append_session_turn(session_id, requester_id, turn)?)
    }

    async fn merge_memory(&self, session_id: &str, requester_id: &str, partial: &WorkingMemory) -> Result<()> {
        Ok(self.merge_session_memory(session_id, requester_id, partial)?)
    }

    async fn record_exchange(
        &self,
        session_id: &str,
        requester_id: &str,
        turn: &Turn,
        partial: &WorkingMemory,
    ) -> Result<()> {
        Ok(self.record_session_exchange(session_id, requester_id, turn, partial)?)
    }

    async fn list(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        Ok(self.list_sessions(limit)?)
    }

    async fn ping(&self) -> Result<()> {
        Ok(Database::ping(self)?)
    }
}

pub struct SessionStore {
    backend: Arc<dyn SessionBackend>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn SessionBackend>) -> Self {
        Self {
            backend,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `op` while holding the session's lock, then drop the lock entry if idle
    async fn with_session_lock<T, F, Fut>(&self, session_id: &str, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let lock = self.lock_for(session_id);
        let result = {
            let _guard = lock.lock().await;
            op().await
        };
        drop(lock);
        self.locks.remove_if(session_id, |_, l| Arc::strong_count(l) == 1);
        result
    }

    /// Append a turn; creates the session for an unseen id
    pub async fn append_turn(&self, session_id: &str, requester_id: &str, turn: Turn) -> Result<()> {
        let turn = &turn;
        self.with_session_lock(session_id, || async move {
            self.backend.append_turn(session_id, requester_id, turn).await
        })
        .await
        .inspect_err(|e| log::error!("[STORE] append_turn({}) failed: {}", session_id, e))
    }

    /// Snapshot of the session as of this call
    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        self.backend
            .load(session_id)
            .await
            .inspect_err(|e| log::error!("[STORE] get_session({}) failed: {}", session_id, e))
    }

    /// Last-writer-wins merge of `partial` into working memory
    pub async fn merge_memory(&self, session_id: &str, requester_id: &str, partial: WorkingMemory) -> Result<()> {
        let partial = &partial;
        self.with_session_lock(session_id, || async move {
            self.backend.merge_memory(session_id, requester_id, partial).await
        })
        .await
        .inspect_err(|e| log::error!("[STORE] merge_memory({}) failed: {}", session_id, e))
    }

    /// Persist one request's turn together with its memory writes
    pub async fn record_exchange(
        &self,
        session_id: &str,
        requester_id: &str,
        turn: Turn,
        partial: WorkingMemory,
    ) -> Result<()> {
        let (turn, partial) = (&turn, &partial);
        self.with_session_lock(session_id, || async move {
            self.backend
                .record_exchange(session_id, requester_id, turn, partial)
                .await
        })
        .await
        .inspect_err(|e| log::error!("[STORE] record_exchange({}) failed: {}", session_id, e))
    }

    pub async fn list_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        self.backend.list(limit).await
    }

    pub async fn is_reachable(&self) -> bool {
        self.backend.ping().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BrainError;
    use serde_json::json;

    fn store() -> SessionStore {
        SessionStore::new(Arc::new(Database::in_memory().unwrap()))
    }

    /// Backend whose storage is unavailable
    struct DownBackend;

    #[async_trait]
    impl SessionBackend for DownBackend {
        async fn load(&self, _: &str) -> Result<Option<Session>> {
            Err(BrainError::SessionStore("disk unavailable".into()))
        }
        async fn append_turn(&self, _: &str, _: &str, _: &Turn) -> Result<()> {
            Err(BrainError::SessionStore("disk unavailable".into()))
        }
        async fn merge_memory(&self, _: &str, _: &str, _: &WorkingMemory) -> Result<()> {
            Err(BrainError::SessionStore("disk unavailable".into()))
        }
        async fn record_exchange(&self, _: &str, _: &str, _: &Turn, _: &WorkingMemory) -> Result<()> {
            Err(BrainError::SessionStore("disk unavailable".into()))
        }
        async fn list(&self, _: usize) -> Result<Vec<SessionSummary>> {
            Err(BrainError::SessionStore("disk unavailable".into()))
        }
        async fn ping(&self) -> Result<()> {
            Err(BrainError::SessionStore("disk unavailable".into()))
        }
    }

    #[tokio::test]
    async fn test_append_then_get_ends_with_turn() {
        let store = store();
        let turn = Turn::agent("filesystem_agent", "list files", "notes.txt", vec![]);
        store.append_turn("s1", "mohit", turn.clone()).await.unwrap();

        let session = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.last_turn().map(|t| &t.content), Some(&turn.content));
    }

    #[tokio::test]
    async fn test_concurrent_appends_to_one_session_are_all_kept() {
        let store = Arc::new(store());
        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append_turn("busy", "mohit", Turn::user(format!("m{}", i))).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let session = store.get_session("busy").await.unwrap().unwrap();
        assert_eq!(session.turns.len(), 20);
        assert!(store.locks.is_empty());
    }

    #[tokio::test]
    async fn test_sessions_do_not_share_memory() {
        let store = Arc::new(store());

        let a = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut memory = WorkingMemory::new();
                memory.insert("secret".into(), json!("alpha"));
                store.merge_memory("session-a", "alice", memory).await
            })
        };
        let b = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut memory = WorkingMemory::new();
                memory.insert("secret".into(), json!("beta"));
                store.merge_memory("session-b", "bob", memory).await
            })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let a = store.get_session("session-a").await.unwrap().unwrap();
        let b = store.get_session("session-b").await.unwrap().unwrap();
        assert_eq!(a.working_memory.get("secret"), Some(&json!("alpha")));
        assert_eq!(b.working_memory.get("secret"), Some(&json!("beta")));
        assert_eq!(a.working_memory.len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_backend_surfaces_store_error() {
        let store = SessionStore::new(Arc::new(DownBackend));
        let err = store.append_turn("s1", "mohit", Turn::user("hi")).await.unwrap_err();
        assert!(matches!(err, BrainError::SessionStore(_)));
        assert!(err.is_fatal());
        assert!(!store.is_reachable().await);
    }

    #[tokio::test]
    async fn test_unknown_session_is_none() {
        assert!(store().get_session("nobody").await.unwrap().is_none());
    }
}
