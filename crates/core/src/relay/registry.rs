//! Table of live stream sessions.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, RwLock};

use super::error::RelayError;

/// Lifecycle state of a session while it is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Helper is running but has not produced output yet.
    Spawned,
    /// At least one chunk has been read from the helper.
    Streaming,
}

/// Counters shared between a session's stream and its registry entry.
#[derive(Debug, Default)]
pub struct SessionStats {
    bytes_relayed: AtomicU64,
    streaming: AtomicBool,
}

impl SessionStats {
    /// Records a relayed chunk. Returns true for the first chunk of the session.
    pub fn record_chunk(&self, len: usize) -> bool {
        self.bytes_relayed.fetch_add(len as u64, Ordering::Relaxed);
        !self.streaming.swap(true, Ordering::AcqRel)
    }

    pub fn bytes_relayed(&self) -> u64 {
        self.bytes_relayed.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> SessionState {
        if self.streaming.load(Ordering::Acquire) {
            SessionState::Streaming
        } else {
            SessionState::Spawned
        }
    }
}

/// Snapshot of a live session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub magnet: String,
    pub file_index: usize,
    pub pid: Option<u32>,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub bytes_relayed: u64,
}

struct SessionEntry {
    magnet: String,
    file_index: usize,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    stats: Arc<SessionStats>,
    cancel: Option<oneshot::Sender<()>>,
}

impl SessionEntry {
    fn snapshot(&self, id: &str) -> SessionInfo {
        SessionInfo {
            id: id.to_string(),
            magnet: self.magnet.clone(),
            file_index: self.file_index,
            pid: self.pid,
            state: self.stats.state(),
            started_at: self.started_at,
            bytes_relayed: self.stats.bytes_relayed(),
        }
    }
}

/// Parameters for registering a freshly spawned session.
pub struct NewSession {
    pub id: String,
    pub magnet: String,
    pub file_index: usize,
    pub pid: Option<u32>,
    pub stats: Arc<SessionStats>,
    pub cancel: oneshot::Sender<()>,
}

/// Shared registry of running sessions, keyed by session id.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: NewSession) {
        let entry = SessionEntry {
            magnet: session.magnet,
            file_index: session.file_index,
            pid: session.pid,
            started_at: Utc::now(),
            stats: session.stats,
            cancel: Some(session.cancel),
        };
        self.sessions.write().await.insert(session.id, entry);
    }

    /// Removes a session once its helper has been reaped.
    pub async fn remove(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    pub async fn get(&self, id: &str) -> Option<SessionInfo> {
        self.sessions.read().await.get(id).map(|e| e.snapshot(id))
    }

    /// Lists live sessions, oldest first.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, entry)| entry.snapshot(id))
            .collect();
        sessions.sort_by_key(|s| s.started_at);
        sessions
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Asks the supervisor of a session to terminate its helper.
    ///
    /// The entry stays registered until the helper is reaped.
    pub async fn cancel(&self, id: &str) -> Result<(), RelayError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(id)
            .ok_or_else(|| RelayError::SessionNotFound(id.to_string()))?;
        if let Some(cancel) = entry.cancel.take() {
            let _ = cancel.send(());
        }
        Ok(())
    }

    /// Cancels every live session. Returns how many were signalled.
    pub async fn cancel_all(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let mut signalled = 0;
        for entry in sessions.values_mut() {
            if let Some(cancel) = entry.cancel.take() {
                let _ = cancel.send(());
                signalled += 1;
            }
        }
        signalled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_session(id: &str) -> (NewSession, oneshot::Receiver<()>, Arc<SessionStats>) {
        let (tx, rx) = oneshot::channel();
        let stats = Arc::new(SessionStats::default());
        (
            NewSession {
                id: id.to_string(),
                magnet: format!("magnet:?xt=urn:btih:{}", id),
                file_index: 0,
                pid: Some(4242),
                stats: Arc::clone(&stats),
                cancel: tx,
            },
            rx,
            stats,
        )
    }

    #[test]
    fn test_stats_first_chunk_switches_state() {
        let stats = SessionStats::default();
        assert_eq!(stats.state(), SessionState::Spawned);
        assert!(stats.record_chunk(10));
        assert!(!stats.record_chunk(5));
        assert_eq!(stats.state(), SessionState::Streaming);
        assert_eq!(stats.bytes_relayed(), 15);
    }

    #[tokio::test]
    async fn test_insert_get_remove() {
        let registry = SessionRegistry::new();
        let (session, _rx, stats) = new_session("a");
        registry.insert(session).await;

        stats.record_chunk(100);
        let info = registry.get("a").await.unwrap();
        assert_eq!(info.magnet, "magnet:?xt=urn:btih:a");
        assert_eq!(info.pid, Some(4242));
        assert_eq!(info.state, SessionState::Streaming);
        assert_eq!(info.bytes_relayed, 100);
        assert_eq!(registry.len().await, 1);

        assert!(registry.remove("a").await);
        assert!(!registry.remove("a").await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_cancel_signals_once() {
        let registry = SessionRegistry::new();
        let (session, rx, _stats) = new_session("a");
        registry.insert(session).await;

        registry.cancel("a").await.unwrap();
        assert!(rx.await.is_ok());

        // still registered until the supervisor removes it
        assert!(registry.get("a").await.is_some());
        assert!(registry.cancel("a").await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_unknown_session() {
        let registry = SessionRegistry::new();
        let err = registry.cancel("missing").await.unwrap_err();
        assert!(matches!(err, RelayError::SessionNotFound(id) if id == "missing"));
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let registry = SessionRegistry::new();
        let (a, rx_a, _) = new_session("a");
        let (b, rx_b, _) = new_session("b");
        registry.insert(a).await;
        registry.insert(b).await;

        assert_eq!(registry.cancel_all().await, 2);
        assert!(rx_a.await.is_ok());
        assert!(rx_b.await.is_ok());
        assert_eq!(registry.cancel_all().await, 0);
    }

    #[tokio::test]
    async fn test_list_is_sorted_by_start() {
        let registry = SessionRegistry::new();
        let (first, _rx1, _) = new_session("first");
        registry.insert(first).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let (second, _rx2, _) = new_session("second");
        registry.insert(second).await;

        let ids: Vec<String> = registry.list().await.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["first", "second"]);
    }
}
