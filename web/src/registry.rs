//! Live WebSocket sessions keyed by user.
//!
//! A user may hold any number of sessions (one per device). The registry maps
//! each [`UserId`] to the handles of its open sessions. A handle is the
//! sending half of a bounded channel whose receiver is owned by the gateway
//! task driving the socket, so pushing to a session never holds a registry
//! lock and never touches the socket directly.
//!
//! ```text
//! gateway task ── add(user, handle) ──►┌──────────────────────┐
//!      ▲                               │ user ─► [h1, h2, ...]│
//!      │ frames                        └──────────────────────┘
//!      │                                         │ get(user)
//!   mpsc rx ◄────────── handle.push(frame) ◄── notifier
//! ```

use courier_core::order::UserId;
use courier_runtime::metrics::WS_CONNECTIONS;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Default per-session outbound buffer.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

/// Identifies one session among a user's sessions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why a frame could not be queued for a session.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// The session's socket task has exited.
    #[error("session {0} is closed")]
    Closed(ConnectionId),

    /// The session is not draining its buffer.
    #[error("session {0} outbound buffer is full")]
    Full(ConnectionId),
}

/// Outbound side of one live session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    id: ConnectionId,
    sender: mpsc::Sender<String>,
}

impl SessionHandle {
    /// Create a handle and the receiver its socket task drains.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                id: ConnectionId::new(),
                sender,
            },
            receiver,
        )
    }

    /// This session's id.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a text frame without waiting.
    ///
    /// # Errors
    ///
    /// [`PushError::Closed`] if the session is gone, [`PushError::Full`] if
    /// its buffer is full.
    pub fn push(&self, frame: String) -> Result<(), PushError> {
        self.sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PushError::Full(self.id),
            mpsc::error::TrySendError::Closed(_) => PushError::Closed(self.id),
        })
    }

    /// Whether the receiving task has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Concurrent map from user to live session handles.
///
/// Cloning is cheap; clones share the same map.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    sessions: Arc<DashMap<UserId, Vec<SessionHandle>>>,
    connections: Arc<AtomicUsize>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session for `user_id`. Existing sessions are kept.
    pub fn add(&self, user_id: UserId, handle: SessionHandle) {
        let mut entry = self.sessions.entry(user_id).or_default();
        entry.push(handle);
        // Counted while the shard is still locked, so `close_all` cannot
        // subtract this session before it was added.
        self.connections.fetch_add(1, Ordering::SeqCst);
        drop(entry);
        self.record_gauge();
    }

    /// Remove one session. The user's entry is dropped together with its last
    /// session.
    ///
    /// Returns whether the session was registered.
    pub fn remove(&self, user_id: UserId, connection_id: ConnectionId) -> bool {
        let mut removed = false;
        self.sessions.remove_if_mut(&user_id, |_, handles| {
            let before = handles.len();
            handles.retain(|h| h.id != connection_id);
            removed = handles.len() != before;
            if removed {
                self.connections.fetch_sub(1, Ordering::SeqCst);
            }
            handles.is_empty()
        });

        if removed {
            self.record_gauge();
        }
        removed
    }

    /// Snapshot of the user's sessions, or `None` when the user has none.
    #[must_use]
    pub fn get(&self, user_id: UserId) -> Option<Vec<SessionHandle>> {
        self.sessions.get(&user_id).map(|entry| entry.value().clone())
    }

    /// Open sessions across all users.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Users with at least one open session.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.sessions.len()
    }

    /// Drop every session. Their socket tasks see the channel close and shut
    /// the socket down.
    ///
    /// Returns how many sessions were dropped.
    pub fn close_all(&self) -> usize {
        let mut dropped = 0;
        self.sessions.retain(|_, handles| {
            dropped += handles.len();
            self.connections.fetch_sub(handles.len(), Ordering::SeqCst);
            false
        });
        self.record_gauge();
        dropped
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_gauge(&self) {
        metrics::gauge!(WS_CONNECTIONS).set(self.connection_count() as f64);
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("users", &self.user_count())
            .field("connections", &self.connection_count())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn ids(handles: &[SessionHandle]) -> HashSet<ConnectionId> {
        handles.iter().map(SessionHandle::id).collect()
    }

    #[test]
    fn add_keeps_every_session() {
        let registry = ConnectionRegistry::new();
        let user = UserId::random();
        let (h1, _rx1) = SessionHandle::channel(4);
        let (h2, _rx2) = SessionHandle::channel(4);

        registry.add(user, h1.clone());
        registry.add(user, h2.clone());

        let sessions = registry.get(user).unwrap();
        assert_eq!(ids(&sessions), HashSet::from([h1.id(), h2.id()]));
        assert_eq!(registry.connection_count(), 2);
        assert_eq!(registry.user_count(), 1);
    }

    #[test]
    fn remove_only_drops_matching_session() {
        let registry = ConnectionRegistry::new();
        let user = UserId::random();
        let (h1, _rx1) = SessionHandle::channel(4);
        let (h2, _rx2) = SessionHandle::channel(4);
        registry.add(user, h1.clone());
        registry.add(user, h2.clone());

        assert!(registry.remove(user, h1.id()));
        assert_eq!(ids(&registry.get(user).unwrap()), HashSet::from([h2.id()]));

        assert!(registry.remove(user, h2.id()));
        assert!(registry.get(user).is_none());
        assert_eq!(registry.user_count(), 0);
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn removing_unknown_session_is_a_no_op() {
        let registry = ConnectionRegistry::new();
        let user = UserId::random();
        let (h1, _rx1) = SessionHandle::channel(4);
        registry.add(user, h1.clone());

        assert!(!registry.remove(user, ConnectionId::new()));
        assert!(!registry.remove(UserId::random(), h1.id()));
        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn unknown_user_has_no_sessions() {
        assert!(ConnectionRegistry::new().get(UserId::random()).is_none());
    }

    #[test]
    fn push_reports_full_and_closed() {
        let (handle, rx) = SessionHandle::channel(1);
        handle.push("a".to_string()).unwrap();
        assert_eq!(
            handle.push("b".to_string()),
            Err(PushError::Full(handle.id()))
        );

        drop(rx);
        assert!(handle.is_closed());
        assert_eq!(
            handle.push("c".to_string()),
            Err(PushError::Closed(handle.id()))
        );
    }

    #[tokio::test]
    async fn close_all_closes_receivers() {
        let registry = ConnectionRegistry::new();
        let (h1, mut rx1) = SessionHandle::channel(4);
        let (h2, mut rx2) = SessionHandle::channel(4);
        registry.add(UserId::random(), h1);
        registry.add(UserId::random(), h2);

        assert_eq!(registry.close_all(), 2);
        assert_eq!(registry.connection_count(), 0);
        assert!(rx1.recv().await.is_none());
        assert!(rx2.recv().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_add_remove_get_is_consistent() {
        let registry = ConnectionRegistry::new();
        let users: Vec<UserId> = (0..8).map(|_| UserId::random()).collect();

        let mut tasks = Vec::new();
        for worker in 0..32 {
            let registry = registry.clone();
            let user = users[worker % users.len()];
            tasks.push(tokio::spawn(async move {
                let mut receivers = Vec::new();
                for _ in 0..50 {
                    let (handle, rx) = SessionHandle::channel(1);
                    let id = handle.id();
                    registry.add(user, handle);
                    receivers.push(rx);

                    // Our own session must be visible after add.
                    let seen = registry.get(user).expect("user has a session");
                    assert!(seen.iter().any(|h| h.id() == id));

                    assert!(registry.remove(user, id));
                    tokio::task::yield_now().await;
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.user_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adds_are_not_lost() {
        let registry = ConnectionRegistry::new();
        let user = UserId::random();

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    let (handle, rx) = SessionHandle::channel(1);
                    registry.add(user, handle);
                    rx
                })
            })
            .collect();

        let mut receivers = Vec::new();
        for task in tasks {
            receivers.push(task.await.unwrap());
        }

        assert_eq!(registry.get(user).unwrap().len(), 64);
        assert_eq!(registry.connection_count(), 64);
    }

    #[test]
    fn close_all_racing_adds_keeps_the_count_exact() {
        const ADDERS: usize = 4;
        const PER_ADDER: usize = 500;

        let registry = ConnectionRegistry::new();
        let users: Vec<UserId> = (0..4).map(|_| UserId::random()).collect();

        std::thread::scope(|scope| {
            for adder in 0..ADDERS {
                let registry = &registry;
                let user = users[adder % users.len()];
                scope.spawn(move || {
                    for _ in 0..PER_ADDER {
                        let (handle, _rx) = SessionHandle::channel(1);
                        registry.add(user, handle);
                    }
                });
            }
            scope.spawn(|| {
                for _ in 0..PER_ADDER {
                    registry.close_all();
                    // A wrapped counter would show up as a huge value.
                    assert!(registry.connection_count() <= ADDERS * PER_ADDER);
                }
            });
        });

        registry.close_all();
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.user_count(), 0);
    }
}
