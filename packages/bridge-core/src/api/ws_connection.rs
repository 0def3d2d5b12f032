//! WebSocket connection tracking and management.
//!
//! This module provides tracking of WebSocket connections with force-close capability:
//!
//! - `WsConnectionManager`: Tracks all active WebSocket connections
//! - `ConnectionGuard`: RAII guard for automatic cleanup on disconnect

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::events::BroadcastDispatcher;

/// Process-unique identifier of a client connection, displayed as `ws-<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ws-{}", self.0)
    }
}

/// Lifecycle of a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Upgrade done, not yet subscribed.
    Connecting,
    /// Subscribed and receiving events.
    Open,
    /// Send loop exited, cleanup pending.
    Closing,
    /// Removed from the manager and the dispatcher.
    Closed,
}

struct ConnectionEntry {
    state: ConnectionState,
    connected_at: Instant,
}

/// Manages all active WebSocket connections.
///
/// Thread-safe and designed for concurrent access from multiple
/// WebSocket handlers. Uses hierarchical cancellation tokens for
/// efficient force-close of all connections.
pub struct WsConnectionManager {
    /// Active connections.
    connections: DashMap<ConnectionId, ConnectionEntry>,
    /// Counter for generating unique connection IDs.
    next_id: AtomicU64,
    /// Global cancellation token - when cancelled, all connections close.
    /// Wrapped in RwLock so it can be replaced after close_all().
    global_cancel: RwLock<CancellationToken>,
    /// Unsubscribed from when a connection goes away.
    dispatcher: Arc<BroadcastDispatcher>,
}

impl WsConnectionManager {
    pub fn new(dispatcher: Arc<BroadcastDispatcher>) -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            global_cancel: RwLock::new(CancellationToken::new()),
            dispatcher,
        }
    }

    /// Registers a new connection in the `Connecting` state and returns a
    /// guard for RAII cleanup.
    pub fn register(self: &Arc<Self>) -> ConnectionGuard {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel_token = self.global_cancel.read().child_token();

        self.connections.insert(
            id,
            ConnectionEntry {
                state: ConnectionState::Connecting,
                connected_at: Instant::now(),
            },
        );
        log::info!(
            "[WS] Connection registered: {} (total: {})",
            id,
            self.connections.len()
        );

        ConnectionGuard {
            id,
            manager: Arc::clone(self),
            cancel_token,
        }
    }

    fn set_state(&self, id: ConnectionId, state: ConnectionState) {
        if let Some(mut entry) = self.connections.get_mut(&id) {
            log::debug!("[WS] {} {:?} -> {:?}", id, entry.state, state);
            entry.state = state;
        }
    }

    /// Unsubscribes and forgets a connection.
    fn unregister(&self, id: ConnectionId) {
        self.dispatcher.unsubscribe(id);
        if let Some((_, entry)) = self.connections.remove(&id) {
            log::info!(
                "[WS] Connection closed: {} after {:?} (remaining: {})",
                id,
                entry.connected_at.elapsed(),
                self.connections.len()
            );
        }
    }

    /// Returns the state of a connection, or `Closed` if it is unknown.
    pub fn state(&self, id: ConnectionId) -> ConnectionState {
        self.connections
            .get(&id)
            .map(|e| e.state)
            .unwrap_or(ConnectionState::Closed)
    }

    /// Returns the number of active connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Force-closes all connections.
    ///
    /// This cancels the global token, which signals all connection handlers
    /// to terminate gracefully. After cancellation, a fresh token is created
    /// so new connections can still be accepted.
    ///
    /// Returns the number of connections that were signaled to close.
    pub fn close_all(&self) -> usize {
        let count = self.connections.len();
        if count > 0 {
            log::info!("[WS] Force-closing {} connection(s)", count);
        }
        let mut guard = self.global_cancel.write();
        guard.cancel();
        *guard = CancellationToken::new();
        count
    }
}

/// RAII guard that unregisters a connection when dropped.
///
/// This ensures connections are always cleaned up, even if the handler
/// panics or exits early.
pub struct ConnectionGuard {
    id: ConnectionId,
    manager: Arc<WsConnectionManager>,
    /// Token for this specific connection - cancelled on force-close.
    cancel_token: CancellationToken,
}

impl ConnectionGuard {
    /// Returns the connection ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the cancellation token for this connection.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Moves the connection to a new lifecycle state.
    pub fn set_state(&self, state: ConnectionState) {
        self.manager.set_state(self.id, state);
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.manager.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::OverflowPolicy;

    fn manager() -> (Arc<WsConnectionManager>, Arc<BroadcastDispatcher>) {
        let dispatcher = Arc::new(BroadcastDispatcher::new(8, OverflowPolicy::DropOldest));
        (
            Arc::new(WsConnectionManager::new(Arc::clone(&dispatcher))),
            dispatcher,
        )
    }

    #[test]
    fn ids_are_unique_and_displayed_with_prefix() {
        let (manager, _) = manager();
        let a = manager.register();
        let b = manager.register();

        assert_ne!(a.id(), b.id());
        assert_eq!(a.id().to_string(), "ws-1");
        assert_eq!(b.id().to_string(), "ws-2");
        assert_eq!(manager.connection_count(), 2);
    }

    #[test]
    fn guard_drop_closes_and_unsubscribes() {
        let (manager, dispatcher) = manager();
        let guard = manager.register();
        let id = guard.id();
        assert_eq!(manager.state(id), ConnectionState::Connecting);

        let queue = dispatcher.subscribe(id, Vec::new());
        guard.set_state(ConnectionState::Open);
        assert_eq!(manager.state(id), ConnectionState::Open);

        drop(guard);

        assert_eq!(manager.state(id), ConnectionState::Closed);
        assert_eq!(manager.connection_count(), 0);
        assert_eq!(dispatcher.subscriber_count(), 0);
        assert!(queue.is_closed());
    }

    #[test]
    fn close_all_cancels_existing_but_not_new_connections() {
        let (manager, _) = manager();
        let before = manager.register();

        assert_eq!(manager.close_all(), 1);
        assert!(before.cancel_token().is_cancelled());

        let after = manager.register();
        assert!(!after.cancel_token().is_cancelled());
    }
}
