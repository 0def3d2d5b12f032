//! Fan-out of discovery events to connected clients.
//!
//! The [`BroadcastDispatcher`] sits between the registry and the WebSocket
//! layer. It holds only `ConnectionId → queue` handles; connection state
//! stays with the connection manager.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::api::ConnectionId;
use crate::error::OverflowError;

use super::emitter::EventEmitter;
use super::queue::{OutboundQueue, OverflowPolicy, PushOutcome};
use super::DiscoveryEvent;

/// Publishes each event to every subscribed connection's outbound queue.
///
/// Events are serialized once and shared as `Arc<str>`. Enqueueing never
/// blocks, so a slow client only affects its own queue.
pub struct BroadcastDispatcher {
    subscribers: DashMap<ConnectionId, Arc<OutboundQueue>>,
    queue_capacity: usize,
    policy: OverflowPolicy,
    published: AtomicU64,
}

impl BroadcastDispatcher {
    pub fn new(queue_capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            subscribers: DashMap::new(),
            queue_capacity,
            policy,
            published: AtomicU64::new(0),
        }
    }

    /// Registers a connection and returns its queue, pre-filled with
    /// `initial` events.
    ///
    /// Re-subscribing an id closes the previous queue.
    pub fn subscribe(
        &self,
        id: ConnectionId,
        initial: impl IntoIterator<Item = DiscoveryEvent>,
    ) -> Arc<OutboundQueue> {
        let seed: Vec<Arc<str>> = initial.into_iter().filter_map(|e| serialize(&e)).collect();
        let seeded = seed.len();
        let queue = Arc::new(OutboundQueue::with_initial(self.queue_capacity, seed));

        if let Some(previous) = self.subscribers.insert(id, Arc::clone(&queue)) {
            previous.close();
        }
        log::debug!(
            "[Dispatcher] {} subscribed with {} initial event(s)",
            id,
            seeded
        );
        queue
    }

    /// Removes a connection and closes its queue.
    ///
    /// Returns whether the id was subscribed.
    pub fn unsubscribe(&self, id: ConnectionId) -> bool {
        match self.subscribers.remove(&id) {
            Some((_, queue)) => {
                queue.close();
                log::debug!("[Dispatcher] {} unsubscribed", id);
                true
            }
            None => false,
        }
    }

    /// Serializes `event` once and enqueues it on every subscriber.
    pub fn publish(&self, event: &DiscoveryEvent) {
        let Some(payload) = serialize(event) else {
            return;
        };
        self.published.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            device_id = event.device_id(),
            subscribers = self.subscribers.len(),
            ?event,
            "discovery_event"
        );

        let mut overflowed = Vec::new();
        let mut closed = Vec::new();
        for entry in self.subscribers.iter() {
            match entry.value().push(Arc::clone(&payload), self.policy) {
                PushOutcome::Queued => {}
                PushOutcome::DroppedOldest => {
                    log::debug!(
                        "[Dispatcher] {} queue full, dropped oldest (total dropped: {})",
                        entry.key(),
                        entry.value().dropped_count()
                    );
                }
                PushOutcome::Overflow => overflowed.push(*entry.key()),
                PushOutcome::Closed => closed.push(*entry.key()),
            }
        }

        // Removal happens after iteration; DashMap shards are locked while iterating.
        for id in overflowed {
            if let Some((_, queue)) = self.subscribers.remove(&id) {
                queue.close();
                let err = OverflowError {
                    connection_id: id,
                    capacity: queue.capacity(),
                };
                log::warn!("[Dispatcher] {}; disconnecting", err);
            }
        }
        for id in closed {
            if self.subscribers.remove(&id).is_some() {
                log::debug!("[Dispatcher] {} queue already closed, removed", id);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Total events published since startup.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

}

impl EventEmitter for BroadcastDispatcher {
    fn emit_discovery(&self, event: DiscoveryEvent) {
        self.publish(&event);
    }
}

fn serialize(event: &DiscoveryEvent) -> Option<Arc<str>> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            log::error!("[Dispatcher] Failed to serialize event: {}", e);
            None
        }
    }
}
