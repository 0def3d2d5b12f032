//! Bounded per-connection outbound queue.
//!
//! Producers never block: when the queue is full the [`OverflowPolicy`]
//! decides whether the oldest message is discarded or the queue is closed.
//! The single consumer (the connection's send loop) awaits [`OutboundQueue::recv`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// What to do when a connection's queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the oldest pending message to make room.
    #[default]
    DropOldest,
    /// Close the queue; the connection is torn down.
    Disconnect,
}

/// Result of a non-blocking push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Enqueued without loss.
    Queued,
    /// Enqueued after discarding the oldest message.
    DroppedOldest,
    /// Queue was full under [`OverflowPolicy::Disconnect`]; it is now closed.
    Overflow,
    /// Queue was already closed; message discarded.
    Closed,
}

struct QueueState {
    messages: VecDeque<Arc<str>>,
    /// Leading messages that came from the initial batch.
    seeded: usize,
    closed: bool,
}

impl QueueState {
    fn live_len(&self) -> usize {
        self.messages.len() - self.seeded
    }

    fn pop(&mut self) -> Option<Arc<str>> {
        let message = self.messages.pop_front()?;
        self.seeded = self.seeded.saturating_sub(1);
        Some(message)
    }
}

/// FIFO of serialized messages awaiting delivery to one connection.
pub struct OutboundQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl OutboundQueue {
    /// Creates an empty queue holding at most `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self::with_initial(capacity, Vec::new())
    }

    /// Creates a queue pre-filled with `initial`.
    ///
    /// The initial batch does not count against `capacity` and is never
    /// evicted; only live messages pushed afterwards are bounded.
    pub fn with_initial(capacity: usize, initial: Vec<Arc<str>>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                seeded: initial.len(),
                messages: initial.into(),
                closed: false,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueues a message without blocking.
    pub fn push(&self, message: Arc<str>, policy: OverflowPolicy) -> PushOutcome {
        let outcome = {
            let mut state = self.state.lock();
            if state.closed {
                return PushOutcome::Closed;
            }

            if state.live_len() < self.capacity {
                state.messages.push_back(message);
                PushOutcome::Queued
            } else {
                match policy {
                    OverflowPolicy::DropOldest => {
                        let oldest_live = state.seeded;
                        if state.messages.remove(oldest_live).is_some() {
                            self.dropped.fetch_add(1, Ordering::Relaxed);
                        }
                        state.messages.push_back(message);
                        PushOutcome::DroppedOldest
                    }
                    OverflowPolicy::Disconnect => {
                        state.closed = true;
                        state.messages.clear();
                        state.seeded = 0;
                        PushOutcome::Overflow
                    }
                }
            }
        };
        self.notify.notify_one();
        outcome
    }

    /// Waits for the next message.
    ///
    /// Returns `None` once the queue is closed, even if messages remain.
    pub async fn recv(&self) -> Option<Arc<str>> {
        loop {
            {
                let mut state = self.state.lock();
                if state.closed {
                    return None;
                }
                if let Some(message) = state.pop() {
                    return Some(message);
                }
            }
            self.notify.notified().await;
        }
    }

    #[cfg(test)]
    pub(crate) fn try_recv(&self) -> Option<Arc<str>> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        state.pop()
    }

    /// Closes the queue and wakes the consumer. Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            state.closed = true;
            state.messages.clear();
            state.seeded = 0;
        }
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Messages discarded by [`OverflowPolicy::DropOldest`] so far.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn msg(s: &str) -> Arc<str> {
        Arc::from(s)
    }

    #[test]
    fn drop_oldest_keeps_newest_messages() {
        let queue = OutboundQueue::new(2);
        assert_eq!(queue.push(msg("a"), OverflowPolicy::DropOldest), PushOutcome::Queued);
        assert_eq!(queue.push(msg("b"), OverflowPolicy::DropOldest), PushOutcome::Queued);
        assert_eq!(
            queue.push(msg("c"), OverflowPolicy::DropOldest),
            PushOutcome::DroppedOldest
        );

        assert_eq!(queue.dropped_count(), 1);
        assert_eq!(queue.try_recv().as_deref(), Some("b"));
        assert_eq!(queue.try_recv().as_deref(), Some("c"));
        assert_eq!(queue.try_recv(), None);
    }

    #[test]
    fn disconnect_policy_closes_on_overflow() {
        let queue = OutboundQueue::new(1);
        assert_eq!(queue.push(msg("a"), OverflowPolicy::Disconnect), PushOutcome::Queued);
        assert_eq!(queue.push(msg("b"), OverflowPolicy::Disconnect), PushOutcome::Overflow);
        assert!(queue.is_closed());
        assert_eq!(queue.push(msg("c"), OverflowPolicy::Disconnect), PushOutcome::Closed);
        assert_eq!(queue.try_recv(), None);
    }

    #[test]
    fn initial_batch_is_never_evicted() {
        let queue = OutboundQueue::with_initial(1, vec![msg("a"), msg("b"), msg("c")]);

        // Live messages are bounded on their own.
        assert_eq!(queue.push(msg("d"), OverflowPolicy::DropOldest), PushOutcome::Queued);
        assert_eq!(
            queue.push(msg("e"), OverflowPolicy::DropOldest),
            PushOutcome::DroppedOldest
        );
        assert_eq!(queue.dropped_count(), 1);

        let drained: Vec<_> = std::iter::from_fn(|| queue.try_recv()).collect();
        assert_eq!(drained, vec![msg("a"), msg("b"), msg("c"), msg("e")]);
    }

    #[test]
    fn pending_seed_does_not_use_live_capacity() {
        let queue = OutboundQueue::with_initial(2, vec![msg("a"), msg("b")]);
        assert_eq!(queue.try_recv().as_deref(), Some("a"));

        assert_eq!(queue.push(msg("c"), OverflowPolicy::Disconnect), PushOutcome::Queued);
        assert_eq!(queue.push(msg("d"), OverflowPolicy::Disconnect), PushOutcome::Queued);
        assert_eq!(queue.push(msg("e"), OverflowPolicy::Disconnect), PushOutcome::Overflow);
    }

    #[tokio::test]
    async fn recv_wakes_on_push() {
        let queue = Arc::new(OutboundQueue::new(4));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.recv().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(msg("hello"), OverflowPolicy::DropOldest);

        let received = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn recv_returns_none_after_close() {
        let queue = Arc::new(OutboundQueue::new(4));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.recv().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();

        let received = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, None);
    }
}
