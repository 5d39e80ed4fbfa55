//! Per-connection outbound queue
//!
//! Bounded FIFO with drop-oldest backpressure. Any publish may push; only the
//! connection's writer task pops. Pushing never blocks, so the dispatcher is
//! never stalled by a slow consumer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::message::EventEnvelope;

/// Result of a push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Appended with room to spare
    Queued,
    /// Queue was full; the oldest pending envelope was discarded
    DroppedOldest,
    /// Queue is closed; nothing was appended
    Closed,
}

#[derive(Debug)]
struct QueueState {
    items: VecDeque<Arc<EventEnvelope>>,
    closed: bool,
}

#[derive(Debug)]
struct QueueInner {
    capacity: usize,
    state: Mutex<QueueState>,
    notify: Notify,
    dropped: AtomicU64,
}

/// Shared handle to one connection's outbound queue
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    inner: Arc<QueueInner>,
}

impl OutboundQueue {
    /// Create a queue holding at most `capacity` envelopes (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(QueueInner {
                capacity,
                state: Mutex::new(QueueState {
                    items: VecDeque::with_capacity(capacity),
                    closed: false,
                }),
                notify: Notify::new(),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Append an envelope without blocking
    pub fn push(&self, envelope: Arc<EventEnvelope>) -> PushOutcome {
        let outcome = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return PushOutcome::Closed;
            }
            let outcome = if state.items.len() >= self.inner.capacity {
                state.items.pop_front();
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                PushOutcome::DroppedOldest
            } else {
                PushOutcome::Queued
            };
            state.items.push_back(envelope);
            outcome
        };

        self.inner.notify.notify_one();
        outcome
    }

    /// Take the oldest envelope, waiting while the queue is empty
    ///
    /// Returns `None` once the queue has been closed.
    pub async fn pop(&self) -> Option<Arc<EventEnvelope>> {
        loop {
            let notified = self.inner.notify.notified();
            {
                let mut state = self.inner.state.lock();
                if state.closed {
                    return None;
                }
                if let Some(envelope) = state.items.pop_front() {
                    return Some(envelope);
                }
            }
            notified.await;
        }
    }

    /// Close the queue, discarding anything pending and waking the consumer
    pub fn close(&self) {
        {
            let mut state = self.inner.state.lock();
            state.closed = true;
            state.items.clear();
        }
        self.inner.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of envelopes discarded by the drop-oldest policy
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Copy of the pending envelopes, oldest first
    pub fn snapshot(&self) -> Vec<Arc<EventEnvelope>> {
        self.inner.state.lock().items.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    fn envelope(n: usize) -> Arc<EventEnvelope> {
        Arc::new(EventEnvelope::new(format!("e{}", n), json!(n)))
    }

    #[test]
    fn test_drop_oldest_when_full() {
        let queue = OutboundQueue::new(8);
        for n in 1..=12 {
            queue.push(envelope(n));
        }

        let events: Vec<String> = queue.snapshot().iter().map(|e| e.event.clone()).collect();
        let expected: Vec<String> = (5..=12).map(|n| format!("e{}", n)).collect();
        assert_eq!(events, expected);
        assert_eq!(queue.dropped(), 4);
        assert_eq!(queue.len(), 8);
    }

    #[test]
    fn test_push_outcomes() {
        let queue = OutboundQueue::new(1);
        assert_eq!(queue.push(envelope(1)), PushOutcome::Queued);
        assert_eq!(queue.push(envelope(2)), PushOutcome::DroppedOldest);
        queue.close();
        assert_eq!(queue.push(envelope(3)), PushOutcome::Closed);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let queue = OutboundQueue::new(0);
        assert_eq!(queue.capacity(), 1);
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = OutboundQueue::new(4);
        let consumer = queue.clone();
        let task = tokio::spawn(async move { consumer.pop().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(envelope(7));

        let popped = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(popped.unwrap().event, "e7");
    }

    #[tokio::test]
    async fn test_close_wakes_consumer() {
        let queue = OutboundQueue::new(4);
        let consumer = queue.clone();
        let task = tokio::spawn(async move { consumer.pop().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let popped = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn test_pop_preserves_fifo_order() {
        let queue = OutboundQueue::new(4);
        queue.push(envelope(1));
        queue.push(envelope(2));
        assert_eq!(queue.pop().await.unwrap().event, "e1");
        assert_eq!(queue.pop().await.unwrap().event, "e2");
    }
}
