//! Bounded outbound queue for fire-and-forget side effects.
//!
//! Producers never block: when the queue is full the oldest entry is
//! dropped and counted. A single background worker drains the queue with
//! [`OutboundQueue::pop`], which returns `None` once cancelled.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Result of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Item queued without loss
    Enqueued,
    /// Item queued; the oldest entry was dropped to make room
    DroppedOldest,
}

/// Bounded FIFO with drop-oldest backpressure.
pub struct OutboundQueue<T> {
    name: &'static str,
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
    pushed: AtomicU64,
}

impl<T> OutboundQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1).
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name,
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            pushed: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Enqueue without blocking.
    pub fn push(&self, item: T) -> PushOutcome {
        let outcome = {
            let mut items = self.lock();
            let outcome = if items.len() >= self.capacity {
                items.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                PushOutcome::DroppedOldest
            } else {
                PushOutcome::Enqueued
            };
            items.push_back(item);
            outcome
        };
        self.pushed.fetch_add(1, Ordering::Relaxed);
        if outcome == PushOutcome::DroppedOldest {
            warn!(queue = self.name, "Outbound queue full, dropped oldest entry");
        }
        self.notify.notify_one();
        outcome
    }

    /// Dequeue without waiting.
    pub fn try_pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Wait for the next item, or `None` once `cancel` fires.
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<T> {
        loop {
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = self.notify.notified() => {}
            }
        }
    }

    /// Remove and return everything currently queued.
    pub fn drain(&self) -> Vec<T> {
        self.lock().drain(..).collect()
    }

    /// Items currently queued.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries lost to backpressure.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Total pushes.
    pub fn pushed_count(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Queue name (for logs).
    pub fn name(&self) -> &'static str {
        self.name
    }
}
