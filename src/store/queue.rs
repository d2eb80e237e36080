use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use utoipa::ToSchema;

/// Result of offering an item to a [`DropNewestQueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Item was buffered
    Accepted,
    /// Buffer was full; the offered item was discarded
    Dropped,
    /// Consumer side is gone
    Closed,
}

/// Counters for a bounded queue
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct QueueStats {
    pub capacity: usize,
    pub accepted: u64,
    pub dropped: u64,
}

/// Shared counters of a [`DropNewestQueue`], readable after the producer is gone
#[derive(Debug)]
pub struct QueueCounters {
    capacity: usize,
    accepted: AtomicU64,
    dropped: AtomicU64,
}

impl QueueCounters {
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> QueueStats {
        QueueStats {
            capacity: self.capacity,
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Bounded queue with an explicit "on full, discard newest" policy
///
/// The producer never waits: a full buffer means the item being offered is
/// thrown away and counted, while everything already buffered is kept.
pub struct DropNewestQueue<T> {
    tx: mpsc::Sender<T>,
    counters: Arc<QueueCounters>,
}

impl<T> DropNewestQueue<T> {
    /// Create a queue and the receiver its consumer drains
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(capacity);
        let queue = Self {
            tx,
            counters: Arc::new(QueueCounters {
                capacity,
                accepted: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        };
        (queue, rx)
    }

    /// Offer an item without waiting
    pub fn offer(&self, item: T) -> Offer {
        match self.tx.try_send(item) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                Offer::Accepted
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Offer::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Offer::Closed,
        }
    }

    /// Completes once the consumer has dropped its receiver
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn dropped(&self) -> u64 {
        self.counters.dropped()
    }

    pub fn stats(&self) -> QueueStats {
        self.counters.snapshot()
    }

    /// Counters that outlive this producer handle
    pub fn counters(&self) -> Arc<QueueCounters> {
        Arc::clone(&self.counters)
    }
}

impl<T> Clone for DropNewestQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            counters: Arc::clone(&self.counters),
        }
    }
}
