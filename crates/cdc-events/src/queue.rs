//! C1: bounded FIFO event queue feeding the router (§4.1).
//!
//! One producer (the replication decoder) is the common case, but the
//! telemetry listener enqueues concurrently too, so the queue must be
//! MPSC-safe (§5). The consumer side (the router) is expected to be a
//! single task draining in batches.

use cdc_core::EventData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Default bounded capacity. Past this, `enqueue` applies backpressure to
/// the producer by awaiting channel capacity rather than dropping.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Lifetime/depth counters shared between the queue and every `EventProducer`
/// handle cloned off it, so an enqueue from either side is visible to `count()`
/// and `total_enqueued()`.
struct Counters {
    total_enqueued: AtomicU64,
    depth: AtomicU64,
}

pub struct EventQueue {
    sender: mpsc::Sender<EventData>,
    receiver: Mutex<mpsc::Receiver<EventData>>,
    counters: Arc<Counters>,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(capacity);
        Arc::new(Self {
            sender,
            receiver: Mutex::new(receiver),
            counters: Arc::new(Counters { total_enqueued: AtomicU64::new(0), depth: AtomicU64::new(0) }),
        })
    }

    /// A fresh handle producers can clone and hold independently; the queue
    /// itself owns the single receiver. Shares this queue's counters so
    /// enqueues through the handle still count toward `count()`/`total_enqueued()`.
    pub fn sender(&self) -> EventProducer {
        EventProducer { sender: self.sender.clone(), counters: self.counters.clone() }
    }

    /// Enqueues one event, applying backpressure once the queue is at
    /// capacity rather than dropping (§4.1).
    pub async fn enqueue(&self, event: EventData) {
        if self.sender.send(event).await.is_ok() {
            self.counters.total_enqueued.fetch_add(1, Ordering::SeqCst);
            self.counters.depth.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub async fn try_dequeue(&self) -> Option<EventData> {
        let mut receiver = self.receiver.lock().await;
        let event = receiver.try_recv().ok();
        if event.is_some() {
            self.counters.depth.fetch_sub(1, Ordering::SeqCst);
        }
        event
    }

    /// Drains up to `max_n` items without waiting for more to arrive.
    pub async fn dequeue_batch(&self, max_n: usize) -> Vec<EventData> {
        let mut receiver = self.receiver.lock().await;
        let mut batch = Vec::with_capacity(max_n.min(64));
        while batch.len() < max_n {
            match receiver.try_recv() {
                Ok(event) => {
                    self.counters.depth.fetch_sub(1, Ordering::SeqCst);
                    batch.push(event);
                }
                Err(_) => break,
            }
        }
        batch
    }

    /// Blocks until at least one item is available or the queue is closed,
    /// then drains up to `max_n` without waiting further. Used by the
    /// router so it doesn't busy-poll an empty queue (§4.7).
    pub async fn dequeue_batch_wait(&self, max_n: usize) -> Vec<EventData> {
        let mut receiver = self.receiver.lock().await;
        let mut batch = Vec::with_capacity(max_n.min(64));
        match receiver.recv().await {
            Some(event) => {
                self.counters.depth.fetch_sub(1, Ordering::SeqCst);
                batch.push(event);
            }
            None => return batch,
        }
        while batch.len() < max_n {
            match receiver.try_recv() {
                Ok(event) => {
                    self.counters.depth.fetch_sub(1, Ordering::SeqCst);
                    batch.push(event);
                }
                Err(_) => break,
            }
        }
        batch
    }

    pub fn count(&self) -> u64 {
        self.counters.depth.load(Ordering::SeqCst)
    }

    pub fn total_enqueued(&self) -> u64 {
        self.counters.total_enqueued.load(Ordering::SeqCst)
    }
}

/// Cloneable producer handle for the decoder/telemetry listener tasks. Shares
/// the parent queue's counters so the production enqueue path (not just
/// `EventQueue::enqueue` itself) keeps `count()`/`total_enqueued()` accurate.
#[derive(Clone)]
pub struct EventProducer {
    sender: mpsc::Sender<EventData>,
    counters: Arc<Counters>,
}

impl EventProducer {
    pub async fn enqueue(&self, event: EventData) -> Result<(), EventData> {
        self.sender.send(event).await.map_err(|e| e.0)?;
        self.counters.total_enqueued.fetch_add(1, Ordering::SeqCst);
        self.counters.depth.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdc_core::EventType;
    use chrono::Utc;

    fn sample(id: &str) -> EventData {
        let mut e = EventData::new(id, "graph-a", "Twin", EventType::TwinCreate, Utc::now());
        e.new_value = Some(Default::default());
        e
    }

    #[tokio::test]
    async fn enqueue_increments_both_counters() {
        let queue = EventQueue::new(8);
        queue.enqueue(sample("e1")).await;
        queue.enqueue(sample("e2")).await;
        assert_eq!(queue.count(), 2);
        assert_eq!(queue.total_enqueued(), 2);
    }

    #[tokio::test]
    async fn dequeue_batch_respects_max_n_and_drains_depth() {
        let queue = EventQueue::new(8);
        for i in 0..5 {
            queue.enqueue(sample(&format!("e{i}"))).await;
        }
        let batch = queue.dequeue_batch(3).await;
        assert_eq!(batch.len(), 3);
        assert_eq!(queue.count(), 2);
        // total_enqueued is lifetime, unaffected by dequeues.
        assert_eq!(queue.total_enqueued(), 5);
    }

    #[tokio::test]
    async fn dequeue_batch_on_empty_queue_returns_empty() {
        let queue = EventQueue::new(8);
        let batch = queue.dequeue_batch(10).await;
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn additional_producers_can_enqueue_concurrently() {
        let queue = EventQueue::new(16);
        let producer = queue.sender();
        producer.enqueue(sample("from-telemetry")).await.unwrap();
        queue.enqueue(sample("from-decoder")).await;
        assert_eq!(queue.count(), 2);
    }
}
