//! Bounded FIFO queue carrying polling samples from workers to consumers
//! (SPEC_FULL.md §4.4).
//!
//! Grounded on `examples/original_source/backend/src/polling/data_queue.py`
//! (`DataQueue`), which wraps `queue.Queue(maxsize)`. `tokio::sync::mpsc`
//! gives the same bounded producer/consumer semantics natively; this wrapper
//! exists to reproduce the Python class's `put`-with-timeout behavior
//! (`QueueFullError` rather than blocking forever) and its stats surface.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::errors::{CollectorError, CollectorResult};
use crate::polling::models::PollingSample;

pub struct DataQueue {
    tx: mpsc::Sender<PollingSample>,
    rx: tokio::sync::Mutex<mpsc::Receiver<PollingSample>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl DataQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueues a sample, waiting up to `timeout` for room. Returns
    /// `QueueFull` (the Rust analog of `QueueFullError`) on timeout.
    pub async fn put(&self, sample: PollingSample, timeout: Duration) -> CollectorResult<()> {
        match tokio::time::timeout(timeout, self.tx.send(sample)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(CollectorError::QueueFull {
                name: "data_queue".into(),
                capacity: self.capacity,
            }),
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(CollectorError::QueueFull {
                    name: "data_queue".into(),
                    capacity: self.capacity,
                })
            }
        }
    }

    pub async fn get(&self) -> Option<PollingSample> {
        self.rx.lock().await.recv().await
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
