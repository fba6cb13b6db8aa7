//! Fixed-capacity FIFO buffer with automatic oldest-item eviction
//! (SPEC_FULL.md §4.5).
//!
//! Grounded on
//! `examples/original_source/backend/src/buffer/circular_buffer.py`
//! (`CircularBuffer`). `collections.deque(maxlen=...)`'s silent-eviction
//! behavior becomes an explicit `VecDeque` pop-then-push under a
//! `tokio::sync::Mutex`, since Rust has no ring-buffer-with-maxlen in std.

use std::collections::VecDeque;
use tokio::sync::Mutex;
use tracing::warn;

use crate::buffer::models::BufferedTagValue;
use crate::errors::{CollectorError, CollectorResult};

struct Inner {
    buffer: VecDeque<BufferedTagValue>,
    overflow_count: u64,
    total_added: u64,
    last_alert_count: u64,
}

pub struct CircularBuffer {
    max_size: usize,
    overflow_alert_threshold_pct: f64,
    inner: Mutex<Inner>,
}

impl CircularBuffer {
    pub fn new(max_size: usize, overflow_alert_threshold_pct: f64) -> Self {
        Self {
            max_size,
            overflow_alert_threshold_pct,
            inner: Mutex::new(Inner {
                buffer: VecDeque::with_capacity(max_size.min(4096)),
                overflow_count: 0,
                total_added: 0,
                last_alert_count: 0,
            }),
        }
    }

    /// Appends an item. If the buffer is already at capacity, the oldest
    /// item is evicted to make room and `false` is returned. The
    /// 80%-utilization "approaching capacity" alert re-arms only after the
    /// next actual overflow (mirrors `_last_alert_count` bookkeeping).
    pub async fn put(&self, item: BufferedTagValue) -> bool {
        let mut inner = self.inner.lock().await;
        let current_size = inner.buffer.len();
        let utilization_pct = (current_size as f64 / self.max_size as f64) * 100.0;

        if utilization_pct >= self.overflow_alert_threshold_pct && inner.overflow_count == inner.last_alert_count {
            warn!(utilization_pct, current_size, max_size = self.max_size, "buffer utilization high, approaching capacity");
            inner.last_alert_count = inner.overflow_count;
        }

        inner.buffer.push_back(item);
        inner.total_added += 1;

        let result = if current_size == self.max_size {
            inner.buffer.pop_front();
            inner.overflow_count += 1;
            let overflow_rate = (inner.overflow_count as f64 / inner.total_added as f64) * 100.0;
            warn!(overflow_count = inner.overflow_count, total_added = inner.total_added, overflow_rate, "buffer overflow, discarded oldest item");
            inner.last_alert_count = inner.overflow_count;
            crate::metrics::BUFFER_OVERFLOW_TOTAL.inc();
            false
        } else {
            true
        };
        crate::metrics::BUFFER_SIZE.set(inner.buffer.len() as f64);
        result
    }

    /// Removes and returns up to `count` items in FIFO order.
    pub async fn get(&self, count: usize) -> CollectorResult<Vec<BufferedTagValue>> {
        let mut inner = self.inner.lock().await;
        if inner.buffer.is_empty() {
            return Err(CollectorError::BufferEmpty);
        }
        let n = count.min(inner.buffer.len());
        let items: Vec<_> = inner.buffer.drain(..n).collect();
        crate::metrics::BUFFER_SIZE.set(inner.buffer.len() as f64);
        Ok(items)
    }

    pub async fn size(&self) -> usize {
        self.inner.lock().await.buffer.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.buffer.is_empty()
    }

    pub async fn is_full(&self) -> bool {
        self.inner.lock().await.buffer.len() >= self.max_size
    }

    pub async fn utilization(&self) -> f64 {
        let inner = self.inner.lock().await;
        (inner.buffer.len() as f64 / self.max_size as f64) * 100.0
    }

    pub async fn overflow_rate(&self) -> f64 {
        let inner = self.inner.lock().await;
        if inner.total_added == 0 {
            return 0.0;
        }
        (inner.overflow_count as f64 / inner.total_added as f64) * 100.0
    }

    pub async fn overflow_count(&self) -> u64 {
        self.inner.lock().await.overflow_count
    }

    pub async fn clear(&self) {
        self.inner.lock().await.buffer.clear();
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::models::Quality;

    fn item(addr: &str) -> BufferedTagValue {
        BufferedTagValue {
            timestamp: chrono::Utc::now(),
            plc_code: "P1".into(),
            tag_address: addr.into(),
            value_num: Some(1.0),
            value_str: "1".into(),
            quality: Quality::Good,
            category: crate::polling::models::Category::Operation,
            log_mode: crate::polling::models::LogMode::Always,
            machine_code: None,
        }
    }

    #[tokio::test]
    async fn put_then_get_fifo_order() {
        let buf = CircularBuffer::new(10, 80.0);
        buf.put(item("D100")).await;
        buf.put(item("D101")).await;

        let items = buf.get(2).await.unwrap();
        assert_eq!(items[0].tag_address, "D100");
        assert_eq!(items[1].tag_address, "D101");
    }

    #[tokio::test]
    async fn get_on_empty_buffer_errors() {
        let buf = CircularBuffer::new(10, 80.0);
        let err = buf.get(1).await.unwrap_err();
        assert!(matches!(err, CollectorError::BufferEmpty));
    }

    #[tokio::test]
    async fn overflow_evicts_oldest_and_counts() {
        let buf = CircularBuffer::new(2, 80.0);
        buf.put(item("D100")).await;
        let ok = buf.put(item("D101")).await;
        assert!(ok);
        let overflowed = buf.put(item("D102")).await;
        assert!(!overflowed);

        assert_eq!(buf.overflow_count().await, 1);
        assert_eq!(buf.size().await, 2);

        let items = buf.get(2).await.unwrap();
        assert_eq!(items[0].tag_address, "D101");
        assert_eq!(items[1].tag_address, "D102");
    }

    #[tokio::test]
    async fn utilization_and_full_report_correctly() {
        let buf = CircularBuffer::new(4, 80.0);
        buf.put(item("D100")).await;
        buf.put(item("D101")).await;
        assert_eq!(buf.utilization().await, 50.0);
        assert!(!buf.is_full().await);

        buf.put(item("D102")).await;
        buf.put(item("D103")).await;
        assert!(buf.is_full().await);
    }
}
