//! Rolling (5-minute window) write metrics (SPEC_FULL.md §4.7).
//!
//! Grounded on `examples/original_source/backend/src/oracle_writer/metrics.py`
//! (`RollingMetrics`). The Python deques of `(timestamp, value)` become
//! `VecDeque<(Instant, _)>` pruned the same way on every read; the
//! cumulative counters stay unwindowed, matching the original.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct Inner {
    batch_sizes: VecDeque<(Instant, usize)>,
    write_latencies: VecDeque<(Instant, f64)>,
    overflow_events: VecDeque<(Instant, u64)>,
    total_successful_writes: u64,
    total_failed_writes: u64,
    total_items_written: u64,
    last_write_time: Option<DateTime<Utc>>,
}

pub struct RollingMetrics {
    window: Duration,
    inner: Mutex<Inner>,
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub window_seconds: u64,
    pub avg_batch_size: f64,
    pub avg_write_latency_ms: f64,
    pub write_count_in_window: usize,
    pub items_written_in_window: u64,
    pub overflow_count_in_window: u64,
    pub throughput_items_per_sec: f64,
    pub total_successful_writes: u64,
    pub total_failed_writes: u64,
    pub total_items_written: u64,
    pub success_rate_pct: f64,
    pub last_write_time: Option<DateTime<Utc>>,
}

impl RollingMetrics {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            inner: Mutex::new(Inner {
                batch_sizes: VecDeque::new(),
                write_latencies: VecDeque::new(),
                overflow_events: VecDeque::new(),
                total_successful_writes: 0,
                total_failed_writes: 0,
                total_items_written: 0,
                last_write_time: None,
            }),
        }
    }

    fn prune<T>(window: Duration, deque: &mut VecDeque<(Instant, T)>) {
        let cutoff = Instant::now().checked_sub(window).unwrap_or(Instant::now());
        while matches!(deque.front(), Some((t, _)) if *t < cutoff) {
            deque.pop_front();
        }
    }

    pub async fn record_batch_write(&self, batch_size: usize, latency_ms: f64, success: bool) {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        inner.batch_sizes.push_back((now, batch_size));
        inner.write_latencies.push_back((now, latency_ms));

        if success {
            inner.total_successful_writes += 1;
            inner.total_items_written += batch_size as u64;
        } else {
            inner.total_failed_writes += 1;
        }
        inner.last_write_time = Some(Utc::now());

        Self::prune(self.window, &mut inner.batch_sizes);
        Self::prune(self.window, &mut inner.write_latencies);
    }

    pub async fn record_overflow(&self, count: u64) {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        inner.overflow_events.push_back((now, count));
        Self::prune(self.window, &mut inner.overflow_events);
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        let mut inner = self.inner.lock().await;
        Self::prune(self.window, &mut inner.batch_sizes);
        Self::prune(self.window, &mut inner.write_latencies);
        Self::prune(self.window, &mut inner.overflow_events);

        let write_count = inner.batch_sizes.len();
        let items_in_window: u64 = inner.batch_sizes.iter().map(|(_, s)| *s as u64).sum();
        let avg_batch_size = if write_count == 0 {
            0.0
        } else {
            items_in_window as f64 / write_count as f64
        };

        let avg_latency = if inner.write_latencies.is_empty() {
            0.0
        } else {
            inner.write_latencies.iter().map(|(_, l)| *l).sum::<f64>() / inner.write_latencies.len() as f64
        };

        let overflow_count: u64 = inner.overflow_events.iter().map(|(_, c)| *c).sum();

        let throughput = if inner.batch_sizes.len() > 1 {
            let oldest = inner.batch_sizes.front().unwrap().0;
            let newest = inner.batch_sizes.back().unwrap().0;
            let span = newest.duration_since(oldest).as_secs_f64();
            if span > 0.0 {
                items_in_window as f64 / span
            } else {
                0.0
            }
        } else {
            0.0
        };

        let total_writes = inner.total_successful_writes + inner.total_failed_writes;
        let success_rate = if total_writes == 0 {
            0.0
        } else {
            (inner.total_successful_writes as f64 / total_writes as f64) * 100.0
        };

        MetricsSnapshot {
            window_seconds: self.window.as_secs(),
            avg_batch_size,
            avg_write_latency_ms: avg_latency,
            write_count_in_window: write_count,
            items_written_in_window: items_in_window,
            overflow_count_in_window: overflow_count,
            throughput_items_per_sec: throughput,
            total_successful_writes: inner.total_successful_writes,
            total_failed_writes: inner.total_failed_writes,
            total_items_written: inner.total_items_written,
            success_rate_pct: success_rate,
            last_write_time: inner.last_write_time,
        }
    }

    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.batch_sizes.clear();
        inner.write_latencies.clear();
        inner.overflow_events.clear();
        inner.total_successful_writes = 0;
        inner.total_failed_writes = 0;
        inner.total_items_written = 0;
        inner.last_write_time = None;
    }
}
