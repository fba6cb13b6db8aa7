//! Per-group polling worker: FIXED (scheduled) and HANDSHAKE (triggered)
//! modes (SPEC_FULL.md §4.3).
//!
//! Grounded on
//! `examples/original_source/backend/src/polling/polling_thread.py`
//! (`PollingThread.execute_poll`/error classification),
//! `fixed_polling_thread.py` (`FixedPollingThread.run`), and
//! `handshake_polling_thread.py` (`HandshakePollingThread.run`/`trigger`).
//!
//! Two deliberate deviations from the Python originals, both required by
//! SPEC_FULL.md:
//! - FIXED mode's sleep is chunked into <=1s waits against a
//!   `CancellationToken` instead of a single `stop_event.wait(timeout=sleep_time)`,
//!   so shutdown during a long sleep still returns within 1s.
//! - HANDSHAKE's deduplication check happens exactly once, in `trigger()`,
//!   instead of once in `trigger()` and again in `run()` — the Python
//!   double-check is a TOCTOU race (a trigger can pass the first check,
//!   lose the race to another trigger, and still fire twice within the
//!   window). Collapsing to a single check also means `run()` never
//!   discards an accepted trigger.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::errors::CollectorError;
use crate::metrics::{POLLS_TOTAL, POLL_DURATION, POLL_ERRORS_TOTAL};
use crate::plc::pool_manager::PoolManager;
use crate::plc::transport::PlcTransport;
use crate::polling::failure_logger::PollingFailureLogger;
use crate::polling::models::{PollingGroup, PollingMode, PollingSample, ThreadState};
use crate::polling::queue::DataQueue;

fn mode_label(mode: PollingMode) -> &'static str {
    match mode {
        PollingMode::Fixed => "fixed",
        PollingMode::Handshake => "handshake",
    }
}

const MAX_CHUNK_WAIT: Duration = Duration::from_secs(1);
const HANDSHAKE_DEDUP_WINDOW: Duration = Duration::from_secs(1);
const HANDSHAKE_POLL_TIMEOUT: Duration = Duration::from_secs(1);

fn thread_state_from_u8(v: u8) -> ThreadState {
    match v {
        0 => ThreadState::Stopped,
        1 => ThreadState::Running,
        2 => ThreadState::Stopping,
        _ => ThreadState::Error,
    }
}

pub struct PollingWorker<T: PlcTransport + 'static> {
    group: PollingGroup,
    pool_manager: Arc<PoolManager<T>>,
    data_queue: Arc<DataQueue>,
    failure_logger: Arc<PollingFailureLogger>,
    cancel: CancellationToken,
    state: AtomicU8,
    total_polls: AtomicU64,
    total_errors: AtomicU64,
    recent_poll_times_ms: Mutex<Vec<u64>>,
    notify: Notify,
    last_trigger: Mutex<Option<Instant>>,
}

impl<T: PlcTransport + 'static> PollingWorker<T> {
    pub fn new(
        group: PollingGroup,
        pool_manager: Arc<PoolManager<T>>,
        data_queue: Arc<DataQueue>,
        failure_logger: Arc<PollingFailureLogger>,
    ) -> Self {
        Self {
            group,
            pool_manager,
            data_queue,
            failure_logger,
            cancel: CancellationToken::new(),
            state: AtomicU8::new(0),
            total_polls: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            recent_poll_times_ms: Mutex::new(Vec::with_capacity(100)),
            notify: Notify::new(),
            last_trigger: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ThreadState {
        thread_state_from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ThreadState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.set_state(ThreadState::Stopping);
        self.cancel.cancel();
    }

    /// Forces the worker into `ERROR` state without touching its
    /// cancellation token. Used by the engine when a stop times out: the
    /// spawned task is left running, but the engine stops treating the
    /// group as healthy.
    pub fn mark_error(&self) {
        self.set_state(ThreadState::Error);
    }

    /// Manually triggers a poll on a HANDSHAKE worker. Deduplicates here,
    /// once: a trigger within `HANDSHAKE_DEDUP_WINDOW` of the last accepted
    /// one is rejected outright rather than queued.
    pub async fn trigger(&self) -> bool {
        if self.state() != ThreadState::Running {
            warn!(group = %self.group.group_name, "cannot trigger non-running worker");
            return false;
        }

        let mut last = self.last_trigger.lock().await;
        let now = Instant::now();
        if let Some(prev) = *last {
            if now.duration_since(prev) < HANDSHAKE_DEDUP_WINDOW {
                return false;
            }
        }
        *last = Some(now);
        drop(last);

        self.notify.notify_one();
        true
    }

    /// Runs one poll cycle: reads the group's tags through the pool
    /// manager, builds a `PollingSample`, enqueues it, and records
    /// timing/error stats. Returns `true` on a (possibly partial) success.
    async fn execute_poll(&self) -> bool {
        let start = Instant::now();
        let result = self
            .pool_manager
            .read_batch(&self.group.plc_code, &self.group.tag_addresses)
            .await;

        let poll_time_ms = start.elapsed().as_millis() as u64;
        self.total_polls.fetch_add(1, Ordering::Relaxed);
        self.record_poll_time(poll_time_ms).await;

        POLLS_TOTAL
            .with_label_values(&[&self.group.plc_code, &self.group.group_name, mode_label(self.group.mode)])
            .inc();
        POLL_DURATION
            .with_label_values(&[&self.group.plc_code, &self.group.group_name])
            .observe(start.elapsed().as_secs_f64());

        let tag_values = match result {
            Ok(values) => values,
            Err(e) => {
                self.total_errors.fetch_add(1, Ordering::Relaxed);
                POLL_ERRORS_TOTAL.with_label_values(&[&self.group.plc_code, &self.group.group_name]).inc();
                self.classify_and_log(&e).await;
                self.set_state(ThreadState::Error);
                return false;
            }
        };

        if self.state() == ThreadState::Error {
            self.set_state(ThreadState::Running);
        }

        let error_tags: Vec<String> = self
            .group
            .tag_addresses
            .iter()
            .filter(|addr| !tag_values.contains_key(*addr))
            .cloned()
            .collect();

        let sample = PollingSample {
            timestamp: chrono::Utc::now(),
            group_id: self.group.id,
            group_name: self.group.group_name.clone(),
            plc_code: self.group.plc_code.clone(),
            mode: self.group.mode,
            category: self.group.category,
            tag_values,
            poll_time_ms,
            error_tags,
            tag_log_modes: self.group.tag_log_modes.clone(),
            tag_machine_codes: self.group.tag_machine_codes.clone(),
        };

        if let Err(e) = self.data_queue.put(sample, Duration::from_secs(30)).await {
            self.total_errors.fetch_add(1, Ordering::Relaxed);
            POLL_ERRORS_TOTAL.with_label_values(&[&self.group.plc_code, &self.group.group_name]).inc();
            error!(group = %self.group.group_name, error = %e, "failed to enqueue polling sample, dropped");
            self.failure_logger.log_read_failure(&self.group.plc_code, &self.group.group_name, &e.to_string()).await;
            return false;
        }

        true
    }

    async fn record_poll_time(&self, ms: u64) {
        let mut recent = self.recent_poll_times_ms.lock().await;
        recent.push(ms);
        if recent.len() > 100 {
            recent.remove(0);
        }
    }

    pub async fn avg_poll_time_ms(&self) -> Option<f64> {
        let recent = self.recent_poll_times_ms.lock().await;
        if recent.is_empty() {
            return None;
        }
        Some(recent.iter().sum::<u64>() as f64 / recent.len() as f64)
    }

    async fn classify_and_log(&self, err: &CollectorError) {
        let plc_code = &self.group.plc_code;
        let group_name = &self.group.group_name;
        let message = err.to_string();
        match err {
            CollectorError::ConnectionFailed { .. } => {
                self.failure_logger.log_connection_failure(plc_code, group_name, &message).await
            }
            CollectorError::Timeout { .. } => {
                self.failure_logger.log_timeout_failure(plc_code, group_name, &message).await
            }
            _ => self.failure_logger.log_read_failure(plc_code, group_name, &message).await,
        }
    }

    /// FIXED-mode loop: polls at `interval_ms`, drift-corrected against a
    /// monotonic clock. `next_deadline += interval` rather than
    /// `now + interval`, so a slow cycle doesn't push every future deadline
    /// back by the same amount.
    pub async fn run_fixed(self: Arc<Self>) {
        let interval = Duration::from_millis(self.group.interval_ms.expect("FIXED group always has an interval"));
        info!(group = %self.group.group_name, interval_ms = interval.as_millis(), "FIXED polling loop starting");
        self.set_state(ThreadState::Running);

        let mut next_deadline = Instant::now() + interval;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let now = Instant::now();
            if next_deadline > now {
                if self.wait_chunked(next_deadline - now).await {
                    break;
                }
            } else {
                let behind = now.duration_since(next_deadline);
                if behind > Duration::from_millis(100) {
                    warn!(group = %self.group.group_name, behind_ms = behind.as_millis(), "polling cycle running behind");
                }
            }

            if self.cancel.is_cancelled() {
                break;
            }

            let poll_start = Instant::now();
            self.execute_poll().await;
            let poll_elapsed = poll_start.elapsed();
            if poll_elapsed > interval {
                warn!(group = %self.group.group_name, poll_ms = poll_elapsed.as_millis(), interval_ms = interval.as_millis(), "poll exceeded interval");
            }

            next_deadline += interval;
            if next_deadline < Instant::now() {
                // Fell badly behind; resync instead of firing a burst of
                // catch-up polls.
                next_deadline = Instant::now() + interval;
            }
        }

        self.set_state(ThreadState::Stopped);
        info!(group = %self.group.group_name, "FIXED polling loop stopped");
    }

    /// Sleeps in <=1s chunks so cancellation during a long sleep still
    /// returns promptly. Returns `true` if cancelled during the wait.
    async fn wait_chunked(&self, total: Duration) -> bool {
        let mut remaining = total;
        loop {
            let chunk = remaining.min(MAX_CHUNK_WAIT);
            tokio::select! {
                _ = self.cancel.cancelled() => return true,
                _ = tokio::time::sleep(chunk) => {}
            }
            if chunk >= remaining {
                return false;
            }
            remaining -= chunk;
        }
    }

    /// HANDSHAKE-mode loop: wakes roughly every second to check for
    /// cancellation, and executes a poll whenever `trigger()` signals.
    pub async fn run_handshake(self: Arc<Self>) {
        info!(group = %self.group.group_name, "HANDSHAKE polling loop starting");
        self.set_state(ThreadState::Running);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(HANDSHAKE_POLL_TIMEOUT) => continue,
                _ = self.notify.notified() => {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    info!(group = %self.group.group_name, "HANDSHAKE trigger received, polling");
                    let ok = self.execute_poll().await;
                    if !ok {
                        error!(group = %self.group.group_name, "HANDSHAKE poll failed");
                    }
                }
            }
        }

        self.set_state(ThreadState::Stopped);
        info!(group = %self.group.group_name, "HANDSHAKE polling loop stopped");
    }

    pub async fn run(self: Arc<Self>) {
        match self.group.mode {
            PollingMode::Fixed => self.run_fixed().await,
            PollingMode::Handshake => self.run_handshake().await,
        }
    }

    pub fn total_polls(&self) -> u64 {
        self.total_polls.load(Ordering::Relaxed)
    }

    pub fn total_errors(&self) -> u64 {
        self.total_errors.load(Ordering::Relaxed)
    }

    pub fn group(&self) -> &PollingGroup {
        &self.group
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::PlcConnectionRecord;
    use crate::plc::transport::mock::MockTransport;
    use crate::polling::models::Category;
    use async_trait::async_trait;
    use crate::config_store::ConfigStore;
    use crate::errors::CollectorResult;

    struct FakeStore;
    #[async_trait]
    impl ConfigStore for FakeStore {
        async fn load_plc_connections(&self) -> CollectorResult<Vec<PlcConnectionRecord>> {
            Ok(vec![PlcConnectionRecord {
                plc_code: "P1".into(),
                plc_name: "Line1".into(),
                ip_address: "127.0.0.1".into(),
                port: 5010,
                protocol: "MC3E".into(),
                connection_timeout: 5,
                is_active: true,
            }])
        }
        async fn load_polling_groups(&self) -> CollectorResult<Vec<crate::config_store::PollingGroupRecord>> {
            Ok(vec![])
        }
        async fn load_tags(&self) -> CollectorResult<Vec<crate::config_store::TagRecord>> {
            Ok(vec![])
        }
    }

    async fn make_worker(mode: PollingMode, interval_ms: Option<u64>) -> Arc<PollingWorker<MockTransport>> {
        let mut pm = PoolManager::<MockTransport>::new(
            2,
            Duration::from_secs(1),
            Duration::from_secs(1),
            Duration::from_secs(600),
        );
        pm.initialize(&FakeStore).await.unwrap();

        let group = PollingGroup::new(
            1,
            "g1".into(),
            "P1".into(),
            mode,
            interval_ms,
            Category::Operation,
            vec!["D100".into()],
            std::collections::HashMap::new(),
            std::collections::HashMap::new(),
        )
        .unwrap();

        let root = std::env::temp_dir().join(format!("scada-worker-test-{}", std::process::id()));
        Arc::new(PollingWorker::new(
            group,
            Arc::new(pm),
            Arc::new(DataQueue::new(16)),
            Arc::new(PollingFailureLogger::new(root)),
        ))
    }

    #[tokio::test]
    async fn handshake_trigger_deduplicates_within_window() {
        let worker = make_worker(PollingMode::Handshake, None).await;
        worker.set_state(ThreadState::Running);

        assert!(worker.trigger().await);
        assert!(!worker.trigger().await);
    }

    #[tokio::test]
    async fn trigger_rejected_when_not_running() {
        let worker = make_worker(PollingMode::Handshake, None).await;
        assert!(!worker.trigger().await);
    }

    #[tokio::test]
    async fn wait_chunked_returns_promptly_on_cancel() {
        let worker = make_worker(PollingMode::Fixed, Some(100)).await;
        let w = worker.clone();
        let handle = tokio::spawn(async move { w.wait_chunked(Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        worker.cancel.cancel();

        let cancelled = tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(cancelled);
    }
}
