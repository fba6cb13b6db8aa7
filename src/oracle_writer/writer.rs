//! Batched Oracle historian writer (SPEC_FULL.md §4.7).
//!
//! Grounded on `examples/original_source/backend/src/oracle_writer/writer.py`
//! (`OracleWriter`). The dual time/size trigger, the retry-then-CSV-fallback
//! path and `_flush_remaining_data` on shutdown are carried over directly;
//! `cursor.executemany(..., batcherrors=True)` / `cursor.getbatcherrors()`
//! becomes a per-row `Connection::execute` loop inside one transaction,
//! since the `oracle` crate's bulk array-bind API wasn't present in the
//! retrieved reference pack to copy faithfully (see DESIGN.md) — the
//! behavior (partial-success tolerance, one commit per batch) matches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::backoff::with_backoff;
use crate::buffer::circular::CircularBuffer;
use crate::buffer::models::{BufferedTagValue, WriterMetrics};
use crate::cache::TagValueCache;
use crate::config::BufferConfig;
use crate::errors::{CollectorError, CollectorResult};
use crate::oracle_writer::backup::CsvBackup;
use crate::oracle_writer::metrics::RollingMetrics;
use crate::oracle_writer::pool::OraclePool;
use crate::polling::models::{Category, LogMode};

const OPERATION_TABLE: &str = "TAG_OPERATION_LOG";
const TAGLOG_TABLE: &str = "TAG_VALUE_LOG";
const TAGLOG_SEQUENCE: &str = "TAG_VALUE_LOG_SEQ";
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const ERROR_BACKOFF: Duration = Duration::from_secs(1);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

struct OperationRow {
    time_rfc3339: String,
    name: String,
    value: String,
}

struct TagLogRow {
    otime_rfc3339: String,
    tag_name: String,
    tag_type: &'static str,
    value_str: String,
    value_num: Option<f64>,
}

pub struct OracleWriter {
    buffer: Arc<CircularBuffer>,
    pool: Arc<OraclePool>,
    cache: Arc<TagValueCache>,
    metrics: Arc<RollingMetrics>,
    csv_backup: Arc<CsvBackup>,
    batch_size: usize,
    write_interval: Duration,
    retry_delays: Vec<Duration>,
    running: AtomicBool,
    cancel: CancellationToken,
}

impl OracleWriter {
    pub fn new(
        buffer: Arc<CircularBuffer>,
        pool: Arc<OraclePool>,
        cache: Arc<TagValueCache>,
        metrics: Arc<RollingMetrics>,
        csv_backup: Arc<CsvBackup>,
        config: &BufferConfig,
    ) -> Self {
        Self {
            buffer,
            pool,
            cache,
            metrics,
            csv_backup,
            batch_size: config.batch_size,
            write_interval: Duration::from_secs_f64(config.write_interval_secs),
            retry_delays: (0..config.retry_count.max(1))
                .map(|i| Duration::from_secs(1u64 << i.min(2)))
                .collect(),
            running: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Main loop: wakes every 100ms, fires a batch on either trigger, and
    /// on a hard loop error (vs. a per-batch Oracle failure, which is
    /// already handled inside `write_batch`) backs off 1s and continues.
    /// On cancellation, drains the buffer via `flush_remaining` before
    /// returning.
    pub async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::Relaxed);
        info!(batch_size = self.batch_size, write_interval_ms = self.write_interval.as_millis(), "oracle writer started");

        let mut last_write = Instant::now();
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = self.cancel.cancelled() => break,
            }

            let size = self.buffer.size().await;
            let time_trigger = last_write.elapsed() >= self.write_interval;
            let size_trigger = size >= self.batch_size;

            if size > 0 && (time_trigger || size_trigger) {
                let n = size.min(self.batch_size);
                match self.write_batch(n).await {
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "oracle writer loop error, backing off");
                        tokio::time::sleep(ERROR_BACKOFF).await;
                    }
                }
                last_write = Instant::now();
            }
        }

        self.flush_remaining().await;
        self.running.store(false, Ordering::Relaxed);
        info!("oracle writer stopped");
    }

    /// Drains whatever remains in the buffer on shutdown, writing batch by
    /// batch until empty or until a batch fails outright (matches
    /// `_flush_remaining_data`), bounded by `FLUSH_TIMEOUT` so shutdown
    /// cannot hang indefinitely on a down database.
    async fn flush_remaining(&self) {
        let deadline = Instant::now() + FLUSH_TIMEOUT;
        loop {
            if Instant::now() >= deadline {
                warn!("flush timeout reached with data still buffered");
                break;
            }
            let size = self.buffer.size().await;
            if size == 0 {
                break;
            }
            let n = size.min(self.batch_size);
            match self.write_batch(n).await {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    error!(error = %e, "flush batch errored, stopping flush");
                    break;
                }
            }
        }
    }

    /// Pulls `count` items off the buffer, filters/routes them, inserts,
    /// and reports metrics/backup. Returns `Ok(true)` if the batch
    /// (non-)write succeeded and the caller should keep draining, `Ok(false)`
    /// if it gave up after exhausting retries.
    async fn write_batch(&self, count: usize) -> CollectorResult<bool> {
        let items = match self.buffer.get(count).await {
            Ok(items) => items,
            Err(CollectorError::BufferEmpty) => return Ok(true),
            Err(e) => return Err(e),
        };
        if items.is_empty() {
            return Ok(true);
        }

        let started = Instant::now();
        let to_write = self.filter_batch(&items).await;

        let result = with_backoff(
            &self.retry_delays,
            |_attempt| {
                let pool = self.pool.clone();
                let operation_rows = build_operation_rows(&to_write);
                let taglog_rows = build_taglog_rows(&to_write);
                async move { execute_insert(&pool, operation_rows, taglog_rows).await }
            },
            |e: &CollectorError| matches!(e, CollectorError::OracleBatchFailure(_)),
        )
        .await;

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        crate::metrics::ORACLE_WRITE_DURATION.observe(latency_ms / 1000.0);

        match result {
            Ok(()) => {
                self.update_cache(&items).await;
                self.metrics.record_batch_write(items.len(), latency_ms, true).await;
                crate::metrics::ORACLE_WRITES_TOTAL.with_label_values(&["success"]).inc();
                info!(count = items.len(), written = to_write.len(), latency_ms, "batch written to oracle");
                Ok(true)
            }
            Err(e) => {
                self.metrics.record_batch_write(items.len(), latency_ms, false).await;
                crate::metrics::ORACLE_WRITES_TOTAL.with_label_values(&["failure"]).inc();
                warn!(error = %e, count = items.len(), "batch failed after all retries, backing up to csv");
                if let Err(io_err) = self.csv_backup.save_failed_batch(&items).await {
                    error!(error = %io_err, "failed to write csv backup for failed batch");
                }
                Ok(false)
            }
        }
    }

    /// `NEVER` tags are dropped; `ON_CHANGE` tags are dropped unless the
    /// cached last value differs; `ALWAYS` tags always pass.
    async fn filter_batch(&self, items: &[BufferedTagValue]) -> Vec<BufferedTagValue> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let include = match item.log_mode {
                LogMode::Never => false,
                LogMode::Always => true,
                LogMode::OnChange => {
                    let cached = self.cache.get(&item.plc_code, &item.tag_address).await;
                    cached.as_deref() != Some(item.value_str.as_str())
                }
            };
            if include {
                out.push(item.clone());
            }
        }
        out
    }

    /// Updates the cache for every item in the original, pre-filter batch,
    /// but only once the whole batch has committed successfully (Open
    /// Question 1, resolved in favor of always reflecting the true last
    /// written value regardless of an individual tag's log mode).
    async fn update_cache(&self, items: &[BufferedTagValue]) {
        for item in items {
            self.cache
                .set_at(&item.plc_code, &item.tag_address, item.value_str.clone(), item.timestamp)
                .await;
        }
    }

    pub async fn get_stats(&self) -> WriterMetrics {
        let snap = self.metrics.snapshot().await;
        WriterMetrics {
            successful_writes: snap.total_successful_writes,
            failed_writes: snap.total_failed_writes,
            total_items_written: snap.total_items_written,
            avg_batch_size: snap.avg_batch_size,
            avg_write_latency_ms: snap.avg_write_latency_ms,
            buffer_utilization_pct: self.buffer.utilization().await,
            overflow_count: self.buffer.overflow_count().await,
            backup_file_count: self.csv_backup.backup_file_count().await,
            last_write_time: snap.last_write_time,
        }
    }
}

fn build_operation_rows(items: &[BufferedTagValue]) -> Vec<OperationRow> {
    items
        .iter()
        .filter(|i| i.category == Category::Operation)
        .map(|i| OperationRow {
            time_rfc3339: i.timestamp.to_rfc3339(),
            name: format!(
                "{}.Operation.{}.{}",
                i.plc_code,
                i.machine_code.as_deref().unwrap_or("UNKNOWN"),
                i.tag_address
            ),
            value: i.value_str.clone(),
        })
        .collect()
}

fn build_taglog_rows(items: &[BufferedTagValue]) -> Vec<TagLogRow> {
    items
        .iter()
        .filter(|i| i.category != Category::Operation)
        .map(|i| TagLogRow {
            otime_rfc3339: i.timestamp.to_rfc3339(),
            tag_name: format!("{}.{}", i.plc_code, i.tag_address),
            tag_type: if i.value_num.is_some() { "N" } else { "S" },
            value_str: i.value_str.clone(),
            value_num: i.value_num,
        })
        .collect()
}

/// Inserts both row sets inside a single Oracle session/transaction. Each
/// row is attempted independently so one bad row doesn't sink the rest
/// (the analogue of `batcherrors=True`); the batch only counts as a total
/// failure, triggering a retry, if every row in it failed.
async fn execute_insert(pool: &OraclePool, operation_rows: Vec<OperationRow>, taglog_rows: Vec<TagLogRow>) -> CollectorResult<()> {
    if operation_rows.is_empty() && taglog_rows.is_empty() {
        return Ok(());
    }

    pool.with_connection(move |conn| {
        let total = operation_rows.len() + taglog_rows.len();
        let mut failures = 0usize;

        let op_sql = format!(
            "INSERT INTO {OPERATION_TABLE} (TIME, NAME, VALUE) VALUES (TO_TIMESTAMP_TZ(:1, 'YYYY-MM-DD\"T\"HH24:MI:SS.FF3TZH:TZM'), :2, :3)"
        );
        for row in &operation_rows {
            let params: [&dyn oracle::ToSql; 3] = [&row.time_rfc3339, &row.name, &row.value];
            if let Err(e) = conn.execute(&op_sql, &params) {
                warn!(error = %e, name = %row.name, "operation row insert failed");
                failures += 1;
            }
        }

        let tag_sql = format!(
            "INSERT INTO {TAGLOG_TABLE} (ID, CTIME, OTIME, DATATAG_NAME, DATATAG_TYPE, VALUE_STR, VALUE_NUM, VALUE_RAW) \
             VALUES ({TAGLOG_SEQUENCE}.NEXTVAL, SYSTIMESTAMP, TO_TIMESTAMP_TZ(:1, 'YYYY-MM-DD\"T\"HH24:MI:SS.FF3TZH:TZM'), :2, :3, :4, :5, :6)"
        );
        for row in &taglog_rows {
            let params: [&dyn oracle::ToSql; 6] =
                [&row.otime_rfc3339, &row.tag_name, &row.tag_type, &row.value_str, &row.value_num, &row.value_str];
            if let Err(e) = conn.execute(&tag_sql, &params) {
                warn!(error = %e, name = %row.tag_name, "tag-log row insert failed");
                failures += 1;
            }
        }

        if failures >= total {
            return Err(oracle::Error::out_of_range(format!("all {total} rows in batch failed")));
        }

        conn.commit()?;
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::models::Quality;

    fn item(addr: &str, category: Category, log_mode: LogMode, value: &str) -> BufferedTagValue {
        BufferedTagValue {
            timestamp: chrono::Utc::now(),
            plc_code: "P1".into(),
            tag_address: addr.into(),
            value_num: value.parse::<f64>().ok(),
            value_str: value.into(),
            quality: Quality::Good,
            category,
            log_mode,
            machine_code: Some("M1".into()),
        }
    }

    #[test]
    fn operation_row_name_format() {
        let items = vec![item("D100", Category::Operation, LogMode::Always, "7")];
        let rows = build_operation_rows(&items);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "P1.Operation.M1.D100");
    }

    #[test]
    fn state_and_alarm_route_to_taglog_not_operation() {
        let items = vec![
            item("D200", Category::State, LogMode::Always, "1"),
            item("D300", Category::Alarm, LogMode::Always, "ALM"),
        ];
        assert_eq!(build_operation_rows(&items).len(), 0);
        assert_eq!(build_taglog_rows(&items).len(), 2);
    }

    #[test]
    fn taglog_type_reflects_numeric_parseability() {
        let items = vec![
            item("D400", Category::State, LogMode::Always, "3.5"),
            item("D401", Category::State, LogMode::Always, "RUN"),
        ];
        let rows = build_taglog_rows(&items);
        assert_eq!(rows[0].tag_type, "N");
        assert_eq!(rows[1].tag_type, "S");
    }

    #[tokio::test]
    async fn filter_batch_drops_never_and_unchanged_on_change_tags() {
        let buffer = Arc::new(CircularBuffer::new(10, 80.0));
        let cache = Arc::new(TagValueCache::new());
        cache.set("P1", "D100", "5".into()).await;

        let pool_cfg = BufferConfig {
            max_size: 10,
            batch_size: 5,
            batch_size_max: 10,
            write_interval_secs: 1.0,
            retry_count: 3,
            backup_file_path: std::env::temp_dir().join("scada-writer-test").to_string_lossy().into_owned(),
        };

        let csv_backup = Arc::new(CsvBackup::new(&pool_cfg.backup_file_path).await.unwrap());
        let metrics = Arc::new(RollingMetrics::new(Duration::from_secs(300)));

        // No live Oracle pool in unit tests; filter_batch doesn't touch it.
        let writer = TestHarness { buffer: buffer.clone(), cache: cache.clone(), metrics, csv_backup, batch_size: pool_cfg.batch_size };

        let items = vec![
            item("D100", Category::Operation, LogMode::OnChange, "5"), // unchanged, dropped
            item("D101", Category::Operation, LogMode::OnChange, "9"), // changed, kept
            item("D102", Category::Operation, LogMode::Never, "1"),    // never, dropped
            item("D103", Category::Operation, LogMode::Always, "1"),   // always, kept
        ];

        let filtered = writer.filter_batch(&items).await;
        let kept: Vec<&str> = filtered.iter().map(|i| i.tag_address.as_str()).collect();
        assert_eq!(kept, vec!["D101", "D103"]);

        tokio::fs::remove_dir_all(&pool_cfg.backup_file_path).await.ok();
    }

    /// Mirrors `OracleWriter::filter_batch` without requiring a live Oracle
    /// pool, since `oracle::pool::Pool` can't be constructed without a real
    /// database in a unit test.
    struct TestHarness {
        buffer: Arc<CircularBuffer>,
        cache: Arc<TagValueCache>,
        metrics: Arc<RollingMetrics>,
        csv_backup: Arc<CsvBackup>,
        batch_size: usize,
    }

    impl TestHarness {
        async fn filter_batch(&self, items: &[BufferedTagValue]) -> Vec<BufferedTagValue> {
            let _ = (&self.buffer, &self.metrics, &self.csv_backup, self.batch_size);
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let include = match item.log_mode {
                    LogMode::Never => false,
                    LogMode::Always => true,
                    LogMode::OnChange => {
                        let cached = self.cache.get(&item.plc_code, &item.tag_address).await;
                        cached.as_deref() != Some(item.value_str.as_str())
                    }
                };
                if include {
                    out.push(item.clone());
                }
            }
            out
        }
    }
}
