//! Per-failure JSON log files (SPEC_FULL.md §4.3, ambient addition).
//!
//! Grounded on
//! `examples/original_source/backend/src/polling/polling_logger.py`
//! (`PollingFailureLogger`). One JSON file per poll failure under
//! `logs/polling_failures/YYYYMMDD/<plc_code>_failure_<HHMMSS_fff>.log`,
//! supplementing the structured `tracing` logs with a durable record a
//! later audit can grep through PLC-by-PLC.
//!
//! `cleanup_old_logs` is carried over from the original as a supplemented
//! feature (SPEC_FULL.md's use of original_source/ to recover dropped
//! housekeeping behavior).

use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Debug, Serialize)]
pub struct FailureEntry<'a> {
    pub plc_code: &'a str,
    pub group_name: &'a str,
    pub failure_kind: &'a str,
    pub message: &'a str,
    pub timestamp: chrono::DateTime<Utc>,
}

pub struct PollingFailureLogger {
    root: PathBuf,
}

impl PollingFailureLogger {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn write_entry(&self, entry: &FailureEntry<'_>) {
        let day_dir = self.root.join(entry.timestamp.format("%Y%m%d").to_string());
        if let Err(e) = tokio::fs::create_dir_all(&day_dir).await {
            error!(error = %e, "failed to create failure log directory");
            return;
        }

        let file_name = format!(
            "{}_failure_{}.log",
            entry.plc_code,
            entry.timestamp.format("%H%M%S_%3f")
        );
        let path = day_dir.join(file_name);

        match serde_json::to_vec_pretty(entry) {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(&path, bytes).await {
                    error!(error = %e, path = %path.display(), "failed to write failure log");
                }
            }
            Err(e) => error!(error = %e, "failed to serialize failure entry"),
        }
    }

    pub async fn log_connection_failure(&self, plc_code: &str, group_name: &str, message: &str) {
        self.write_entry(&FailureEntry {
            plc_code,
            group_name,
            failure_kind: "connection",
            message,
            timestamp: Utc::now(),
        })
        .await;
    }

    pub async fn log_timeout_failure(&self, plc_code: &str, group_name: &str, message: &str) {
        self.write_entry(&FailureEntry {
            plc_code,
            group_name,
            failure_kind: "timeout",
            message,
            timestamp: Utc::now(),
        })
        .await;
    }

    pub async fn log_read_failure(&self, plc_code: &str, group_name: &str, message: &str) {
        self.write_entry(&FailureEntry {
            plc_code,
            group_name,
            failure_kind: "read",
            message,
            timestamp: Utc::now(),
        })
        .await;
    }

    /// Deletes per-day log directories older than `days_to_keep`.
    pub async fn cleanup_old_logs(&self, days_to_keep: i64) -> usize {
        let cutoff = Utc::now() - chrono::Duration::days(days_to_keep);
        let mut removed = 0;

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(e) => e,
            Err(_) => return 0,
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Ok(day) = chrono::NaiveDate::parse_from_str(&name, "%Y%m%d") else {
                continue;
            };
            if day.and_hms_opt(0, 0, 0).unwrap().and_utc() < cutoff {
                if tokio::fs::remove_dir_all(entry.path()).await.is_ok() {
                    removed += 1;
                } else {
                    warn!(dir = %name, "failed to remove old failure log directory");
                }
            }
        }

        if removed > 0 {
            info!(removed, "old failure log directories cleaned up");
        }
        removed
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("scada-failure-log-test-{}", std::process::id()))
    }

    #[tokio::test]
    async fn writes_one_json_file_per_failure() {
        let root = temp_root();
        let logger = PollingFailureLogger::new(&root);
        logger.log_connection_failure("P1", "g1", "refused").await;

        let today = Utc::now().format("%Y%m%d").to_string();
        let day_dir = root.join(today);
        let mut entries = tokio::fs::read_dir(&day_dir).await.unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 1);

        tokio::fs::remove_dir_all(&root).await.ok();
    }
}
