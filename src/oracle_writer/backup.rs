//! CSV failover writer for Oracle batches that exhaust all retries
//! (SPEC_FULL.md §4.7).
//!
//! Grounded on `examples/original_source/backend/src/oracle_writer/backup.py`
//! (`CSVBackup`). No CSV crate is present anywhere in the retrieved example
//! pack, so this writes the (simple, four-column, no embedded commas or
//! quotes expected) format by hand rather than fabricate a dependency.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use crate::buffer::models::BufferedTagValue;

const HEADER: &str = "timestamp,plcCode,tagAddress,value,quality\n";

pub struct CsvBackup {
    backup_dir: std::path::PathBuf,
    total_backups: AtomicU64,
    total_items_backed_up: AtomicU64,
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

impl CsvBackup {
    pub async fn new(backup_dir: impl Into<std::path::PathBuf>) -> std::io::Result<Self> {
        let backup_dir = backup_dir.into();
        tokio::fs::create_dir_all(&backup_dir).await?;
        info!(dir = %backup_dir.display(), "backup directory ready");
        Ok(Self {
            backup_dir,
            total_backups: AtomicU64::new(0),
            total_items_backed_up: AtomicU64::new(0),
        })
    }

    /// Writes a failed batch to `backup_YYYYMMDD_HHMMSS_<count>.csv`.
    /// Returns the written file's path.
    pub async fn save_failed_batch(&self, items: &[BufferedTagValue]) -> std::io::Result<Option<std::path::PathBuf>> {
        if items.is_empty() {
            warn!("no items to backup");
            return Ok(None);
        }

        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let filename = format!("backup_{timestamp}_{}.csv", items.len());
        let path = self.backup_dir.join(filename);

        let mut body = String::with_capacity(HEADER.len() + items.len() * 48);
        body.push_str(HEADER);
        for item in items {
            body.push_str(&format!(
                "{},{},{},{},{}\n",
                item.timestamp.to_rfc3339(),
                csv_escape(&item.plc_code),
                csv_escape(&item.tag_address),
                csv_escape(&item.value_str),
                item.quality.as_str(),
            ));
        }

        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(body.as_bytes()).await?;

        self.total_backups.fetch_add(1, Ordering::Relaxed);
        self.total_items_backed_up.fetch_add(items.len() as u64, Ordering::Relaxed);
        warn!(path = %path.display(), items = items.len(), "failed batch backed up to CSV");

        Ok(Some(path))
    }

    pub async fn backup_file_count(&self) -> u64 {
        self.list_backup_files().await.len() as u64
    }

    async fn list_backup_files(&self) -> Vec<std::path::PathBuf> {
        let mut files = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.backup_dir).await {
            Ok(e) => e,
            Err(_) => return files,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("backup_") && name.ends_with(".csv") {
                files.push(entry.path());
            }
        }
        files
    }

    /// Deletes backup files older than `max_age_days`, then trims down to
    /// `max_count` newest files if still over budget.
    pub async fn cleanup_old_backups(&self, max_age_days: i64, max_count: usize) -> usize {
        let mut files = self.list_backup_files().await;
        if files.is_empty() {
            return 0;
        }

        let mut with_mtime: Vec<(std::path::PathBuf, std::time::SystemTime)> = Vec::new();
        for f in files.drain(..) {
            if let Ok(meta) = tokio::fs::metadata(&f).await {
                if let Ok(mtime) = meta.modified() {
                    with_mtime.push((f, mtime));
                }
            }
        }
        with_mtime.sort_by(|a, b| b.1.cmp(&a.1));

        let cutoff = std::time::SystemTime::now() - std::time::Duration::from_secs(max_age_days.max(0) as u64 * 86400);
        let mut deleted = 0;

        let mut kept = Vec::new();
        for (path, mtime) in with_mtime {
            if mtime < cutoff {
                if tokio::fs::remove_file(&path).await.is_ok() {
                    deleted += 1;
                } else {
                    error!(path = %path.display(), "failed to delete old backup file");
                }
            } else {
                kept.push(path);
            }
        }

        if kept.len() > max_count {
            for path in kept.split_off(max_count) {
                if tokio::fs::remove_file(&path).await.is_ok() {
                    deleted += 1;
                } else {
                    error!(path = %path.display(), "failed to delete excess backup file");
                }
            }
        }

        if deleted > 0 {
            info!(deleted, "backup cleanup complete");
        }
        deleted
    }

    pub fn total_backups(&self) -> u64 {
        self.total_backups.load(Ordering::Relaxed)
    }

    pub fn total_items_backed_up(&self) -> u64 {
        self.total_items_backed_up.load(Ordering::Relaxed)
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

    fn temp_dir() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("scada-backup-test-{}-{}", std::process::id(), rand_suffix()))
    }

    fn rand_suffix() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .subsec_nanos() as u64
    }

    #[tokio::test]
    async fn writes_header_and_rows() {
        let dir = temp_dir();
        let backup = CsvBackup::new(&dir).await.unwrap();
        let path = backup.save_failed_batch(&[item("D100"), item("D101")]).await.unwrap().unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.starts_with(HEADER));
        assert_eq!(contents.lines().count(), 3);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn empty_batch_writes_nothing() {
        let dir = temp_dir();
        let backup = CsvBackup::new(&dir).await.unwrap();
        let result = backup.save_failed_batch(&[]).await.unwrap();
        assert!(result.is_none());
        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn backup_file_count_tracks_written_files() {
        let dir = temp_dir();
        let backup = CsvBackup::new(&dir).await.unwrap();
        backup.save_failed_batch(&[item("D100")]).await.unwrap();
        backup.save_failed_batch(&[item("D101")]).await.unwrap();
        assert_eq!(backup.backup_file_count().await, 2);
        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
