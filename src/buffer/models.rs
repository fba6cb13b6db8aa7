//! Buffer item and write-batch types (SPEC_FULL.md §4.5).
//!
//! Grounded on `examples/original_source/backend/src/buffer/models.py`
//! (`BufferedTagValue`, `WriteBatch`).

use serde::Serialize;

use crate::polling::models::{Category, LogMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Quality {
    Good,
    Bad,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Good => "GOOD",
            Quality::Bad => "BAD",
        }
    }
}

/// A single tag reading expanded out of a `PollingSample` for buffering and
/// eventual Oracle persistence. Values are stored as their numeric form
/// (§9 VALUE_NUM coercion); text tags carry `None` here and are written via
/// their separate VALUE_STR-equivalent column by the writer.
///
/// Carries `category`/`log_mode`/`machine_code` alongside the raw value so
/// the Oracle writer can route and filter without a second lookup back
/// through the polling group/tag configuration (SPEC_FULL.md §4.7).
#[derive(Debug, Clone, Serialize)]
pub struct BufferedTagValue {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub plc_code: String,
    pub tag_address: String,
    pub value_num: Option<f64>,
    pub value_str: String,
    pub quality: Quality,
    pub category: Category,
    pub log_mode: LogMode,
    pub machine_code: Option<String>,
}

#[derive(Debug, Default)]
pub struct WriteBatch {
    pub items: Vec<BufferedTagValue>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, item: BufferedTagValue) {
        if self.created_at.is_none() {
            self.created_at = Some(chrono::Utc::now());
        }
        self.items.push(item);
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.created_at = None;
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// Rolling writer metrics surfaced on the status/metrics endpoints.
/// Grounded on `WriterMetrics` in the same file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WriterMetrics {
    pub successful_writes: u64,
    pub failed_writes: u64,
    pub total_items_written: u64,
    pub avg_batch_size: f64,
    pub avg_write_latency_ms: f64,
    pub buffer_utilization_pct: f64,
    pub overflow_count: u64,
    pub backup_file_count: u64,
    pub last_write_time: Option<chrono::DateTime<chrono::Utc>>,
}

impl WriterMetrics {
    pub fn success_rate(&self) -> f64 {
        let total = self.successful_writes + self.failed_writes;
        if total == 0 {
            return 100.0;
        }
        (self.successful_writes as f64 / total as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_batch_tracks_created_at_on_first_add() {
        let mut batch = WriteBatch::new();
        assert!(batch.created_at.is_none());
        batch.add(BufferedTagValue {
            timestamp: chrono::Utc::now(),
            plc_code: "P1".into(),
            tag_address: "D100".into(),
            value_num: Some(1.0),
            value_str: "1".into(),
            quality: Quality::Good,
            category: Category::Operation,
            log_mode: LogMode::Always,
            machine_code: None,
        });
        assert!(batch.created_at.is_some());
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn success_rate_is_100_when_no_writes_yet() {
        let metrics = WriterMetrics::default();
        assert_eq!(metrics.success_rate(), 100.0);
    }

    #[test]
    fn success_rate_reflects_failures() {
        let metrics = WriterMetrics {
            successful_writes: 3,
            failed_writes: 1,
            ..Default::default()
        };
        assert_eq!(metrics.success_rate(), 75.0);
    }
}
