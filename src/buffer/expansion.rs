//! Sample-expansion consumer: polling samples in, buffered per-tag values
//! out (SPEC_FULL.md §4.5).
//!
//! Grounded on
//! `examples/original_source/backend/src/buffer/buffer_consumer.py`
//! (`BufferConsumer`). Takes `PollingSample`s off the distributor's buffer
//! output and expands each `tag_values` map into individual
//! `BufferedTagValue` items, tagging quality BAD for any tag that also
//! appears in `error_tags`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::buffer::circular::CircularBuffer;
use crate::buffer::models::{BufferedTagValue, Quality};
use crate::polling::models::PollingSample;

pub struct BufferConsumerStats {
    pub total_consumed: AtomicU64,
    pub total_items_produced: AtomicU64,
    pub error_count: AtomicU64,
}

impl Default for BufferConsumerStats {
    fn default() -> Self {
        Self {
            total_consumed: AtomicU64::new(0),
            total_items_produced: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        }
    }
}

pub struct BufferConsumer {
    buffer: Arc<CircularBuffer>,
    stats: BufferConsumerStats,
}

impl BufferConsumer {
    pub fn new(buffer: Arc<CircularBuffer>) -> Self {
        Self {
            buffer,
            stats: BufferConsumerStats::default(),
        }
    }

    async fn process_sample(&self, sample: PollingSample) {
        let mut items_produced = 0;

        for (tag_address, tag_value) in &sample.tag_values {
            let quality = if sample.error_tags.contains(tag_address) {
                Quality::Bad
            } else {
                Quality::Good
            };

            let log_mode = sample
                .tag_log_modes
                .get(tag_address)
                .copied()
                .unwrap_or(crate::polling::models::LogMode::Always);
            let machine_code = sample.tag_machine_codes.get(tag_address).cloned().flatten();

            let item = BufferedTagValue {
                timestamp: sample.timestamp,
                plc_code: sample.plc_code.clone(),
                tag_address: tag_address.clone(),
                value_num: tag_value.as_value_num(),
                value_str: tag_value.stringify(),
                quality,
                category: sample.category,
                log_mode,
                machine_code,
            };

            let ok = self.buffer.put(item).await;
            if !ok {
                warn!(plc_code = %sample.plc_code, tag_address = %tag_address, "circular buffer overflow");
            }
            items_produced += 1;
        }

        self.stats.total_consumed.fetch_add(1, Ordering::Relaxed);
        self.stats.total_items_produced.fetch_add(items_produced, Ordering::Relaxed);
        debug!(group = %sample.group_name, tags = sample.tag_values.len(), errors = sample.error_tags.len(), "expanded polling sample into buffer");
    }

    /// Runs until `rx` closes, expanding every incoming sample. On close,
    /// drains any samples still buffered in the channel before returning
    /// (the async analog of `_flush_remaining_data`: the channel itself
    /// holds the backlog, so draining it is just consuming to exhaustion).
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<PollingSample>) {
        info!("buffer consumer started");
        while let Some(sample) = rx.recv().await {
            self.process_sample(sample).await;
        }
        info!(
            total_consumed = self.stats.total_consumed.load(Ordering::Relaxed),
            total_items_produced = self.stats.total_items_produced.load(Ordering::Relaxed),
            "buffer consumer stopped"
        );
    }

    pub fn total_consumed(&self) -> u64 {
        self.stats.total_consumed.load(Ordering::Relaxed)
    }

    pub fn total_items_produced(&self) -> u64 {
        self.stats.total_items_produced.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plc::value::TagValue;
    use std::collections::HashMap;

    fn sample() -> PollingSample {
        let mut tag_values = HashMap::new();
        tag_values.insert("D100".to_string(), TagValue::Integer(7));
        tag_values.insert("D101".to_string(), TagValue::Integer(8));

        PollingSample {
            timestamp: chrono::Utc::now(),
            group_id: 1,
            group_name: "g1".into(),
            plc_code: "P1".into(),
            mode: crate::polling::models::PollingMode::Fixed,
            category: crate::polling::models::Category::Operation,
            tag_values,
            poll_time_ms: 5,
            error_tags: vec!["D101".to_string()],
            tag_log_modes: HashMap::new(),
            tag_machine_codes: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn expands_sample_into_buffered_items_with_quality() {
        let buffer = Arc::new(CircularBuffer::new(10, 80.0));
        let consumer = BufferConsumer::new(buffer.clone());
        consumer.process_sample(sample()).await;

        assert_eq!(buffer.size().await, 2);
        assert_eq!(consumer.total_consumed(), 1);
        assert_eq!(consumer.total_items_produced(), 2);

        let items = buffer.get(2).await.unwrap();
        let d101 = items.iter().find(|i| i.tag_address == "D101").unwrap();
        assert_eq!(d101.quality, Quality::Bad);
        let d100 = items.iter().find(|i| i.tag_address == "D100").unwrap();
        assert_eq!(d100.quality, Quality::Good);
    }
}
