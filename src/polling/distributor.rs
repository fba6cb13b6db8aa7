//! Fan-out distributor: one `DataQueue` consumer feeding N bounded output
//! queues (SPEC_FULL.md §4.4).
//!
//! Grounded on
//! `examples/original_source/backend/src/polling/data_distributor.py`
//! (`DataDistributor`). Each output is isolated: a full output queue drops
//! that sample and increments that output's counter without blocking or
//! affecting the others.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::polling::models::PollingSample;
use crate::polling::queue::DataQueue;

struct Output {
    name: String,
    tx: mpsc::Sender<PollingSample>,
    dropped: AtomicU64,
}

pub struct DataDistributor {
    outputs: Vec<Output>,
}

impl DataDistributor {
    pub fn new() -> Self {
        Self { outputs: Vec::new() }
    }

    /// Registers a bounded output queue and returns the receiving half.
    pub fn add_output(&mut self, name: impl Into<String>, capacity: usize) -> mpsc::Receiver<PollingSample> {
        let (tx, rx) = mpsc::channel(capacity);
        self.outputs.push(Output {
            name: name.into(),
            tx,
            dropped: AtomicU64::new(0),
        });
        rx
    }

    fn distribute(&self, sample: &PollingSample) {
        for output in &self.outputs {
            match output.tx.try_send(sample.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    output.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(output = %output.name, "output queue full, sample dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!(output = %output.name, "output queue closed");
                }
            }
        }
    }

    pub fn stats(&self) -> HashMap<String, u64> {
        self.outputs
            .iter()
            .map(|o| (o.name.clone(), o.dropped.load(Ordering::Relaxed)))
            .collect()
    }

    /// Runs the distribution loop until cancelled, consuming from `source`
    /// and fanning each sample out to every registered output.
    pub async fn run(self: Arc<Self>, source: Arc<DataQueue>, cancel: CancellationToken) {
        info!(outputs = self.outputs.len(), "distributor started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                sample = source.get() => {
                    match sample {
                        Some(sample) => self.distribute(&sample),
                        None => break,
                    }
                }
            }
        }
        info!("distributor stopped");
    }
}

impl Default for DataDistributor {
    fn default() -> Self {
        Self::new()
    }
}
