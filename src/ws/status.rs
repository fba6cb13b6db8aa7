//! Periodic equipment-status snapshot broadcaster (SPEC_FULL.md §4.8).
//!
//! Grounded on
//! `examples/original_source/backend/src/api/websocket_monitor.py`
//! (`websocket_monitor_endpoint`, `get_equipment_status`). The original
//! hard-codes a `get_mock_equipment_status()` fallback directly in the
//! handler; per the design note in SPEC_FULL.md §4.8 that derivation is
//! replaced with an injected `StatusDeriver`, so the real implementation
//! can be supplied once the polling engine exposes per-equipment state
//! without this module knowing anything about PLCs or tags.

use async_trait::async_trait;
use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EquipmentState {
    Running,
    Idle,
    Stopped,
    Error,
    Disconnected,
}

#[derive(Debug, Clone, Serialize)]
pub struct EquipmentStatus {
    pub equipment_code: String,
    pub equipment_name: String,
    pub status: EquipmentState,
    pub last_updated: DateTime<Utc>,
}

/// Supplies the current per-equipment status snapshot. Implemented by
/// whatever owns the polling engine/config store; this module has no
/// opinion on what "equipment" maps to.
#[async_trait]
pub trait StatusDeriver: Send + Sync {
    async fn derive(&self) -> Vec<EquipmentStatus>;
}

#[derive(serde::Serialize)]
struct EquipmentStatusMessage {
    #[serde(rename = "type")]
    kind: &'static str,
    timestamp: DateTime<Utc>,
    equipment: Vec<EquipmentStatus>,
}

#[derive(Default)]
struct Clients {
    next_id: u64,
    handles: HashMap<u64, mpsc::UnboundedSender<Message>>,
}

pub struct EquipmentStatusBroadcaster {
    deriver: Box<dyn StatusDeriver>,
    interval: Duration,
    clients: Mutex<Clients>,
    snapshots_sent: AtomicU64,
}

impl EquipmentStatusBroadcaster {
    pub fn new(deriver: Box<dyn StatusDeriver>, interval: Duration) -> Self {
        info!(interval_secs = interval.as_secs_f64(), "equipment status broadcaster initialized");
        Self {
            deriver,
            interval,
            clients: Mutex::new(Clients::default()),
            snapshots_sent: AtomicU64::new(0),
        }
    }

    pub async fn register(&self) -> (u64, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut clients = self.clients.lock().await;
        clients.next_id += 1;
        let id = clients.next_id;
        clients.handles.insert(id, tx);
        let count = clients.handles.len();
        crate::metrics::WS_CLIENTS_CONNECTED.with_label_values(&["status"]).set(count as f64);
        info!(client_id = id, "status client connected");
        (id, rx)
    }

    pub async fn unregister(&self, id: u64) {
        let mut clients = self.clients.lock().await;
        if clients.handles.remove(&id).is_some() {
            let count = clients.handles.len();
            crate::metrics::WS_CLIENTS_CONNECTED.with_label_values(&["status"]).set(count as f64);
            info!(client_id = id, remaining = count, "status client disconnected");
        }
    }

    pub async fn client_count(&self) -> usize {
        self.clients.lock().await.handles.len()
    }

    async fn broadcast_once(&self) {
        let clients = self.clients.lock().await;
        if clients.handles.is_empty() {
            return;
        }
        drop(clients);

        let equipment = self.deriver.derive().await;
        let message = EquipmentStatusMessage {
            kind: "equipment_status",
            timestamp: Utc::now(),
            equipment,
        };
        let json = match serde_json::to_string(&message) {
            Ok(j) => j,
            Err(e) => {
                warn!(error = %e, "failed to serialize equipment status snapshot");
                return;
            }
        };

        let clients = self.clients.lock().await;
        let mut dead = Vec::new();
        for (&id, tx) in clients.handles.iter() {
            if tx.send(Message::Text(json.clone().into())).is_err() {
                dead.push(id);
            }
        }
        let count = clients.handles.len();
        drop(clients);

        if !dead.is_empty() {
            let mut clients = self.clients.lock().await;
            for id in &dead {
                clients.handles.remove(id);
            }
        }

        self.snapshots_sent.fetch_add(1, Ordering::Relaxed);
        debug!(clients = count, "broadcast equipment status snapshot");
    }

    /// Ticks on `interval` (typically 1s) until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("equipment status broadcaster started");
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.broadcast_once().await,
            }
        }
        info!("equipment status broadcaster stopped");
    }

    pub fn snapshots_sent(&self) -> u64 {
        self.snapshots_sent.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDeriver(Vec<EquipmentStatus>);

    #[async_trait]
    impl StatusDeriver for FixedDeriver {
        async fn derive(&self) -> Vec<EquipmentStatus> {
            self.0.clone()
        }
    }

    fn status(code: &str) -> EquipmentStatus {
        EquipmentStatus {
            equipment_code: code.into(),
            equipment_name: code.into(),
            status: EquipmentState::Running,
            last_updated: Utc::now(),
        }
    }

    #[tokio::test]
    async fn broadcast_once_reaches_registered_client() {
        let deriver = Box::new(FixedDeriver(vec![status("E1")]));
        let broadcaster = EquipmentStatusBroadcaster::new(deriver, Duration::from_millis(10));
        let (_id, mut rx) = broadcaster.register().await;

        broadcaster.broadcast_once().await;

        let msg = rx.recv().await.unwrap();
        match msg {
            Message::Text(text) => assert!(text.contains("E1")),
            _ => panic!("expected text"),
        }
        assert_eq!(broadcaster.snapshots_sent(), 1);
    }

    #[tokio::test]
    async fn no_clients_skips_derivation_and_send() {
        let deriver = Box::new(FixedDeriver(vec![status("E1")]));
        let broadcaster = EquipmentStatusBroadcaster::new(deriver, Duration::from_millis(10));
        broadcaster.broadcast_once().await;
        assert_eq!(broadcaster.snapshots_sent(), 0);
    }
}
