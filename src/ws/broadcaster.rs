//! WebSocket fan-out publisher for monitor clients (SPEC_FULL.md §4.8).
//!
//! Grounded on
//! `examples/original_source/backend/src/polling/monitor_broadcaster.py`
//! (`MonitorBroadcaster`). The Python version threads a dedicated asyncio
//! event loop so a background thread can call `send_text`; here the
//! broadcaster already runs as a tokio task, so each client's outbound
//! side is just an `mpsc::UnboundedSender<Message>` that the connection's
//! own task (in `api::ws_routes`) drains straight into the socket.

use axum::extract::ws::Message;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::polling::models::PollingSample;

#[derive(serde::Serialize)]
struct PollingDataMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    timestamp: String,
    group_id: u32,
    group_name: &'a str,
    plc_code: &'a str,
    mode: crate::polling::models::PollingMode,
    poll_time_ms: u64,
    tag_values: HashMap<&'a str, String>,
    error_tags: &'a [String],
}

fn build_message(sample: &PollingSample) -> PollingDataMessage<'_> {
    PollingDataMessage {
        kind: "polling_data",
        timestamp: sample.timestamp.to_rfc3339(),
        group_id: sample.group_id,
        group_name: &sample.group_name,
        plc_code: &sample.plc_code,
        mode: sample.mode,
        poll_time_ms: sample.poll_time_ms,
        tag_values: sample.tag_values.iter().map(|(k, v)| (k.as_str(), v.stringify())).collect(),
        error_tags: &sample.error_tags,
    }
}

#[derive(Default)]
struct Clients {
    next_id: u64,
    handles: HashMap<u64, mpsc::UnboundedSender<Message>>,
}

pub struct MonitorBroadcaster {
    clients: Mutex<Clients>,
    messages_broadcast: AtomicU64,
    clients_connected_total: AtomicU64,
}

impl MonitorBroadcaster {
    pub fn new() -> Self {
        info!("monitor broadcaster initialized");
        Self {
            clients: Mutex::new(Clients::default()),
            messages_broadcast: AtomicU64::new(0),
            clients_connected_total: AtomicU64::new(0),
        }
    }

    /// Registers a new client connection, returning an id (for
    /// `unregister`) and the receiving half the connection handler drains
    /// into the actual socket.
    pub async fn register(&self) -> (u64, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut clients = self.clients.lock().await;
        clients.next_id += 1;
        let id = clients.next_id;
        clients.handles.insert(id, tx);
        let count = clients.handles.len();
        drop(clients);
        self.clients_connected_total.fetch_add(1, Ordering::Relaxed);
        crate::metrics::WS_CLIENTS_CONNECTED.with_label_values(&["monitor"]).set(count as f64);
        info!(client_id = id, "monitor client connected");
        (id, rx)
    }

    pub async fn unregister(&self, id: u64) {
        let mut clients = self.clients.lock().await;
        if clients.handles.remove(&id).is_some() {
            let count = clients.handles.len();
            crate::metrics::WS_CLIENTS_CONNECTED.with_label_values(&["monitor"]).set(count as f64);
            info!(client_id = id, remaining = count, "monitor client disconnected");
        }
    }

    pub async fn client_count(&self) -> usize {
        self.clients.lock().await.handles.len()
    }

    async fn broadcast(&self, sample: &PollingSample) {
        let clients = self.clients.lock().await;
        if clients.handles.is_empty() {
            return;
        }

        let message = build_message(sample);
        let json = match serde_json::to_string(&message) {
            Ok(j) => j,
            Err(e) => {
                warn!(error = %e, "failed to serialize polling sample for broadcast");
                return;
            }
        };

        let mut dead = Vec::new();
        for (&id, tx) in clients.handles.iter() {
            if tx.send(Message::Text(json.clone().into())).is_err() {
                dead.push(id);
            }
        }
        let client_count = clients.handles.len();
        drop(clients);

        if !dead.is_empty() {
            let mut clients = self.clients.lock().await;
            for id in &dead {
                clients.handles.remove(id);
            }
            info!(count = dead.len(), "removed disconnected monitor clients");
        }

        self.messages_broadcast.fetch_add(1, Ordering::Relaxed);
        debug!(group = %sample.group_name, clients = client_count, tags = sample.tag_values.len(), "broadcast polling sample");
    }

    /// Runs until `rx` closes or `cancel` fires, broadcasting every sample
    /// it receives to all currently registered clients.
    pub async fn run(&self, mut rx: mpsc::Receiver<PollingSample>, cancel: CancellationToken) {
        info!("monitor broadcaster started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                sample = rx.recv() => match sample {
                    Some(sample) => self.broadcast(&sample).await,
                    None => break,
                }
            }
        }
        info!("monitor broadcaster stopped");
    }

    pub fn messages_broadcast(&self) -> u64 {
        self.messages_broadcast.load(Ordering::Relaxed)
    }

    pub fn clients_connected_total(&self) -> u64 {
        self.clients_connected_total.load(Ordering::Relaxed)
    }
}

impl Default for MonitorBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plc::value::TagValue;
    use crate::polling::models::{Category, PollingMode};

    fn sample() -> PollingSample {
        let mut tag_values = HashMap::new();
        tag_values.insert("D100".to_string(), TagValue::Integer(42));
        PollingSample {
            timestamp: chrono::Utc::now(),
            group_id: 1,
            group_name: "g1".into(),
            plc_code: "P1".into(),
            mode: PollingMode::Fixed,
            category: Category::Operation,
            tag_values,
            poll_time_ms: 3,
            error_tags: vec![],
            tag_log_modes: HashMap::new(),
            tag_machine_codes: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn broadcasts_to_registered_client() {
        let broadcaster = MonitorBroadcaster::new();
        let (_id, mut rx) = broadcaster.register().await;
        broadcaster.broadcast(&sample()).await;

        let msg = rx.recv().await.unwrap();
        match msg {
            Message::Text(text) => assert!(text.contains("\"group_name\":\"g1\"")),
            _ => panic!("expected text message"),
        }
        assert_eq!(broadcaster.messages_broadcast(), 1);
    }

    #[tokio::test]
    async fn no_clients_is_a_noop() {
        let broadcaster = MonitorBroadcaster::new();
        broadcaster.broadcast(&sample()).await;
        assert_eq!(broadcaster.messages_broadcast(), 0);
    }

    #[tokio::test]
    async fn unregister_removes_client() {
        let broadcaster = MonitorBroadcaster::new();
        let (id, _rx) = broadcaster.register().await;
        assert_eq!(broadcaster.client_count().await, 1);
        broadcaster.unregister(id).await;
        assert_eq!(broadcaster.client_count().await, 0);
    }

    #[tokio::test]
    async fn dropped_receiver_is_pruned_on_next_broadcast() {
        let broadcaster = MonitorBroadcaster::new();
        let (_id, rx) = broadcaster.register().await;
        drop(rx);
        broadcaster.broadcast(&sample()).await;
        assert_eq!(broadcaster.client_count().await, 0);
    }
}
