//! `/healthz` status surface (SPEC_FULL.md §2 ambient addition): per-group,
//! per-pool and writer status as JSON.
//!
//! The handler itself only knows how to render a [`HealthSnapshot`]; the
//! snapshot is produced by whatever owns the polling engine, PLC pools and
//! Oracle writer (wired together in `main.rs`), kept behind the
//! [`HealthProvider`] trait object so this module stays generic over the
//! `PlcTransport` implementation the rest of the crate is parameterized on.

use async_trait::async_trait;
use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::api::AppState;
use crate::plc::pool::PoolStats;
use crate::polling::models::PollingStatus;

#[derive(Debug, Clone, Serialize)]
pub struct BufferHealth {
    pub size: usize,
    pub max_size: usize,
    pub utilization_pct: f64,
    pub overflow_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub groups_total: usize,
    pub groups_running: usize,
    pub group_statuses: Vec<PollingStatus>,
    pub plc_pools: Vec<PoolStats>,
    pub oracle_writer_running: bool,
    pub buffer: BufferHealth,
    pub monitor_clients: usize,
}

#[async_trait]
pub trait HealthProvider: Send + Sync {
    async fn snapshot(&self) -> HealthSnapshot;
}

pub async fn healthz_handler(State(state): State<AppState>) -> Json<HealthSnapshot> {
    let mut snapshot = state.health.snapshot().await;
    snapshot.monitor_clients = state.monitor_broadcaster.client_count().await;
    Json(snapshot)
}

pub type SharedHealthProvider = Arc<dyn HealthProvider>;
