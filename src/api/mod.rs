//! HTTP/WebSocket surface (SPEC_FULL.md §2 ambient addition): `/metrics`,
//! `/healthz`, and the two WebSocket monitor endpoints. No REST CRUD
//! config surface is exposed here (out of scope per SPEC_FULL.md §1).

pub mod health;
pub mod ws_routes;

use axum::{routing::get, Router};
use std::sync::Arc;

pub use health::HealthProvider;

use crate::metrics::metrics_handler;
use crate::ws::{EquipmentStatusBroadcaster, MonitorBroadcaster};

#[derive(Clone)]
pub struct AppState {
    pub health: Arc<dyn HealthProvider>,
    pub monitor_broadcaster: Arc<MonitorBroadcaster>,
    pub status_broadcaster: Arc<EquipmentStatusBroadcaster>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(health::healthz_handler))
        .route("/ws/monitor", get(ws_routes::monitor_ws_handler))
        .route("/ws/status", get(ws_routes::status_ws_handler))
        .with_state(state)
}
