//! Wires the generic core (`PollingEngine<T>`/`PoolManager<T>`) to the
//! non-generic `api`/`ws` layer.
//!
//! `PollingEngine`/`PoolManager` carry a `PlcTransport` type parameter so
//! tests can swap in `MockTransport`, but the axum router built in
//! `api::build_router` must not be generic over it. These two adapters are
//! the erasure boundary: each is monomorphized once, in `main.rs`, over the
//! concrete `TcpTransport`, and handed to `api`/`ws` as a trait object.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::api::health::{BufferHealth, HealthProvider, HealthSnapshot};
use crate::buffer::CircularBuffer;
use crate::oracle_writer::OracleWriter;
use crate::plc::pool_manager::PoolManager;
use crate::plc::transport::PlcTransport;
use crate::polling::engine::PollingEngine;
use crate::polling::models::ThreadState;
use crate::ws::status::{EquipmentState, EquipmentStatus, StatusDeriver};

/// Read-only view over the engine/pool manager/writer/buffer, shared
/// between the healthz handler and the equipment-status broadcaster.
pub struct EngineHealthProvider<T: PlcTransport + 'static> {
    engine: Arc<RwLock<PollingEngine<T>>>,
    pool_manager: Arc<PoolManager<T>>,
    oracle_writer: Arc<OracleWriter>,
    buffer: Arc<CircularBuffer>,
}

impl<T: PlcTransport + 'static> EngineHealthProvider<T> {
    pub fn new(
        engine: Arc<RwLock<PollingEngine<T>>>,
        pool_manager: Arc<PoolManager<T>>,
        oracle_writer: Arc<OracleWriter>,
        buffer: Arc<CircularBuffer>,
    ) -> Self {
        Self {
            engine,
            pool_manager,
            oracle_writer,
            buffer,
        }
    }
}

#[async_trait]
impl<T: PlcTransport + 'static> HealthProvider for EngineHealthProvider<T> {
    async fn snapshot(&self) -> HealthSnapshot {
        let (groups_total, groups_running, group_statuses) = {
            let engine = self.engine.read().await;
            (engine.group_count(), engine.running_count(), engine.status_all())
        };

        let plc_pools = self.pool_manager.all_pool_stats().await.into_values().collect();

        let oracle_writer_running = self.oracle_writer.is_running();

        let buffer = BufferHealth {
            size: self.buffer.size().await,
            max_size: self.buffer.max_size(),
            utilization_pct: self.buffer.utilization().await,
            overflow_count: self.buffer.overflow_count().await,
        };

        let status = if groups_total > 0 && groups_running == 0 {
            "degraded"
        } else if !oracle_writer_running {
            "degraded"
        } else {
            "ok"
        };

        HealthSnapshot {
            status,
            groups_total,
            groups_running,
            group_statuses,
            plc_pools,
            oracle_writer_running,
            buffer,
            monitor_clients: 0,
        }
    }
}

/// Derives one [`EquipmentStatus`] per polling group, using `plc_code` as
/// the equipment identifier. The original Python handler hard-codes a mock
/// status fallback here instead (SPEC_FULL.md §4.8's design note calls for
/// the injected-deriver replacement this type provides).
pub struct EngineStatusDeriver<T: PlcTransport + 'static> {
    engine: Arc<RwLock<PollingEngine<T>>>,
}

impl<T: PlcTransport + 'static> EngineStatusDeriver<T> {
    pub fn new(engine: Arc<RwLock<PollingEngine<T>>>) -> Self {
        Self { engine }
    }
}

fn equipment_state(state: ThreadState) -> EquipmentState {
    match state {
        ThreadState::Running => EquipmentState::Running,
        ThreadState::Stopping => EquipmentState::Idle,
        ThreadState::Stopped => EquipmentState::Stopped,
        ThreadState::Error => EquipmentState::Error,
    }
}

#[async_trait]
impl<T: PlcTransport + 'static> StatusDeriver for EngineStatusDeriver<T> {
    async fn derive(&self) -> Vec<EquipmentStatus> {
        let snapshot = self.engine.read().await.equipment_snapshot();
        let now = Utc::now();
        snapshot
            .into_iter()
            .map(|(plc_code, group_name, state)| EquipmentStatus {
                equipment_name: format!("{plc_code}/{group_name}"),
                equipment_code: plc_code,
                status: equipment_state(state),
                last_updated: now,
            })
            .collect()
    }
}
