//! Polling engine: orchestrates per-group workers (SPEC_FULL.md §4.3).
//!
//! Grounded on
//! `examples/original_source/backend/src/polling/polling_engine.py`
//! (`PollingEngine`). Group/tag loading goes through the [`ConfigStore`]
//! seam rather than direct SQLite queries, per SPEC_FULL.md §1 (config
//! store schema is out of scope).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config_store::ConfigStore;
use crate::errors::{CollectorError, CollectorResult};
use crate::plc::pool_manager::PoolManager;
use crate::plc::transport::PlcTransport;
use crate::polling::failure_logger::PollingFailureLogger;
use crate::polling::models::{PollingGroup, PollingMode, PollingStatus};
use crate::polling::queue::DataQueue;
use crate::polling::worker::PollingWorker;

pub const MAX_POLLING_GROUPS: usize = 10;

/// Default `stop_group` join timeout used by `stop_all`/`shutdown`, when the
/// caller doesn't need a tighter bound of its own.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct PollingEngine<T: PlcTransport + 'static> {
    pool_manager: Arc<PoolManager<T>>,
    data_queue: Arc<DataQueue>,
    failure_logger: Arc<PollingFailureLogger>,
    workers: HashMap<String, Arc<PollingWorker<T>>>,
    handles: HashMap<String, tokio::task::JoinHandle<()>>,
    max_groups: usize,
}

impl<T: PlcTransport + 'static> PollingEngine<T> {
    pub fn new(
        pool_manager: Arc<PoolManager<T>>,
        data_queue_capacity: usize,
        failure_logger: Arc<PollingFailureLogger>,
    ) -> Self {
        info!(max_groups = MAX_POLLING_GROUPS, "polling engine initialized");
        Self {
            pool_manager,
            data_queue: Arc::new(DataQueue::new(data_queue_capacity)),
            failure_logger,
            workers: HashMap::new(),
            handles: HashMap::new(),
            max_groups: MAX_POLLING_GROUPS,
        }
    }

    pub fn data_queue(&self) -> Arc<DataQueue> {
        self.data_queue.clone()
    }

    /// Loads active polling groups and their active tags from the config
    /// store and creates (but does not start) one worker per group.
    pub async fn initialize(&mut self, config_store: &dyn ConfigStore) -> CollectorResult<()> {
        info!("initializing polling engine from config store");
        let group_records = config_store.load_polling_groups().await?;
        let tag_records = config_store.load_tags().await?;

        for record in group_records.into_iter().filter(|g| g.is_active) {
            let group_tags: Vec<&crate::config_store::TagRecord> = tag_records
                .iter()
                .filter(|t| t.polling_group_id == record.id && t.plc_code == record.plc_code && t.is_active)
                .collect();

            if group_tags.is_empty() {
                warn!(group = %record.group_name, "polling group has no active tags, skipping");
                continue;
            }

            let tag_addresses: Vec<String> = group_tags.iter().map(|t| t.tag_address.clone()).collect();
            let tag_log_modes: HashMap<String, crate::polling::models::LogMode> = group_tags
                .iter()
                .map(|t| (t.tag_address.clone(), t.log_mode))
                .collect();
            let tag_machine_codes: HashMap<String, Option<String>> = group_tags
                .iter()
                .map(|t| (t.tag_address.clone(), t.machine_code.clone()))
                .collect();

            let group = match PollingGroup::new(
                record.id,
                record.group_name.clone(),
                record.plc_code.clone(),
                record.polling_mode,
                record.polling_interval_ms,
                record.group_category,
                tag_addresses,
                tag_log_modes,
                tag_machine_codes,
            ) {
                Ok(g) => g,
                Err(e) => {
                    error!(group = %record.group_name, error = %e, "invalid polling group configuration, skipping");
                    continue;
                }
            };

            let worker = Arc::new(PollingWorker::new(
                group,
                self.pool_manager.clone(),
                self.data_queue.clone(),
                self.failure_logger.clone(),
            ));
            info!(group = %record.group_name, mode = ?record.polling_mode, "polling worker created");
            self.workers.insert(record.group_name, worker);
        }

        info!(count = self.workers.len(), "polling engine initialization complete");
        Ok(())
    }

    fn check_max_groups(&self) -> CollectorResult<()> {
        if self.handles.len() >= self.max_groups {
            return Err(CollectorError::MaxPollingGroupsReached(self.max_groups));
        }
        Ok(())
    }

    pub fn start_group(&mut self, group_name: &str) -> CollectorResult<()> {
        let worker = self
            .workers
            .get(group_name)
            .ok_or_else(|| CollectorError::PollingGroupNotFound(group_name.to_string()))?
            .clone();

        if self.handles.contains_key(group_name) {
            return Err(CollectorError::PollingGroupAlreadyRunning(group_name.to_string()));
        }
        self.check_max_groups()?;

        let handle = tokio::spawn(worker.run());
        self.handles.insert(group_name.to_string(), handle);
        info!(group = %group_name, "polling group started");
        Ok(())
    }

    /// Signals the group's worker to stop and joins its task, up to
    /// `timeout`. If the worker hasn't exited by then, it's marked `ERROR`
    /// and left running rather than aborted — the engine stops tracking it
    /// as an active handle either way, and the system continues.
    pub async fn stop_group(&mut self, group_name: &str, timeout: Duration) -> CollectorResult<()> {
        let worker = self
            .workers
            .get(group_name)
            .ok_or_else(|| CollectorError::PollingGroupNotFound(group_name.to_string()))?
            .clone();

        let handle = self
            .handles
            .remove(group_name)
            .ok_or_else(|| CollectorError::PollingGroupNotRunning(group_name.to_string()))?;

        worker.stop();
        match tokio::time::timeout(timeout, handle).await {
            Ok(_) => info!(group = %group_name, "polling group stopped"),
            Err(_) => {
                warn!(group = %group_name, timeout_ms = timeout.as_millis(), "polling group did not stop within timeout, marking ERROR");
                worker.mark_error();
            }
        }
        Ok(())
    }

    /// Stops then restarts a group, using `stop_timeout` for the stop half.
    pub async fn restart_group(&mut self, group_name: &str, stop_timeout: Duration) -> CollectorResult<()> {
        self.stop_group(group_name, stop_timeout).await?;
        self.start_group(group_name)
    }

    pub fn start_all(&mut self) {
        info!("starting all polling groups");
        let names: Vec<String> = self.workers.keys().cloned().collect();
        let mut started = 0;
        for name in names {
            match self.start_group(&name) {
                Ok(()) => started += 1,
                Err(CollectorError::MaxPollingGroupsReached(_)) => {
                    error!("max polling groups reached, stopping start_all early");
                    break;
                }
                Err(e) => error!(group = %name, error = %e, "failed to start group"),
            }
        }
        info!(started, "start_all complete");
    }

    pub async fn stop_all(&mut self) {
        info!("stopping all polling groups");
        let names: Vec<String> = self.handles.keys().cloned().collect();
        let mut stopped = 0;
        for name in names {
            if self.stop_group(&name, DEFAULT_STOP_TIMEOUT).await.is_ok() {
                stopped += 1;
            }
        }
        info!(stopped, "stop_all complete");
    }

    /// Full engine shutdown: stops every worker, then closes every PLC
    /// connection pool. The operator-facade `shutdown()` named in
    /// SPEC_FULL.md §6.
    pub async fn shutdown(&mut self) {
        self.stop_all().await;
        self.pool_manager.shutdown().await;
        info!("polling engine shutdown complete");
    }

    /// Triggers a HANDSHAKE-mode group's poll. Errors if the group is
    /// missing, not HANDSHAKE mode, or not currently running.
    pub async fn trigger_handshake(&self, group_name: &str) -> CollectorResult<bool> {
        let worker = self
            .workers
            .get(group_name)
            .ok_or_else(|| CollectorError::PollingGroupNotFound(group_name.to_string()))?;

        if worker.group().mode != PollingMode::Handshake {
            return Err(CollectorError::ConfigurationError(format!(
                "group {group_name} is not in HANDSHAKE mode"
            )));
        }

        Ok(worker.trigger().await)
    }

    pub fn status_all(&self) -> Vec<PollingStatus> {
        self.workers
            .values()
            .map(|w| PollingStatus {
                group_id: w.group().id,
                state: w.state(),
                last_poll_at: None,
                last_poll_time_ms: None,
                avg_poll_time_ms: None,
                total_polls: w.total_polls(),
                total_errors: w.total_errors(),
            })
            .collect()
    }

    pub fn group_count(&self) -> usize {
        self.workers.len()
    }

    pub fn running_count(&self) -> usize {
        self.handles.len()
    }

    /// `(plc_code, group_name, state)` per worker, for consumers that need
    /// to derive equipment-level status without depending on `PlcTransport`
    /// (e.g. [`crate::app::EngineStatusDeriver`]).
    pub fn equipment_snapshot(&self) -> Vec<(String, String, crate::polling::models::ThreadState)> {
        self.workers
            .values()
            .map(|w| (w.group().plc_code.clone(), w.group().group_name.clone(), w.state()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::{PlcConnectionRecord, PollingGroupRecord, TagRecord};
    use crate::config_store::LogMode;
    use crate::plc::transport::mock::MockTransport;
    use crate::polling::models::Category;
    use async_trait::async_trait;

    struct FakeStore;

    #[async_trait]
    impl ConfigStore for FakeStore {
        async fn load_plc_connections(&self) -> CollectorResult<Vec<PlcConnectionRecord>> {
            Ok(vec![PlcConnectionRecord {
                plc_code: "P1".into(),
                plc_name: "Line1".into(),
                ip_address: "127.0.0.1".into(),
                port: 5010,
                protocol: "MC3E".into(),
                connection_timeout: 5,
                is_active: true,
            }])
        }

        async fn load_polling_groups(&self) -> CollectorResult<Vec<PollingGroupRecord>> {
            Ok(vec![PollingGroupRecord {
                id: 1,
                group_name: "g1".into(),
                plc_code: "P1".into(),
                polling_mode: PollingMode::Fixed,
                polling_interval_ms: Some(200),
                group_category: Category::Operation,
                is_active: true,
            }])
        }

        async fn load_tags(&self) -> CollectorResult<Vec<TagRecord>> {
            Ok(vec![TagRecord {
                plc_code: "P1".into(),
                tag_address: "D100".into(),
                tag_name: "t1".into(),
                tag_type: "WORD".into(),
                polling_group_id: 1,
                machine_code: None,
                log_mode: LogMode::OnChange,
                last_value: None,
                is_active: true,
            }])
        }
    }

    async fn make_engine() -> PollingEngine<MockTransport> {
        let mut pm = PoolManager::<MockTransport>::new(
            2,
            std::time::Duration::from_secs(1),
            std::time::Duration::from_secs(1),
            std::time::Duration::from_secs(600),
        );
        pm.initialize(&FakeStore).await.unwrap();

        let root = std::env::temp_dir().join(format!("scada-engine-test-{}", std::process::id()));
        let mut engine = PollingEngine::new(
            Arc::new(pm),
            100,
            Arc::new(PollingFailureLogger::new(root)),
        );
        engine.initialize(&FakeStore).await.unwrap();
        engine
    }

    #[tokio::test]
    async fn initialize_creates_one_worker_per_active_group() {
        let engine = make_engine().await;
        assert_eq!(engine.group_count(), 1);
    }

    #[tokio::test]
    async fn start_then_stop_group_round_trips() {
        let mut engine = make_engine().await;
        engine.start_group("g1").unwrap();
        assert_eq!(engine.running_count(), 1);

        assert!(matches!(
            engine.start_group("g1"),
            Err(CollectorError::PollingGroupAlreadyRunning(_))
        ));

        engine.stop_group("g1", Duration::from_secs(1)).await.unwrap();
        assert_eq!(engine.running_count(), 0);
    }

    #[tokio::test]
    async fn restart_group_stops_then_starts() {
        let mut engine = make_engine().await;
        engine.start_group("g1").unwrap();
        engine.restart_group("g1", Duration::from_secs(1)).await.unwrap();
        assert_eq!(engine.running_count(), 1);
    }

    #[tokio::test]
    async fn start_unknown_group_errors() {
        let mut engine = make_engine().await;
        assert!(matches!(
            engine.start_group("nope"),
            Err(CollectorError::PollingGroupNotFound(_))
        ));
    }

    #[tokio::test]
    async fn trigger_handshake_rejects_fixed_mode_group() {
        let mut engine = make_engine().await;
        engine.start_group("g1").unwrap();
        let err = engine.trigger_handshake("g1").await.unwrap_err();
        assert!(matches!(err, CollectorError::ConfigurationError(_)));
        engine.stop_group("g1", Duration::from_secs(1)).await.unwrap();
    }
}
