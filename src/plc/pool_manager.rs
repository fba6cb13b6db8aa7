//! Multi-PLC pool manager (SPEC_FULL.md §4.2).
//!
//! Grounded on `examples/original_source/backend/src/plc/pool_manager.py`.
//! The Python version loads PLC rows straight from its SQLite config store;
//! here that read goes through the [`ConfigStore`] seam instead, since the
//! config store's schema/migrations are out of scope (SPEC_FULL.md §1).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::config_store::ConfigStore;
use crate::errors::{CollectorError, CollectorResult};
use crate::plc::pool::{ConnectionPool, PoolStats};
use crate::plc::transport::PlcTransport;
use crate::plc::value::TagValue;

pub struct PoolManager<T: PlcTransport> {
    pool_size: usize,
    connect_timeout: Duration,
    read_timeout: Duration,
    idle_timeout: Duration,
    pools: HashMap<String, Arc<ConnectionPool<T>>>,
}

impl<T: PlcTransport + 'static> PoolManager<T> {
    pub fn new(
        pool_size: usize,
        connect_timeout: Duration,
        read_timeout: Duration,
        idle_timeout: Duration,
    ) -> Self {
        info!(pool_size, "pool manager initialized");
        Self {
            pool_size,
            connect_timeout,
            read_timeout,
            idle_timeout,
            pools: HashMap::new(),
        }
    }

    /// Loads active PLC connections from the config store and creates one
    /// pool per PLC, each with its idle reaper running.
    pub async fn initialize(&mut self, config_store: &dyn ConfigStore) -> CollectorResult<()> {
        info!("initializing pool manager from config store");
        let plcs = config_store.load_plc_connections().await?;
        let active: Vec<_> = plcs.into_iter().filter(|p| p.is_active).collect();
        info!(count = active.len(), "active PLC(s) found");

        for plc in active {
            let pool = ConnectionPool::<T>::new(
                plc.plc_code.clone(),
                plc.ip_address.clone(),
                plc.port,
                self.pool_size,
                self.connect_timeout,
                self.read_timeout,
                self.idle_timeout,
            );
            pool.spawn_idle_reaper();
            info!(plc_code = %plc.plc_code, ip = %plc.ip_address, port = plc.port, "pool created");
            self.pools.insert(plc.plc_code, pool);
        }

        info!(count = self.pools.len(), "pool manager initialized");
        Ok(())
    }

    fn get_pool(&self, plc_code: &str) -> CollectorResult<&Arc<ConnectionPool<T>>> {
        self.pools.get(plc_code).ok_or_else(|| CollectorError::InactivePlc {
            plc_code: plc_code.to_string(),
        })
    }

    pub async fn read_single(&self, plc_code: &str, tag_address: &str) -> CollectorResult<TagValue> {
        let pool = self.get_pool(plc_code)?;
        let mut lease = pool.acquire(self.connect_timeout).await?;

        let result = lease.client().read_single(tag_address).await;
        if result.is_err() {
            lease.note_error();
        }
        pool.release(lease).await;
        result
    }

    pub async fn read_batch(
        &self,
        plc_code: &str,
        tag_addresses: &[String],
    ) -> CollectorResult<HashMap<String, TagValue>> {
        let pool = self.get_pool(plc_code)?;
        let mut lease = pool.acquire(self.connect_timeout).await?;

        let result = lease.client().read_batch(tag_addresses).await;
        if result.is_err() {
            lease.note_error();
        }
        pool.release(lease).await;
        result
    }

    pub fn plc_count(&self) -> usize {
        self.pools.len()
    }

    pub async fn pool_stats(&self, plc_code: &str) -> CollectorResult<PoolStats> {
        Ok(self.get_pool(plc_code)?.stats().await)
    }

    pub async fn all_pool_stats(&self) -> HashMap<String, PoolStats> {
        let mut stats = HashMap::new();
        for (code, pool) in &self.pools {
            stats.insert(code.clone(), pool.stats().await);
        }
        stats
    }

    /// Closes every PLC's pool. Takes `&self` (not `&mut self`) so it can be
    /// called through a shared `Arc<PoolManager<T>>` once other owners
    /// (e.g. the health provider) hold a clone — `ConnectionPool::close_all`
    /// is itself `&self`-based, so there's no need to drain `self.pools`.
    pub async fn shutdown(&self) {
        info!("shutting down pool manager");
        for (plc_code, pool) in &self.pools {
            pool.close_all().await;
            info!(plc_code, "pool closed");
        }
        info!("pool manager shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::PlcConnectionRecord;
    use crate::plc::transport::mock::MockTransport;
    use async_trait::async_trait;

    struct FakeStore(Vec<PlcConnectionRecord>);

    #[async_trait]
    impl ConfigStore for FakeStore {
        async fn load_plc_connections(&self) -> CollectorResult<Vec<PlcConnectionRecord>> {
            Ok(self.0.clone())
        }
        async fn load_polling_groups(
            &self,
        ) -> CollectorResult<Vec<crate::config_store::PollingGroupRecord>> {
            Ok(vec![])
        }
        async fn load_tags(&self) -> CollectorResult<Vec<crate::config_store::TagRecord>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn initialize_creates_pool_per_active_plc() {
        let store = FakeStore(vec![
            PlcConnectionRecord {
                plc_code: "P1".into(),
                plc_name: "Line1".into(),
                ip_address: "127.0.0.1".into(),
                port: 5010,
                protocol: "MC3E".into(),
                connection_timeout: 5,
                is_active: true,
            },
            PlcConnectionRecord {
                plc_code: "P2".into(),
                plc_name: "Line2".into(),
                ip_address: "127.0.0.1".into(),
                port: 5011,
                protocol: "MC3E".into(),
                connection_timeout: 5,
                is_active: false,
            },
        ]);

        let mut manager = PoolManager::<MockTransport>::new(
            5,
            Duration::from_secs(5),
            Duration::from_secs(5),
            Duration::from_secs(600),
        );
        manager.initialize(&store).await.unwrap();
        assert_eq!(manager.plc_count(), 1);
    }

    #[tokio::test]
    async fn read_on_unknown_plc_is_inactive_error() {
        let manager = PoolManager::<MockTransport>::new(
            5,
            Duration::from_secs(5),
            Duration::from_secs(5),
            Duration::from_secs(600),
        );
        let err = manager.read_single("nope", "D100").await.unwrap_err();
        assert!(matches!(err, CollectorError::InactivePlc { .. }));
    }
}
