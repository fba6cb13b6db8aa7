//! Oracle connection pool wrapper (SPEC_FULL.md §4.7).
//!
//! Grounded on
//! `examples/original_source/backend/src/oracle_writer/connection_pool.py`
//! (`OracleConnectionPool`), reimplemented atop the `oracle` crate (Kubo
//! Takehiro's ODPI-C binding) instead of `python-oracledb`, since that's the
//! real registry crate in this pack
//! (`examples/other_examples/manifests/kubo-rust-oracle/Cargo.toml`). The
//! `oracle` crate's `Pool`/`Connection` API is synchronous, so every call
//! into it here is wrapped in `tokio::task::spawn_blocking`.

use oracle::pool::{CloseMode, GetMode, Pool, PoolBuilder};
use std::time::Duration;
use tracing::{error, info};

use crate::config::OracleConfig;
use crate::errors::{CollectorError, CollectorResult};

#[derive(Debug, Clone)]
pub struct OraclePoolStats {
    pub open: u32,
    pub busy: u32,
}

/// Thin async wrapper around `oracle::pool::Pool`. The pool handle itself
/// is `Send + Sync` (asserted by the crate), so it is shared directly
/// rather than behind a lock; all blocking operations go through
/// `spawn_blocking`.
pub struct OraclePool {
    pool: Pool,
}

fn blocking_err(context: &str, e: impl std::fmt::Display) -> CollectorError {
    CollectorError::OracleBatchFailure(format!("{context}: {e}"))
}

impl OraclePool {
    /// Creates the pool (equivalent of `create_pool()`). Connection is
    /// attempted eagerly up to `min_connections`, matching
    /// `oracledb.create_pool`'s behavior in the original.
    pub async fn create(config: OracleConfig) -> CollectorResult<Self> {
        let dsn = config.dsn();
        info!(dsn = %dsn, min = config.pool_min, max = config.pool_max, "creating Oracle connection pool");

        let pool = tokio::task::spawn_blocking(move || {
            PoolBuilder::new(&config.username, &config.password, &dsn)
                .min_connections(config.pool_min)
                .max_connections(config.pool_max)
                .connection_increment(1)
                .get_mode(GetMode::TimedWait(Duration::from_secs(30)))
                .build()
        })
        .await
        .map_err(|e| blocking_err("oracle pool builder task panicked", e))?
        .map_err(|e| blocking_err("failed to create Oracle connection pool", e))?;

        info!("Oracle connection pool created");
        Ok(Self { pool })
    }

    /// Runs `f` with a leased connection on a blocking thread, returning
    /// the connection to the pool when `f` returns (connections close back
    /// to the pool on drop, matching `Connection::close()` in the Python
    /// context manager).
    pub async fn with_connection<F, R>(&self, f: F) -> CollectorResult<R>
    where
        F: FnOnce(&oracle::Connection) -> oracle::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| blocking_err("failed to acquire Oracle connection", e))?;
            let result = f(&conn).map_err(|e| blocking_err("Oracle statement execution failed", e));
            if let Err(e) = conn.close() {
                error!(error = %e, "failed to release Oracle connection back to pool");
            }
            result
        })
        .await
        .map_err(|e| blocking_err("oracle connection task panicked", e))?
    }

    pub async fn stats(&self) -> CollectorResult<OraclePoolStats> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let open = pool.open_count().map_err(|e| blocking_err("failed to read Oracle pool open count", e))?;
            let busy = pool.busy_count().map_err(|e| blocking_err("failed to read Oracle pool busy count", e))?;
            Ok(OraclePoolStats { open, busy })
        })
        .await
        .map_err(|e| blocking_err("oracle pool stats task panicked", e))?
    }

    pub async fn close(&self) -> CollectorResult<()> {
        info!("closing Oracle connection pool");
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || pool.close(&CloseMode::Force))
            .await
            .map_err(|e| blocking_err("oracle pool close task panicked", e))?
            .map_err(|e| blocking_err("failed to close Oracle connection pool", e))
    }
}
