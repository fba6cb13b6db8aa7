//! Per-PLC connection pool (SPEC_FULL.md §4.2).
//!
//! Grounded on `examples/original_source/backend/src/plc/connection_pool.py`
//! (`ConnectionPool`/`PooledConnection`). The Python `queue.Queue` + counter
//! pair becomes a `tokio::sync::Semaphore` bounding total connections plus a
//! `Mutex<VecDeque<_>>` of idle ones; the background cleanup thread becomes
//! a spawned tokio task driven by a `CancellationToken`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::{CollectorError, CollectorResult};
use crate::plc::client::Mc3eClient;
use crate::plc::transport::PlcTransport;

struct PooledConnection<T: PlcTransport> {
    client: Mc3eClient<T>,
    created_at: Instant,
    last_used: Instant,
    error_count: u32,
}

impl<T: PlcTransport> PooledConnection<T> {
    fn is_idle(&self, idle_timeout: Duration) -> bool {
        self.last_used.elapsed() > idle_timeout
    }
}

/// A leased connection. Returned to the pool on drop via an explicit
/// `release` call from the caller (async `Drop` isn't available, so the
/// pool exposes `acquire`/`release` rather than an RAII guard — matching
/// the teacher's explicit `get_connection`/`return_connection` pair).
pub struct Lease<T: PlcTransport> {
    conn: PooledConnection<T>,
}

impl<T: PlcTransport> Lease<T> {
    pub fn client(&mut self) -> &mut Mc3eClient<T> {
        &mut self.conn.client
    }

    pub fn note_error(&mut self) {
        self.conn.error_count += 1;
    }

    pub fn error_count(&self) -> u32 {
        self.conn.error_count
    }
}

pub struct ConnectionPool<T: PlcTransport> {
    plc_code: String,
    ip_address: String,
    port: u16,
    max_size: usize,
    connect_timeout: Duration,
    read_timeout: Duration,
    idle_timeout: Duration,
    available: Mutex<VecDeque<PooledConnection<T>>>,
    permits: Semaphore,
    total_connections: AtomicU32,
    unhealthy_error_threshold: u32,
    cancel: CancellationToken,
}

impl<T: PlcTransport + 'static> ConnectionPool<T> {
    pub fn new(
        plc_code: String,
        ip_address: String,
        port: u16,
        max_size: usize,
        connect_timeout: Duration,
        read_timeout: Duration,
        idle_timeout: Duration,
    ) -> Arc<Self> {
        info!(plc_code = %plc_code, max_size, "connection pool created");
        Arc::new(Self {
            plc_code,
            ip_address,
            port,
            max_size,
            connect_timeout,
            read_timeout,
            idle_timeout,
            available: Mutex::new(VecDeque::new()),
            permits: Semaphore::new(max_size),
            total_connections: AtomicU32::new(0),
            unhealthy_error_threshold: 3,
            cancel: CancellationToken::new(),
        })
    }

    /// Spawns the idle-connection reaper. Ticks every 60s and drops any
    /// connection idle past `idle_timeout`.
    pub fn spawn_idle_reaper(self: &Arc<Self>) {
        let pool = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = pool.cancel.cancelled() => break,
                    _ = tick.tick() => pool.reap_idle().await,
                }
            }
        });
    }

    async fn reap_idle(&self) {
        let mut available = self.available.lock().await;
        let before = available.len();
        let mut kept = VecDeque::with_capacity(before);
        while let Some(mut conn) = available.pop_front() {
            if conn.is_idle(self.idle_timeout) {
                conn.client.close().await;
                self.total_connections.fetch_sub(1, Ordering::SeqCst);
                info!(plc_code = %self.plc_code, "idle connection reaped");
            } else {
                kept.push_back(conn);
            }
        }
        *available = kept;
    }

    /// Acquires a connection, reusing an idle one if available, otherwise
    /// creating a new one up to `max_size`. Waits up to `wait_timeout` for a
    /// free slot before returning `PoolExhausted`.
    pub async fn acquire(&self, wait_timeout: Duration) -> CollectorResult<Lease<T>> {
        let permit = tokio::time::timeout(wait_timeout, self.permits.acquire())
            .await
            .map_err(|_| CollectorError::PoolExhausted {
                plc_code: self.plc_code.clone(),
                waited_ms: wait_timeout.as_millis() as u64,
            })?
            .expect("semaphore never closed");
        permit.forget();

        if let Some(conn) = self.available.lock().await.pop_front() {
            return Ok(Lease { conn });
        }

        self.total_connections.fetch_add(1, Ordering::SeqCst);
        match self.connect().await {
            Ok(client) => Ok(Lease {
                conn: PooledConnection {
                    client,
                    created_at: Instant::now(),
                    last_used: Instant::now(),
                    error_count: 0,
                },
            }),
            Err(e) => {
                self.total_connections.fetch_sub(1, Ordering::SeqCst);
                self.permits.add_permits(1);
                Err(e)
            }
        }
    }

    async fn connect(&self) -> CollectorResult<Mc3eClient<T>> {
        let transport = T::connect(&self.ip_address, self.port, self.connect_timeout)
            .await
            .map_err(|e| CollectorError::ConnectionFailed {
                plc_code: self.plc_code.clone(),
                message: e.to_string(),
            })?;
        Ok(Mc3eClient::new(self.plc_code.clone(), transport, self.read_timeout))
    }

    /// Returns a leased connection to the pool. Connections whose error
    /// counter has crossed the unhealthy threshold are dropped instead of
    /// recycled, so the next acquire creates a fresh one.
    pub async fn release(&self, mut lease: Lease<T>) {
        lease.conn.last_used = Instant::now();
        if lease.conn.error_count >= self.unhealthy_error_threshold {
            warn!(plc_code = %self.plc_code, errors = lease.conn.error_count, "dropping unhealthy connection");
            lease.conn.client.close().await;
            self.total_connections.fetch_sub(1, Ordering::SeqCst);
            self.permits.add_permits(1);
            return;
        }
        self.available.lock().await.push_back(lease.conn);
        self.permits.add_permits(1);
    }

    pub async fn close_all(&self) {
        self.cancel.cancel();
        let mut available = self.available.lock().await;
        while let Some(mut conn) = available.pop_front() {
            conn.client.close().await;
        }
        self.total_connections.store(0, Ordering::SeqCst);
        info!(plc_code = %self.plc_code, "all connections closed");
    }

    pub async fn stats(&self) -> PoolStats {
        let available = self.available.lock().await.len();
        let total = self.total_connections.load(Ordering::SeqCst) as usize;
        let in_use = total.saturating_sub(available);

        crate::metrics::PLC_POOL_CONNECTIONS.with_label_values(&[&self.plc_code, "idle"]).set(available as f64);
        crate::metrics::PLC_POOL_CONNECTIONS.with_label_values(&[&self.plc_code, "in_use"]).set(in_use as f64);

        PoolStats {
            plc_code: self.plc_code.clone(),
            max_size: self.max_size,
            total_connections: total,
            available_connections: available,
            in_use_connections: in_use,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    pub plc_code: String,
    pub max_size: usize,
    pub total_connections: usize,
    pub available_connections: usize,
    pub in_use_connections: usize,
}
