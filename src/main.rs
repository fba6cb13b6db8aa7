//! # SCADA MC 3E Data Collector
//!
//! Polls Mitsubishi Q-series PLCs over the MC 3E ASCII TCP protocol, buffers
//! readings in memory, batches them into an Oracle historian, and fans live
//! samples out to WebSocket monitors.
//!
//! ## Architecture
//!
//! ```text
//! PLC (MC 3E/TCP) → PoolManager → PollingEngine → DataDistributor
//!                                                     ├─→ BufferConsumer → CircularBuffer → OracleWriter → Oracle
//!                                                     └─→ MonitorBroadcaster → WebSocket clients
//!                            EquipmentStatusBroadcaster (derived from PollingEngine) → WebSocket clients
//! ```
//!
//! ## NOT Responsible For
//!
//! - Writing to PLCs (read-only collector)
//! - Alarm evaluation (downstream of this service)
//! - Historical aggregation/query (downstream of this service)
//! - Configuration store schema, migrations, or its REST CRUD surface

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scada_mc3e_collector::api::{self, AppState, HealthProvider};
use scada_mc3e_collector::app::{EngineHealthProvider, EngineStatusDeriver};
use scada_mc3e_collector::buffer::{BufferConsumer, CircularBuffer};
use scada_mc3e_collector::cache::TagValueCache;
use scada_mc3e_collector::config::Config;
use scada_mc3e_collector::config_store::{ConfigStore, JsonFileConfigStore};
use scada_mc3e_collector::oracle_writer::{CsvBackup, OraclePool, OracleWriter, RollingMetrics};
use scada_mc3e_collector::plc::pool_manager::PoolManager;
use scada_mc3e_collector::plc::transport::TcpTransport;
use scada_mc3e_collector::polling::{DataDistributor, PollingEngine, PollingFailureLogger};
use scada_mc3e_collector::ws::{EquipmentStatusBroadcaster, MonitorBroadcaster};

const BUFFER_OVERFLOW_ALERT_PCT: f64 = 80.0;
const ROLLING_METRICS_WINDOW: Duration = Duration::from_secs(300);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 3600);
const FAILURE_LOG_ROOT: &str = "logs/polling_failures";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scada_mc3e_collector=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        "Starting SCADA MC 3E Collector v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::from_env()?;
    info!(environment = %config.environment, "configuration loaded");

    let config_store = JsonFileConfigStore::new(&config.config_store_path);

    let cache = Arc::new(TagValueCache::new());
    let tags = config_store.load_tags().await?;
    cache
        .load_initial(tags.into_iter().map(|t| (t.plc_code, t.tag_address, t.last_value)))
        .await;

    let mut pool_manager = PoolManager::<TcpTransport>::new(
        config.plc.pool_size_per_plc,
        Duration::from_secs(config.plc.connection_timeout_secs),
        Duration::from_secs(config.plc.read_timeout_secs),
        Duration::from_secs(config.plc.idle_timeout_secs),
    );
    pool_manager.initialize(&config_store).await?;
    let pool_manager = Arc::new(pool_manager);

    let failure_logger = Arc::new(PollingFailureLogger::new(FAILURE_LOG_ROOT));

    let mut engine = PollingEngine::new(
        pool_manager.clone(),
        config.polling.data_queue_size,
        failure_logger.clone(),
    );
    engine.initialize(&config_store).await?;
    let data_queue = engine.data_queue();
    engine.start_all();
    let engine = Arc::new(RwLock::new(engine));

    let cancel = CancellationToken::new();

    let mut distributor = DataDistributor::new();
    let buffer_rx = distributor.add_output("buffer", config.polling.data_queue_size);
    let monitor_rx = distributor.add_output("monitor_ws", config.polling.data_queue_size);
    let distributor = Arc::new(distributor);
    tokio::spawn({
        let distributor = distributor.clone();
        let data_queue = data_queue.clone();
        let cancel = cancel.clone();
        async move { distributor.run(data_queue, cancel).await }
    });

    let buffer = Arc::new(CircularBuffer::new(config.buffer.max_size, BUFFER_OVERFLOW_ALERT_PCT));
    let buffer_consumer = Arc::new(BufferConsumer::new(buffer.clone()));
    tokio::spawn({
        let buffer_consumer = buffer_consumer.clone();
        async move { buffer_consumer.run(buffer_rx).await }
    });

    let monitor_broadcaster = Arc::new(MonitorBroadcaster::new());
    tokio::spawn({
        let monitor_broadcaster = monitor_broadcaster.clone();
        let cancel = cancel.clone();
        async move { monitor_broadcaster.run(monitor_rx, cancel).await }
    });

    let status_deriver = Box::new(EngineStatusDeriver::new(engine.clone()));
    let status_broadcaster = Arc::new(EquipmentStatusBroadcaster::new(
        status_deriver,
        Duration::from_secs_f64(config.polling.websocket_broadcast_interval_secs),
    ));
    tokio::spawn({
        let status_broadcaster = status_broadcaster.clone();
        let cancel = cancel.clone();
        async move { status_broadcaster.run(cancel).await }
    });

    let oracle_pool = Arc::new(OraclePool::create(config.oracle.clone()).await?);
    let csv_backup = Arc::new(CsvBackup::new(&config.buffer.backup_file_path).await?);
    let rolling_metrics = Arc::new(RollingMetrics::new(ROLLING_METRICS_WINDOW));
    let oracle_writer = Arc::new(OracleWriter::new(
        buffer.clone(),
        oracle_pool.clone(),
        cache.clone(),
        rolling_metrics,
        csv_backup.clone(),
        &config.buffer,
    ));
    let writer_handle = tokio::spawn({
        let oracle_writer = oracle_writer.clone();
        async move { oracle_writer.run().await }
    });

    tokio::spawn({
        let csv_backup = csv_backup.clone();
        let failure_logger = failure_logger.clone();
        let backup_max_age_days = config.backup_max_age_days as i64;
        let backup_max_count = config.backup_max_count;
        let failure_log_max_age_days = config.failure_log_max_age_days as i64;
        async move {
            let mut tick = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                tick.tick().await;
                csv_backup.cleanup_old_backups(backup_max_age_days, backup_max_count).await;
                failure_logger.cleanup_old_logs(failure_log_max_age_days).await;
            }
        }
    });

    let health_provider: Arc<dyn HealthProvider> = Arc::new(EngineHealthProvider::new(
        engine.clone(),
        pool_manager.clone(),
        oracle_writer.clone(),
        buffer.clone(),
    ));

    let app_state = AppState {
        health: health_provider,
        monitor_broadcaster: monitor_broadcaster.clone(),
        status_broadcaster: status_broadcaster.clone(),
    };
    let router = api::build_router(app_state);

    let listener = tokio::net::TcpListener::bind((config.api_host.as_str(), config.api_port)).await?;
    info!(host = %config.api_host, port = config.api_port, "API server listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Service ready. Listening for shutdown signals (SIGTERM, SIGINT)");
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("SIGINT (Ctrl+C) received, initiating graceful shutdown...");
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("SIGTERM received, initiating graceful shutdown...");
        }
    }

    cancel.cancel();

    info!("stopping all polling groups and closing plc pools");
    engine.write().await.shutdown().await;

    info!("stopping oracle writer, flushing remaining buffer...");
    oracle_writer.stop();
    let _ = writer_handle.await;

    oracle_pool.close().await.ok();

    info!("SCADA MC 3E Collector stopped successfully");
    Ok(())
}
