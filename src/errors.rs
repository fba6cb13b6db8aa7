//! Error types for the SCADA collector

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("[{plc_code}] connection failed: {message}")]
    ConnectionFailed { plc_code: String, message: String },

    #[error("[{plc_code}] timeout: {message}")]
    Timeout { plc_code: String, message: String },

    #[error("[{plc_code}] protocol error {error_code:?}: {message}")]
    ProtocolError {
        plc_code: String,
        error_code: Option<String>,
        message: String,
    },

    #[error("[{plc_code}] read error: {message}")]
    ReadError { plc_code: String, message: String },

    #[error("connection pool for {plc_code} exhausted after waiting {waited_ms}ms")]
    PoolExhausted { plc_code: String, waited_ms: u64 },

    #[error("PLC {plc_code} is inactive or unknown")]
    InactivePlc { plc_code: String },

    #[error("buffer is empty")]
    BufferEmpty,

    #[error("queue '{name}' is full (capacity {capacity})")]
    QueueFull { name: String, capacity: usize },

    #[error("oracle batch failure: {0}")]
    OracleBatchFailure(String),

    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("polling group '{0}' not found")]
    PollingGroupNotFound(String),

    #[error("polling group '{0}' is already running")]
    PollingGroupAlreadyRunning(String),

    #[error("polling group '{0}' is not running")]
    PollingGroupNotRunning(String),

    #[error("maximum concurrent polling groups ({0}) reached")]
    MaxPollingGroupsReached(usize),
}

pub type CollectorResult<T> = Result<T, CollectorError>;
