//! Configuration management for the SCADA collector
//!
//! Loads configuration from environment variables with sensible defaults,
//! following the same `dotenv` + `env::var(...).unwrap_or_else(...).parse()`
//! pattern as the rest of this codebase's ancestry.

use anyhow::Result;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: String,
    pub log_level: String,
    pub api_host: String,
    pub api_port: u16,
    pub config_store_path: String,
    pub oracle: OracleConfig,
    pub buffer: BufferConfig,
    pub polling: PollingConfig,
    pub plc: PlcConfig,
    pub backup_max_age_days: u32,
    pub backup_max_count: usize,
    pub failure_log_max_age_days: u32,
}

#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub host: String,
    pub port: u16,
    pub service_name: String,
    pub username: String,
    pub password: String,
    pub pool_min: u32,
    pub pool_max: u32,
}

impl OracleConfig {
    pub fn dsn(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.service_name)
    }

    pub fn connect_string(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.username, self.host, self.port, self.service_name
        )
    }
}

#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Maximum capacity of the CircularBuffer.
    pub max_size: usize,
    /// Target/default Oracle write batch size.
    pub batch_size: usize,
    /// Upper clamp for batch size (warn, not reject, outside [100, max]).
    pub batch_size_max: usize,
    /// Time trigger for a write cycle, in seconds.
    pub write_interval_secs: f64,
    /// Retry attempts for a failed Oracle batch before CSV fallback.
    pub retry_count: u32,
    pub backup_file_path: String,
}

#[derive(Debug, Clone)]
pub struct PollingConfig {
    pub max_groups: usize,
    pub data_queue_size: usize,
    pub websocket_broadcast_interval_secs: f64,
}

#[derive(Debug, Clone)]
pub struct PlcConfig {
    pub connection_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub pool_size_per_plc: usize,
    pub idle_timeout_secs: u64,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    env_or(key, default)
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("invalid value for {key}: {e}"))
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // Load .env file if present

        Ok(Config {
            environment: env_or("ENVIRONMENT", "development"),
            log_level: env_or("LOG_LEVEL", "info"),
            api_host: env_or("API_HOST", "0.0.0.0"),
            api_port: parse_env("API_PORT", "8000")?,
            config_store_path: env_or("CONFIG_STORE_PATH", "data/config_store.json"),
            oracle: OracleConfig {
                host: env::var("ORACLE_HOST")
                    .map_err(|_| anyhow::anyhow!("ORACLE_HOST must be set"))?,
                port: parse_env("ORACLE_PORT", "1521")?,
                service_name: env::var("ORACLE_SERVICE_NAME")
                    .map_err(|_| anyhow::anyhow!("ORACLE_SERVICE_NAME must be set"))?,
                username: env::var("ORACLE_USERNAME")
                    .map_err(|_| anyhow::anyhow!("ORACLE_USERNAME must be set"))?,
                password: env::var("ORACLE_PASSWORD")
                    .map_err(|_| anyhow::anyhow!("ORACLE_PASSWORD must be set"))?,
                pool_min: parse_env("ORACLE_POOL_MIN", "2")?,
                pool_max: parse_env("ORACLE_POOL_MAX", "5")?,
            },
            buffer: BufferConfig {
                max_size: parse_env("BUFFER_MAX_SIZE", "100000")?,
                batch_size: parse_env("BUFFER_BATCH_SIZE", "500")?,
                batch_size_max: parse_env("BUFFER_BATCH_SIZE_MAX", "1000")?,
                write_interval_secs: parse_env("BUFFER_WRITE_INTERVAL", "1.0")?,
                retry_count: parse_env("BUFFER_RETRY_COUNT", "3")?,
                backup_file_path: env_or("BACKUP_FILE_PATH", "backup"),
            },
            polling: PollingConfig {
                max_groups: parse_env("MAX_POLLING_GROUPS", "10")?,
                data_queue_size: parse_env("DATA_QUEUE_SIZE", "10000")?,
                websocket_broadcast_interval_secs: parse_env(
                    "WEBSOCKET_BROADCAST_INTERVAL",
                    "1.0",
                )?,
            },
            plc: PlcConfig {
                connection_timeout_secs: parse_env("CONNECTION_TIMEOUT", "5")?,
                read_timeout_secs: parse_env("READ_TIMEOUT", "3")?,
                pool_size_per_plc: parse_env("POOL_SIZE_PER_PLC", "5")?,
                idle_timeout_secs: parse_env("IDLE_TIMEOUT", "600")?,
            },
            backup_max_age_days: parse_env("BACKUP_MAX_AGE_DAYS", "30")?,
            backup_max_count: parse_env("BACKUP_MAX_COUNT", "100")?,
            failure_log_max_age_days: parse_env("FAILURE_LOG_MAX_AGE_DAYS", "30")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oracle_dsn_format() {
        let cfg = OracleConfig {
            host: "dbhost".into(),
            port: 1521,
            service_name: "ORCL".into(),
            username: "scada".into(),
            password: "secret".into(),
            pool_min: 2,
            pool_max: 5,
        };
        assert_eq!(cfg.dsn(), "dbhost:1521/ORCL");
        assert_eq!(cfg.connect_string(), "scada@dbhost:1521/ORCL");
    }
}
