//! Oracle historian subsystem (SPEC_FULL.md §4.7): connection pool, rolling
//! write metrics, CSV failover, and the batching writer itself.

pub mod backup;
pub mod metrics;
pub mod pool;
pub mod writer;

pub use backup::CsvBackup;
pub use metrics::RollingMetrics;
pub use pool::{OraclePool, OraclePoolStats};
pub use writer::OracleWriter;
