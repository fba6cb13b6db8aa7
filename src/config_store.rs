//! Configuration store seam (SPEC_FULL.md §6 / §0).
//!
//! The REST CRUD surface and schema/migrations for the configuration store
//! are explicitly out of scope for this crate. What the core needs is a
//! read-only snapshot of three collections at startup. `ConfigStore` is that
//! seam; `JsonFileConfigStore` is a minimal, dependency-free implementation
//! so the crate is runnable without a real database behind it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::errors::{CollectorError, CollectorResult};
use crate::polling::models::{Category, PollingMode};
pub use crate::polling::models::LogMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlcConnectionRecord {
    pub plc_code: String,
    pub plc_name: String,
    pub ip_address: String,
    pub port: u16,
    pub protocol: String,
    pub connection_timeout: u64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingGroupRecord {
    pub id: u32,
    pub group_name: String,
    pub plc_code: String,
    pub polling_mode: PollingMode,
    pub polling_interval_ms: Option<u64>,
    pub group_category: Category,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagRecord {
    pub plc_code: String,
    pub tag_address: String,
    pub tag_name: String,
    pub tag_type: String,
    pub polling_group_id: u32,
    pub machine_code: Option<String>,
    pub log_mode: LogMode,
    pub last_value: Option<String>,
    pub is_active: bool,
}

/// Read-only snapshot source for the three configuration collections the
/// core consumes. Implementations may be backed by a real configuration
/// service; this crate ships only the minimal file-backed one below.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load_plc_connections(&self) -> CollectorResult<Vec<PlcConnectionRecord>>;
    async fn load_polling_groups(&self) -> CollectorResult<Vec<PollingGroupRecord>>;
    async fn load_tags(&self) -> CollectorResult<Vec<TagRecord>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    plc_connections: Vec<PlcConnectionRecord>,
    #[serde(default)]
    polling_groups: Vec<PollingGroupRecord>,
    #[serde(default)]
    tags: Vec<TagRecord>,
}

/// A `ConfigStore` backed by a single JSON file, read fresh on every call.
/// Good enough for a standalone collector instance; not meant to model the
/// real configuration service's schema or migrations (out of scope, §1).
pub struct JsonFileConfigStore {
    path: PathBuf,
}

impl JsonFileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read(&self) -> CollectorResult<Snapshot> {
        let path = self.path.clone();
        let contents = tokio::fs::read_to_string(&path).await.map_err(|e| {
            CollectorError::ConfigurationError(format!(
                "failed to read config store at {}: {e}",
                path.display()
            ))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            CollectorError::ConfigurationError(format!("invalid config store JSON: {e}"))
        })
    }
}

#[async_trait]
impl ConfigStore for JsonFileConfigStore {
    async fn load_plc_connections(&self) -> CollectorResult<Vec<PlcConnectionRecord>> {
        Ok(self.read().await?.plc_connections)
    }

    async fn load_polling_groups(&self) -> CollectorResult<Vec<PollingGroupRecord>> {
        Ok(self.read().await?.polling_groups)
    }

    async fn load_tags(&self) -> CollectorResult<Vec<TagRecord>> {
        Ok(self.read().await?.tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_snapshot_from_json() {
        let dir = std::env::temp_dir().join(format!("scada-store-test-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("store.json");
        tokio::fs::write(
            &path,
            r#"{
                "plc_connections": [{"plc_code":"P1","plc_name":"Line1","ip_address":"10.0.0.1","port":5010,"protocol":"MC3E","connection_timeout":5,"is_active":true}],
                "polling_groups": [],
                "tags": []
            }"#,
        )
        .await
        .unwrap();

        let store = JsonFileConfigStore::new(path);
        let conns = store.load_plc_connections().await.unwrap();
        assert_eq!(conns.len(), 1);
        assert_eq!(conns[0].plc_code, "P1");
    }

    #[tokio::test]
    async fn missing_file_is_configuration_error() {
        let store = JsonFileConfigStore::new("/nonexistent/path/store.json");
        let err = store.load_tags().await.unwrap_err();
        assert!(matches!(err, CollectorError::ConfigurationError(_)));
    }
}
