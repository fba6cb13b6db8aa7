//! In-memory last-value cache for change detection (SPEC_FULL.md §4.6).
//!
//! Grounded on
//! `examples/original_source/backend/src/polling/tag_value_cache.py`
//! (`TagValueCache`). The Python version guards a plain dict with an
//! `RLock`; a `tokio::sync::RwLock<HashMap<_>>` gives the same O(1)
//! read/write semantics without blocking the async runtime.
//!
//! Per SPEC_FULL.md's resolution of Open Question 1, the cache is updated
//! only after an Oracle commit succeeds, and for every item in the
//! pre-filter batch (so `ON_CHANGE` comparisons always see the true last
//! written value, not just the ones that happened to pass the filter).

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone)]
struct CacheEntry {
    last_value: String,
    last_updated: DateTime<Utc>,
}

pub struct TagValueCache {
    cache: RwLock<HashMap<String, CacheEntry>>,
}

fn cache_key(plc_code: &str, tag_address: &str) -> String {
    format!("{plc_code}:{tag_address}")
}

impl TagValueCache {
    pub fn new() -> Self {
        info!("tag value cache initialized");
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, plc_code: &str, tag_address: &str) -> Option<String> {
        let key = cache_key(plc_code, tag_address);
        self.cache.read().await.get(&key).map(|e| e.last_value.clone())
    }

    pub async fn set(&self, plc_code: &str, tag_address: &str, value: String) {
        self.set_at(plc_code, tag_address, value, Utc::now()).await;
    }

    pub async fn set_at(&self, plc_code: &str, tag_address: &str, value: String, timestamp: DateTime<Utc>) {
        let key = cache_key(plc_code, tag_address);
        self.cache.write().await.insert(
            key,
            CacheEntry {
                last_value: value,
                last_updated: timestamp,
            },
        );
    }

    /// Bulk-loads initial values from the config store's `last_value`
    /// column, matching `load_from_db` in the Python cache.
    pub async fn load_initial(&self, entries: impl IntoIterator<Item = (String, String, Option<String>)>) -> usize {
        let mut cache = self.cache.write().await;
        for (plc_code, tag_address, last_value) in entries {
            if let Some(value) = last_value {
                let key = cache_key(&plc_code, &tag_address);
                cache.insert(
                    key,
                    CacheEntry {
                        last_value: value,
                        last_updated: Utc::now(),
                    },
                );
            }
        }
        info!(count = cache.len(), "tag value cache loaded");
        cache.len()
    }

    pub async fn clear(&self) {
        let mut cache = self.cache.write().await;
        let count = cache.len();
        cache.clear();
        info!(count, "tag value cache cleared");
    }

    pub async fn size(&self) -> usize {
        self.cache.read().await.len()
    }
}

impl Default for TagValueCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_returns_none_for_unknown_key() {
        let cache = TagValueCache::new();
        assert_eq!(cache.get("P1", "D100").await, None);
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = TagValueCache::new();
        cache.set("P1", "D100", "42".into()).await;
        assert_eq!(cache.get("P1", "D100").await, Some("42".into()));
    }

    #[tokio::test]
    async fn distinct_plcs_do_not_collide() {
        let cache = TagValueCache::new();
        cache.set("P1", "D100", "1".into()).await;
        cache.set("P2", "D100", "2".into()).await;
        assert_eq!(cache.get("P1", "D100").await, Some("1".into()));
        assert_eq!(cache.get("P2", "D100").await, Some("2".into()));
    }

    #[tokio::test]
    async fn load_initial_skips_missing_values() {
        let cache = TagValueCache::new();
        let loaded = cache
            .load_initial(vec![
                ("P1".to_string(), "D100".to_string(), Some("5".to_string())),
                ("P1".to_string(), "D101".to_string(), None),
            ])
            .await;
        assert_eq!(loaded, 1);
        assert_eq!(cache.get("P1", "D100").await, Some("5".into()));
        assert_eq!(cache.get("P1", "D101").await, None);
    }

    #[tokio::test]
    async fn clear_empties_cache() {
        let cache = TagValueCache::new();
        cache.set("P1", "D100", "1".into()).await;
        cache.clear().await;
        assert_eq!(cache.size().await, 0);
    }
}
