//! Polling domain model types (SPEC_FULL.md §4.3).
//!
//! Grounded on `examples/original_source/backend/src/polling/models.py`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::errors::{CollectorError, CollectorResult};
use crate::plc::value::TagValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PollingMode {
    Fixed,
    Handshake,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Operation,
    State,
    Alarm,
}

/// Per-tag persistence policy, consulted by the Oracle writer against the
/// tag value cache (SPEC_FULL.md §4.7). Moved here (rather than living in
/// `config_store`) since both the config store and the polling/writer
/// layers need it and this is the lower, shared module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogMode {
    Always,
    OnChange,
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThreadState {
    Stopped,
    Running,
    Stopping,
    Error,
}

/// A single group of tags polled together on one schedule against one PLC.
/// `__post_init__` validation from the Python dataclass (FIXED requires
/// interval_ms>=100 and a non-empty tag list) is reproduced in
/// `PollingGroup::new` as a fallible constructor.
#[derive(Debug, Clone)]
pub struct PollingGroup {
    pub id: u32,
    pub group_name: String,
    pub plc_code: String,
    pub mode: PollingMode,
    pub interval_ms: Option<u64>,
    pub category: Category,
    pub tag_addresses: Vec<String>,
    /// Loaded once at construction time (the async analog of the Python
    /// worker's "load on RUNNING entry"): per-tag persistence policy and
    /// owning machine code, consulted by the Oracle writer.
    pub tag_log_modes: HashMap<String, LogMode>,
    pub tag_machine_codes: HashMap<String, Option<String>>,
}

impl PollingGroup {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u32,
        group_name: String,
        plc_code: String,
        mode: PollingMode,
        interval_ms: Option<u64>,
        category: Category,
        tag_addresses: Vec<String>,
        tag_log_modes: HashMap<String, LogMode>,
        tag_machine_codes: HashMap<String, Option<String>>,
    ) -> CollectorResult<Self> {
        if tag_addresses.is_empty() {
            return Err(CollectorError::ConfigurationError(format!(
                "polling group {group_name} has no tag addresses"
            )));
        }
        if matches!(mode, PollingMode::Fixed) {
            match interval_ms {
                Some(ms) if ms >= 100 => {}
                _ => {
                    return Err(CollectorError::ConfigurationError(format!(
                        "FIXED polling group {group_name} requires interval_ms >= 100"
                    )))
                }
            }
        }
        Ok(Self {
            id,
            group_name,
            plc_code,
            mode,
            interval_ms,
            category,
            tag_addresses,
            tag_log_modes,
            tag_machine_codes,
        })
    }
}

/// One poll cycle's output: all tag values read (or errored) for a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingSample {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub group_id: u32,
    pub group_name: String,
    pub plc_code: String,
    pub mode: PollingMode,
    pub category: Category,
    pub tag_values: HashMap<String, TagValue>,
    pub poll_time_ms: u64,
    pub error_tags: Vec<String>,
    pub tag_log_modes: HashMap<String, LogMode>,
    pub tag_machine_codes: HashMap<String, Option<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PollingStatus {
    pub group_id: u32,
    pub state: ThreadState,
    pub last_poll_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_poll_time_ms: Option<u64>,
    pub avg_poll_time_ms: Option<f64>,
    pub total_polls: u64,
    pub total_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_group_requires_interval_and_tags() {
        assert!(PollingGroup::new(
            1,
            "g".into(),
            "P1".into(),
            PollingMode::Fixed,
            None,
            Category::Operation,
            vec!["D100".into()],
            HashMap::new(),
            HashMap::new(),
        )
        .is_err());

        assert!(PollingGroup::new(
            1,
            "g".into(),
            "P1".into(),
            PollingMode::Fixed,
            Some(50),
            Category::Operation,
            vec!["D100".into()],
            HashMap::new(),
            HashMap::new(),
        )
        .is_err());

        assert!(PollingGroup::new(
            1,
            "g".into(),
            "P1".into(),
            PollingMode::Fixed,
            Some(100),
            Category::Operation,
            vec![],
            HashMap::new(),
            HashMap::new(),
        )
        .is_err());
    }

    #[test]
    fn handshake_group_does_not_require_interval() {
        assert!(PollingGroup::new(
            1,
            "g".into(),
            "P1".into(),
            PollingMode::Handshake,
            None,
            Category::State,
            vec!["D100".into()],
            HashMap::new(),
            HashMap::new(),
        )
        .is_ok());
    }
}
