//! Dynamic tag value type (SPEC_FULL.md §3, design note §9).
//!
//! Arbitrary `address -> value` maps coming off the wire are modeled with
//! this sum type instead of an untyped blob, per the "do not carry untyped
//! blobs across module boundaries" design note.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum TagValue {
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Text(String),
}

impl TagValue {
    /// `VALUE_NUM` coercion rule from SPEC_FULL.md §9: Integer -> f64,
    /// Real -> f64, Boolean -> 0.0|1.0, Text -> None.
    pub fn as_value_num(&self) -> Option<f64> {
        match self {
            TagValue::Integer(i) => Some(*i as f64),
            TagValue::Real(r) => Some(*r),
            TagValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            TagValue::Text(_) => None,
        }
    }

    /// Stringified form used as the cache's `lastValue` and for CSV/Oracle
    /// VALUE_STR columns. Change detection compares this representation.
    pub fn stringify(&self) -> String {
        match self {
            TagValue::Integer(i) => i.to_string(),
            TagValue::Real(r) => r.to_string(),
            TagValue::Boolean(b) => b.to_string(),
            TagValue::Text(s) => s.clone(),
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stringify())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_num_coercion() {
        assert_eq!(TagValue::Integer(7).as_value_num(), Some(7.0));
        assert_eq!(TagValue::Real(1.5).as_value_num(), Some(1.5));
        assert_eq!(TagValue::Boolean(true).as_value_num(), Some(1.0));
        assert_eq!(TagValue::Boolean(false).as_value_num(), Some(0.0));
        assert_eq!(TagValue::Text("x".into()).as_value_num(), None);
    }

    #[test]
    fn stringify_matches_across_variants() {
        assert_eq!(TagValue::Integer(5).stringify(), "5");
        assert_eq!(TagValue::Boolean(true).stringify(), "true");
    }
}
