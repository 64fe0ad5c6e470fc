//! Per-service circuit record and its store encoding.
//!
//! Key layout:
//! - `circuit_breaker:{service}:state` → JSON [`CircuitRecord`]
//! - `circuit_breaker:{service}:probe` → instance id holding the probe lock

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::StoreResult;

const KEY_PREFIX: &str = "circuit_breaker";

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    /// Value published on the `circuit_state` gauge.
    pub fn gauge_value(&self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State machine data for one guarded service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CircuitRecord {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    /// Time of the last local mutation; orders records from different instances.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl CircuitRecord {
    /// True when `other` was written after this record.
    pub fn is_older_than(&self, other: &CircuitRecord) -> bool {
        match (self.updated_at, other.updated_at) {
            (Some(mine), Some(theirs)) => theirs > mine,
            (None, Some(_)) => true,
            _ => false,
        }
    }

    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> StoreResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Store key of a service's record.
pub fn state_key(service: &str) -> String {
    format!("{KEY_PREFIX}:{service}:state")
}

/// Store key of a service's probe lock.
pub fn probe_key(service: &str) -> String {
    format!("{KEY_PREFIX}:{service}:probe")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    #[test]
    fn test_key_layout() {
        assert_eq!(state_key("discovery"), "circuit_breaker:discovery:state");
        assert_eq!(probe_key("discovery"), "circuit_breaker:discovery:probe");
    }

    #[test]
    fn test_wire_format() {
        let opened = "2026-01-02T03:04:05Z".parse::<DateTime<Utc>>().unwrap();
        let record = CircuitRecord {
            state: CircuitState::HalfOpen,
            failure_count: 3,
            success_count: 0,
            last_failure_time: Some(opened),
            opened_at: Some(opened),
            updated_at: None,
        };

        let json: serde_json::Value = serde_json::from_slice(&record.encode().unwrap()).unwrap();
        assert_eq!(json["state"], "half_open");
        assert_eq!(json["failure_count"], 3);
        assert_eq!(json["opened_at"], "2026-01-02T03:04:05Z");
        assert!(json.get("updated_at").is_none());
    }

    #[test]
    fn test_decode_without_updated_at() {
        let bytes = br#"{"state":"open","failure_count":5,"success_count":0,"last_failure_time":null,"opened_at":null}"#;
        let record = CircuitRecord::decode(bytes).unwrap();
        assert_eq!(record.state, CircuitState::Open);
        assert_eq!(record.updated_at, None);
    }

    #[test]
    fn test_decode_garbage_is_serialization_error() {
        assert!(matches!(
            CircuitRecord::decode(b"not json"),
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn test_ordering_by_updated_at() {
        let now = Utc::now();
        let older = CircuitRecord {
            updated_at: Some(now),
            ..CircuitRecord::default()
        };
        let newer = CircuitRecord {
            updated_at: Some(now + chrono::Duration::seconds(1)),
            ..CircuitRecord::default()
        };
        assert!(older.is_older_than(&newer));
        assert!(!newer.is_older_than(&older));
        assert!(CircuitRecord::default().is_older_than(&newer));
        assert!(!newer.is_older_than(&CircuitRecord::default()));
    }
}
