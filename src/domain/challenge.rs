//! Challenge records as seen by the registry, the dispatcher and the orchestrator.
//!
//! `DateTime<Utc>` is `Copy`, so every accessor that hands out a start time
//! hands out an independent value. Callers cannot reach back into the maps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A challenge known to the registry, keyed by `challenge_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Challenge identifier (unique within the registry)
    pub challenge_id: String,

    /// Latest known start time
    pub start_time: DateTime<Utc>,
}

impl RegistryEntry {
    pub fn new(challenge_id: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            challenge_id: challenge_id.into(),
            start_time,
        }
    }

    /// Whether the start time is strictly after `now`
    pub fn is_future(&self, now: DateTime<Utc>) -> bool {
        self.start_time > now
    }
}

/// Read-only projection of a pending dispatcher timer.
///
/// Never exposes the callback or the cancel handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledEntry {
    pub challenge_id: String,
    pub start_time: DateTime<Utc>,
}

/// Registry entry annotated with the dispatcher's view of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrchestratorEntry {
    pub challenge_id: String,
    pub start_time: DateTime<Utc>,

    /// Whether a live timer is currently armed for this challenge
    pub is_scheduled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_is_future_is_strict() {
        let now = Utc::now();
        assert!(RegistryEntry::new("c1", now + Duration::seconds(1)).is_future(now));
        assert!(!RegistryEntry::new("c1", now).is_future(now));
        assert!(!RegistryEntry::new("c1", now - Duration::seconds(1)).is_future(now));
    }

    #[test]
    fn test_registry_entry_deserializes_rfc3339() {
        let json = r#"{"challenge_id":"c1","start_time":"2026-10-19T12:00:00Z"}"#;
        let entry: RegistryEntry = serde_json::from_str(json).unwrap();

        assert_eq!(entry.challenge_id, "c1");
        assert_eq!(entry.start_time.to_rfc3339(), "2026-10-19T12:00:00+00:00");
    }
}
