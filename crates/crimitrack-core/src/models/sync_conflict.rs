//! Sync conflict models

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::record::value_timestamp;
use super::Collection;

/// Divergence reported by the server between a local and a remote version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub id: String,
    #[serde(alias = "type")]
    pub collection: Collection,
    pub local: Value,
    #[serde(alias = "server")]
    pub remote: Value,
    /// Set by the server when the changes do not overlap
    #[serde(default)]
    pub auto_resolvable: bool,
}

impl Conflict {
    pub fn local_timestamp(&self) -> i64 {
        value_timestamp(&self.local)
    }

    pub fn remote_timestamp(&self) -> i64 {
        value_timestamp(&self.remote)
    }
}

/// Outcome chosen for a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    KeepLocal,
    KeepRemote,
    Merge,
}

/// Name recorded in the conflict log for a resolution path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Automatic last-writer-wins
    Lww,
    KeepLocal,
    KeepRemote,
    Merge,
}

impl ResolutionStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lww => "lww",
            Self::KeepLocal => "keep_local",
            Self::KeepRemote => "keep_remote",
            Self::Merge => "merge",
        }
    }
}

impl From<Resolution> for ResolutionStrategy {
    fn from(value: Resolution) -> Self {
        match value {
            Resolution::KeepLocal => Self::KeepLocal,
            Resolution::KeepRemote => Self::KeepRemote,
            Resolution::Merge => Self::Merge,
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recorded sync conflict and the strategy that settled it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Record involved in the conflict
    pub record_id: String,
    pub collection: String,
    /// Local version's timestamp when the conflict occurred
    pub local_last_modified: i64,
    /// Remote version's timestamp
    pub remote_last_modified: i64,
    /// Resolution timestamp (unix ms)
    pub resolved_at: i64,
    /// Resolution strategy name
    pub strategy: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_conflict_accepts_server_field_names() {
        let conflict: Conflict = serde_json::from_value(json!({
            "id": "c1",
            "type": "expertise",
            "local": { "id": "e1", "timestamp": 5 },
            "server": { "id": "e1", "_lastModified": 9 },
            "autoResolvable": true
        }))
        .unwrap();
        assert_eq!(conflict.collection, Collection::Expertises);
        assert!(conflict.auto_resolvable);
        assert_eq!(conflict.local_timestamp(), 5);
        assert_eq!(conflict.remote_timestamp(), 9);
    }

    #[test]
    fn test_auto_resolvable_defaults_to_false() {
        let conflict: Conflict = serde_json::from_value(json!({
            "id": "c2",
            "collection": "agenda",
            "local": {},
            "remote": {}
        }))
        .unwrap();
        assert!(!conflict.auto_resolvable);
    }
}
