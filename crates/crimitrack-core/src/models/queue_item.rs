//! Mutation queue item model

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::Collection;
use crate::error::Error;

/// Delivery priority; lower values are delivered first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(into = "u8", try_from = "u8")]
pub enum Priority {
    Urgent = 1,
    #[default]
    Normal = 2,
    Batch = 3,
}

impl From<Priority> for u8 {
    fn from(value: Priority) -> Self {
        value as Self
    }
}

impl TryFrom<u8> for Priority {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Urgent),
            2 => Ok(Self::Normal),
            3 => Ok(Self::Batch),
            other => Err(Error::InvalidInput(format!("unknown priority {other}"))),
        }
    }
}

/// Lifecycle of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueStatus {
    Pending,
    InFlight,
    Failed,
    Completed,
}

impl QueueStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in-flight",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "in-flight" => Some(Self::InFlight),
            "failed" => Some(Self::Failed),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Change descriptor carried by a queue item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncAction {
    /// A record was created or updated locally
    Upsert { collection: Collection, record: Value },
    /// A record was deleted locally
    Delete { collection: Collection, id: String },
    /// The user settled a conflict; the chosen version must reach the server
    ResolveConflict {
        conflict_id: String,
        collection: Collection,
        record: Value,
    },
}

/// One pending outbound change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationQueueItem {
    pub id: String,
    pub action: SyncAction,
    pub priority: Priority,
    /// Enqueue time (Unix ms)
    pub timestamp: i64,
    pub device_id: String,
    pub attempts: u32,
    pub status: QueueStatus,
}

impl MutationQueueItem {
    /// Create a pending item stamped with the current time.
    pub fn new(action: SyncAction, priority: Priority, device_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            action,
            priority,
            timestamp: crate::util::now_millis(),
            device_id: device_id.into(),
            attempts: 0,
            status: QueueStatus::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == QueueStatus::Pending
    }
}
