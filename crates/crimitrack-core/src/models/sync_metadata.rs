//! Device identity and sync bookkeeping

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Class of device the store runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    #[serde(rename = "iPhone")]
    IPhone,
    #[serde(rename = "iPad")]
    IPad,
    MacBook,
    Unknown,
}

impl DeviceType {
    /// Classify a browser user agent string.
    pub fn from_user_agent(user_agent: &str) -> Self {
        if user_agent.contains("iPhone") {
            Self::IPhone
        } else if user_agent.contains("iPad") {
            Self::IPad
        } else if user_agent.contains("Mac") {
            Self::MacBook
        } else {
            Self::Unknown
        }
    }

    /// Best guess for the host running this process.
    pub fn detect() -> Self {
        match std::env::consts::OS {
            "macos" => Self::MacBook,
            "ios" => Self::IPhone,
            _ => Self::Unknown,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IPhone => "iPhone",
            Self::IPad => "iPad",
            Self::MacBook => "MacBook",
            Self::Unknown => "Unknown",
        }
    }

    /// Days of history kept locally; `None` means unlimited.
    pub const fn retention_days(self, aggressive: bool) -> Option<u32> {
        match (self, aggressive) {
            (Self::IPhone, true) => Some(30),
            (Self::IPhone, false) => Some(90),
            (Self::IPad, true) => Some(90),
            (Self::IPad, false) => Some(180),
            (Self::MacBook | Self::Unknown, true) => Some(365),
            (Self::MacBook | Self::Unknown, false) => None,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide sync bookkeeping, persisted once per store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
    pub device_id: String,
    pub device_type: DeviceType,
    #[serde(default)]
    pub last_sync_timestamp: Option<i64>,
    #[serde(default)]
    pub sync_token: Option<String>,
    #[serde(default)]
    pub import_source: Option<String>,
    #[serde(default)]
    pub import_time: Option<String>,
    /// `metadata` object of the last imported snapshot
    #[serde(default)]
    pub snapshot_metadata: Value,
}

impl SyncMetadata {
    /// Fresh metadata with a newly generated device identity.
    pub fn new(device_type: DeviceType) -> Self {
        Self {
            device_id: format!("{device_type}-{}", Uuid::new_v4()),
            device_type,
            last_sync_timestamp: None,
            sync_token: None,
            import_source: None,
            import_time: None,
            snapshot_metadata: Value::Null,
        }
    }
}
