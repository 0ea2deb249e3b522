//! Connectivity levels, network classes and the observable state

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How far the device can currently reach, ordered from least to most.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectivityLevel {
    /// No network, or auto mode disabled
    Offline,
    /// Network interface up, nothing confirmed beyond it
    OnlineLocal,
    /// The private-network peer answered
    OnlinePeer,
    /// The application endpoint on the peer answered
    OnlineServer,
}

impl ConnectivityLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "OFFLINE",
            Self::OnlineLocal => "ONLINE_LOCAL",
            Self::OnlinePeer => "ONLINE_PEER",
            Self::OnlineServer => "ONLINE_SERVER",
        }
    }
}

impl fmt::Display for ConnectivityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse network class reported by the platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionClass {
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
    #[serde(rename = "5g")]
    FiveG,
    #[serde(rename = "wifi")]
    Wifi,
    #[serde(rename = "offline")]
    Offline,
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

/// Sync aggressiveness suggested for a connection class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStrategy {
    /// `None` when there is nothing to sync over
    pub sync_interval: Option<Duration>,
    pub cache_first: bool,
    pub prefetch: bool,
}

impl ConnectionClass {
    /// Map a platform effective-type string (`slow-2g`, `4g`, `ethernet`, ...).
    pub fn from_effective_type(effective_type: Option<&str>) -> Self {
        let Some(raw) = effective_type else {
            return Self::Unknown;
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "slow-2g" | "2g" => Self::TwoG,
            "3g" => Self::ThreeG,
            "4g" => Self::FourG,
            "5g" => Self::FiveG,
            "wifi" | "ethernet" => Self::Wifi,
            "none" | "offline" => Self::Offline,
            _ => Self::Unknown,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TwoG => "2g",
            Self::ThreeG => "3g",
            Self::FourG => "4g",
            Self::FiveG => "5g",
            Self::Wifi => "wifi",
            Self::Offline => "offline",
            Self::Unknown => "unknown",
        }
    }

    /// Suggested strategy; unknown networks are treated like 4G.
    pub const fn strategy(self) -> ConnectionStrategy {
        const fn every(secs: u64, cache_first: bool, prefetch: bool) -> ConnectionStrategy {
            ConnectionStrategy {
                sync_interval: Some(Duration::from_secs(secs)),
                cache_first,
                prefetch,
            }
        }

        match self {
            Self::Offline => ConnectionStrategy {
                sync_interval: None,
                cache_first: true,
                prefetch: false,
            },
            Self::TwoG => every(300, true, false),
            Self::ThreeG => every(180, true, false),
            Self::FourG | Self::Unknown => every(60, false, true),
            Self::FiveG | Self::Wifi => every(30, false, true),
        }
    }
}

impl fmt::Display for ConnectionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest connectivity snapshot, rebuilt on every probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityState {
    /// Low-level network interface status
    pub online: bool,
    pub peer_reachable: bool,
    pub server_available: bool,
    pub connection_class: ConnectionClass,
    /// Time of the last probe (Unix ms)
    pub last_check: Option<i64>,
    /// When false the reported level is forced to `Offline`
    pub auto_mode: bool,
}

impl Default for ConnectivityState {
    fn default() -> Self {
        Self {
            online: true,
            peer_reachable: false,
            server_available: false,
            connection_class: ConnectionClass::Unknown,
            last_check: None,
            auto_mode: true,
        }
    }
}

impl ConnectivityState {
    /// Level derived from the confirmed reachability flags.
    pub const fn level(&self) -> ConnectivityLevel {
        if !self.auto_mode || !self.online {
            ConnectivityLevel::Offline
        } else if self.peer_reachable && self.server_available {
            ConnectivityLevel::OnlineServer
        } else if self.peer_reachable {
            ConnectivityLevel::OnlinePeer
        } else {
            ConnectivityLevel::OnlineLocal
        }
    }

    /// Equality ignoring the probe timestamp.
    pub(crate) fn same_reachability(&self, other: &Self) -> bool {
        self.online == other.online
            && self.peer_reachable == other.peer_reachable
            && self.server_available == other.server_available
            && self.connection_class == other.connection_class
            && self.auto_mode == other.auto_mode
    }
}
