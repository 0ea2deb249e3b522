//! crimitrack-core - Offline storage and sync core for CrimiTrack
//!
//! This crate holds the local store, the mutation queue, the connectivity
//! monitor and the sync engine that keep a forensic-expertise schedule usable
//! without a network and resynchronize it when the peer is reachable.

pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod events;
pub mod metrics;
pub mod models;
pub mod queue;
pub mod store;
pub mod sync;
pub mod util;

pub use config::SyncConfig;
pub use connectivity::{ConnectivityLevel, ConnectivityMonitor, ConnectivityState};
pub use error::{Error, Result};
pub use events::{EventBus, SyncEvent};
pub use metrics::{MetricsRecorder, SyncMetrics};
pub use models::{Collection, MutationQueueItem, Priority, Record, RecordId, SyncAction};
pub use queue::MutationQueue;
pub use store::LocalStore;
pub use sync::{HttpTransport, SyncEngine, SyncServices};
