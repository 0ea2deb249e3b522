//! Sync counters persisted across restarts

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::SYNC_METRICS_KEY;
use crate::store::LocalStore;
use crate::util::duration_millis;

/// Counters over every sync attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncMetrics {
    pub total_syncs: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    pub last_sync_duration_ms: u64,
    /// Rolling average over all attempts
    pub average_sync_time_ms: u64,
    /// Cumulative bytes put on the wire
    pub data_transferred: u64,
}

impl SyncMetrics {
    fn apply(&mut self, success: bool, duration_ms: u64, bytes: u64) {
        self.total_syncs += 1;
        if success {
            self.successful_syncs += 1;
        } else {
            self.failed_syncs += 1;
        }
        self.last_sync_duration_ms = duration_ms;

        let previous_total = u128::from(self.average_sync_time_ms) * u128::from(self.total_syncs - 1);
        let average = (previous_total + u128::from(duration_ms)) / u128::from(self.total_syncs);
        self.average_sync_time_ms = u64::try_from(average).unwrap_or(u64::MAX);
        self.data_transferred = self.data_transferred.saturating_add(bytes);
    }
}

/// Records sync attempts; never fails.
#[derive(Clone)]
pub struct MetricsRecorder {
    store: LocalStore,
}

impl MetricsRecorder {
    pub const fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Count one attempt.
    pub async fn record(&self, success: bool, duration: Duration, bytes: u64) {
        let duration_ms = duration_millis(duration);
        let updated = self
            .store
            .update_config(SYNC_METRICS_KEY, |metrics: &mut SyncMetrics| {
                metrics.apply(success, duration_ms, bytes);
            })
            .await;

        if let Err(error) = updated {
            tracing::warn!("Failed to persist sync metrics: {error}");
        }
    }

    /// Current counters; zeroes when nothing was recorded or the read fails.
    pub async fn snapshot(&self) -> SyncMetrics {
        match self.store.get_config::<SyncMetrics>(SYNC_METRICS_KEY).await {
            Ok(metrics) => metrics.unwrap_or_default(),
            Err(error) => {
                tracing::warn!("Failed to load sync metrics: {error}");
                SyncMetrics::default()
            }
        }
    }
}
