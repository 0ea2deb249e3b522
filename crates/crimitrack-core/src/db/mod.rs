//! Database layer for CrimiTrack
//!
//! Provides `SQLite` storage with JSON expression indexes for secondary
//! lookups.

mod backup_repository;
mod conflict_repository;
mod connection;
mod migrations;
mod queue_repository;
mod record_repository;
mod settings_repository;

pub use backup_repository::{BackupInfo, BackupRepository, SqliteBackupRepository};
pub use conflict_repository::{ConflictRepository, SqliteConflictRepository};
pub use connection::Database;
pub use migrations::CURRENT_VERSION;
pub use queue_repository::{QueueRepository, SqliteQueueRepository};
pub use record_repository::{RecordRepository, SqliteRecordRepository};
pub use settings_repository::{
    cache_category, CacheRepository, SettingsRepository, SqliteSettingsRepository,
    SYNC_METADATA_KEY, SYNC_METRICS_KEY,
};
