//! Local store service shared by the queue and the sync engine.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use rusqlite::types::Value as SqlValue;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::db::{
    cache_category, BackupInfo, BackupRepository, CacheRepository, ConflictRepository, Database,
    QueueRepository, RecordRepository, SettingsRepository, SqliteBackupRepository,
    SqliteConflictRepository, SqliteQueueRepository, SqliteRecordRepository,
    SqliteSettingsRepository, SYNC_METADATA_KEY,
};
use crate::error::{Error, Result};
use crate::models::{
    Collection, DeviceType, MutationQueueItem, QueueStatus, Record, RecordId, ResolutionStrategy,
    Snapshot, SnapshotCounts, SyncConflict, SyncMetadata,
};
use crate::util::now_millis;

/// Default lifetime of a cache entry
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// A record skipped by a batch write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRecord {
    /// Position in the input batch
    pub index: usize,
    pub reason: String,
}

/// Outcome of a batch write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub written: usize,
    pub skipped: Vec<SkippedRecord>,
}

/// Record counts and queue state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub counts: SnapshotCounts,
    pub pending_queue: usize,
    pub failed_queue: usize,
    /// Most recent `_lastModified` across every collection
    pub last_modified: Option<i64>,
}

/// Text search over one collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchQuery {
    /// Case-insensitive substring matched against string fields
    pub text: Option<String>,
    /// Exact-match field filters
    pub filters: Vec<(String, Value)>,
    pub limit: Option<usize>,
}

/// Thread-safe handle to the local store.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl LocalStore {
    /// Open a store at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tracing::info!("Opening local store at {}", db_path.display());
        let mut db = Database::open(&db_path)?;
        let recovered = reset_in_flight(&mut db)?;
        if recovered > 0 {
            tracing::info!("Returned {recovered} interrupted queue items to pending");
        }
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    /// Filesystem path, `None` when in memory.
    pub fn db_path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    // -----------------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------------

    /// Validate, stamp and upsert one record.
    ///
    /// The new `_lastModified` is strictly greater than the stored one.
    pub async fn put(&self, collection: Collection, value: Value) -> Result<Record> {
        let mut record = Record::from_value(collection, value)?;

        let db = self.db.lock().await;
        let repo = SqliteRecordRepository::new(db.connection());
        let previous = previous_stamp(&repo, &record)?;
        record.touch(now_millis(), previous);
        repo.upsert(&record)?;

        tracing::debug!("Stored {} record {}", record.collection, record.id);
        Ok(record)
    }

    /// Upsert a record keeping its own `_lastModified` when it has one.
    ///
    /// Used for versions coming from the remote side.
    pub async fn put_preserving(&self, collection: Collection, value: Value) -> Result<Record> {
        let mut record = Record::from_value(collection, value)?;
        record.ensure_stamped(now_millis());

        let db = self.db.lock().await;
        SqliteRecordRepository::new(db.connection()).upsert(&record)?;
        Ok(record)
    }

    /// Validate and upsert many records in one transaction.
    ///
    /// Records failing validation are skipped and reported; a storage failure
    /// rolls the whole batch back.
    pub async fn put_batch(&self, collection: Collection, values: Vec<Value>) -> Result<BatchReport> {
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;
        let repo = SqliteRecordRepository::new(&tx);

        let now = now_millis();
        let mut report = BatchReport::default();
        for (index, value) in values.into_iter().enumerate() {
            let mut record = match Record::from_value(collection, value) {
                Ok(record) => record,
                Err(error) => {
                    skip(&mut report, index, &error);
                    continue;
                }
            };
            let previous = previous_stamp(&repo, &record)?;
            record.touch(now, previous);
            repo.upsert(&record)?;
            report.written += 1;
        }

        tx.commit()?;
        Ok(report)
    }

    /// Replace a collection's contents atomically.
    ///
    /// Incoming `_lastModified` values are kept so re-importing the same data
    /// is idempotent.
    pub async fn replace_all(
        &self,
        collection: Collection,
        values: Vec<Value>,
    ) -> Result<BatchReport> {
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;
        let repo = SqliteRecordRepository::new(&tx);

        repo.clear(collection)?;

        let now = now_millis();
        let mut report = BatchReport::default();
        for (index, value) in values.into_iter().enumerate() {
            let mut record = match Record::from_value(collection, value) {
                Ok(record) => record,
                Err(error) => {
                    skip(&mut report, index, &error);
                    continue;
                }
            };
            record.ensure_stamped(now);
            repo.upsert(&record)?;
            report.written += 1;
        }

        tx.commit()?;
        tracing::info!(
            "Replaced {collection}: {} written, {} skipped",
            report.written,
            report.skipped.len()
        );
        Ok(report)
    }

    /// Replace every collection, and optionally the sync metadata, in one
    /// transaction.
    pub async fn replace_snapshot(
        &self,
        snapshot: &Snapshot,
        metadata: Option<&SyncMetadata>,
    ) -> Result<SnapshotCounts> {
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;
        let repo = SqliteRecordRepository::new(&tx);

        let now = now_millis();
        for collection in Collection::ALL {
            repo.clear(collection)?;
        }
        for collection in Collection::ALL {
            for record in snapshot.records(collection) {
                let mut record = record.clone();
                record.ensure_stamped(now);
                repo.upsert(&record)?;
            }
        }
        if let Some(metadata) = metadata {
            SqliteSettingsRepository::new(&tx).set_json(SYNC_METADATA_KEY, metadata, now)?;
        }

        tx.commit()?;
        Ok(snapshot.counts())
    }

    /// All records of a collection in insertion order.
    pub async fn get_all(&self, collection: Collection) -> Result<Vec<Record>> {
        let db = self.db.lock().await;
        SqliteRecordRepository::new(db.connection()).list(collection)
    }

    /// Exact-match lookup on an indexed attribute.
    pub async fn get_by_index(
        &self,
        collection: Collection,
        index: &str,
        value: &Value,
    ) -> Result<Vec<Record>> {
        let db = self.db.lock().await;
        SqliteRecordRepository::new(db.connection()).list_by_index(collection, index, value)
    }

    pub async fn get(&self, collection: Collection, id: &RecordId) -> Result<Option<Record>> {
        let db = self.db.lock().await;
        SqliteRecordRepository::new(db.connection()).get(collection, id)
    }

    pub async fn delete(&self, collection: Collection, id: &RecordId) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteRecordRepository::new(db.connection()).delete(collection, id)
    }

    pub async fn clear(&self, collection: Collection) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteRecordRepository::new(db.connection()).clear(collection)
    }

    pub async fn count(&self, collection: Collection) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteRecordRepository::new(db.connection()).count(collection)
    }

    /// Full contents of the store as a snapshot (metadata left empty).
    pub async fn export_snapshot(&self) -> Result<Snapshot> {
        let db = self.db.lock().await;
        let repo = SqliteRecordRepository::new(db.connection());

        let mut snapshot = Snapshot::default();
        for collection in Collection::ALL {
            for record in repo.list(collection)? {
                snapshot.push(record);
            }
        }
        Ok(snapshot)
    }

    /// Case-insensitive text search with exact-match filters.
    pub async fn search(&self, collection: Collection, query: &SearchQuery) -> Result<Vec<Record>> {
        let needle = query
            .text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_lowercase);

        let records = self.get_all(collection).await?;
        let matches = records.into_iter().filter(|record| {
            let filters_match = query
                .filters
                .iter()
                .all(|(field, expected)| record.fields.get(field) == Some(expected));
            let text_match = needle.as_ref().is_none_or(|needle| {
                record.fields.values().any(|value| {
                    value
                        .as_str()
                        .is_some_and(|text| text.to_lowercase().contains(needle.as_str()))
                })
            });
            filters_match && text_match
        });

        Ok(match query.limit {
            Some(limit) => matches.take(limit).collect(),
            None => matches.collect(),
        })
    }

    /// Counts per collection plus queue state.
    pub async fn stats(&self) -> Result<StoreStats> {
        let db = self.db.lock().await;
        let records = SqliteRecordRepository::new(db.connection());
        let queue = SqliteQueueRepository::new(db.connection());

        let mut last_modified = None;
        for collection in Collection::ALL {
            last_modified = last_modified.max(records.latest_modification(collection)?);
        }

        Ok(StoreStats {
            counts: SnapshotCounts {
                agenda: records.count(Collection::Agenda)?,
                waitlist: records.count(Collection::Waitlist)?,
                expertises: records.count(Collection::Expertises)?,
                documents: records.count(Collection::Documents)?,
            },
            pending_queue: queue.count_status(QueueStatus::Pending)?,
            failed_queue: queue.count_status(QueueStatus::Failed)?,
            last_modified,
        })
    }

    /// Drop expertises modified before `cutoff` and agenda entries examined
    /// before it (Unix ms). Returns the number of records removed.
    pub async fn prune_older_than(&self, cutoff: i64) -> Result<usize> {
        let cutoff_date = Utc
            .timestamp_millis_opt(cutoff)
            .single()
            .ok_or_else(|| Error::InvalidInput(format!("invalid cutoff {cutoff}")))?
            .format("%Y-%m-%d")
            .to_string();

        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;
        let repo = SqliteRecordRepository::new(&tx);

        let mut removed =
            repo.prune_before(Collection::Expertises, None, &SqlValue::Integer(cutoff))?;
        for collection in [Collection::Agenda, Collection::Waitlist] {
            removed += repo.prune_before(
                collection,
                Some("date_examen"),
                &SqlValue::Text(cutoff_date.clone()),
            )?;
        }

        tx.commit()?;
        tracing::info!("Retention cleanup removed {removed} records older than {cutoff_date}");
        Ok(removed)
    }

    /// Apply the retention period of a device class.
    pub async fn apply_retention(&self, device_type: DeviceType, aggressive: bool) -> Result<usize> {
        let Some(days) = device_type.retention_days(aggressive) else {
            return Ok(0);
        };
        let cutoff = now_millis() - i64::from(days) * 24 * 60 * 60 * 1000;
        self.prune_older_than(cutoff).await
    }

    // -----------------------------------------------------------------------
    // Queue
    // -----------------------------------------------------------------------

    /// The whole queue in delivery order.
    pub async fn get_queue(&self) -> Result<Vec<MutationQueueItem>> {
        let db = self.db.lock().await;
        SqliteQueueRepository::new(db.connection()).load()
    }

    /// Replace the whole queue, preserving order and every field.
    pub async fn save_queue(&self, items: &[MutationQueueItem]) -> Result<()> {
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;
        SqliteQueueRepository::new(&tx).replace_all(items)?;
        tx.commit()?;
        Ok(())
    }

    /// Reset items left `in-flight` to pending, returning how many changed.
    pub async fn recover_in_flight(&self) -> Result<usize> {
        let mut db = self.db.lock().await;
        reset_in_flight(&mut db)
    }

    /// Load, modify and persist the queue as one atomic step.
    pub async fn update_queue<R>(
        &self,
        apply: impl FnOnce(&mut Vec<MutationQueueItem>) -> R,
    ) -> Result<R> {
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;
        let repo = SqliteQueueRepository::new(&tx);

        let mut items = repo.load()?;
        let result = apply(&mut items);
        repo.replace_all(&items)?;

        tx.commit()?;
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Sync metadata and configuration
    // -----------------------------------------------------------------------

    /// Load the sync metadata, creating and persisting it on first use.
    pub async fn load_metadata(&self, device_type: DeviceType) -> Result<SyncMetadata> {
        let db = self.db.lock().await;
        let repo = SqliteSettingsRepository::new(db.connection());

        if let Some(metadata) = repo.get_json::<SyncMetadata>(SYNC_METADATA_KEY)? {
            return Ok(metadata);
        }

        let metadata = SyncMetadata::new(device_type);
        repo.set_json(SYNC_METADATA_KEY, &metadata, now_millis())?;
        tracing::info!("Registered device {}", metadata.device_id);
        Ok(metadata)
    }

    pub async fn save_metadata(&self, metadata: &SyncMetadata) -> Result<()> {
        let db = self.db.lock().await;
        SqliteSettingsRepository::new(db.connection()).set_json(
            SYNC_METADATA_KEY,
            metadata,
            now_millis(),
        )
    }

    /// Read a configuration value.
    pub async fn get_config<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let db = self.db.lock().await;
        SqliteSettingsRepository::new(db.connection()).get_json(key)
    }

    /// Write a configuration value.
    pub async fn set_config<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let db = self.db.lock().await;
        SqliteSettingsRepository::new(db.connection()).set_json(key, value, now_millis())
    }

    /// Load, modify and persist a configuration value as one atomic step.
    ///
    /// A missing value starts from `T::default()`.
    pub async fn update_config<T, R>(&self, key: &str, apply: impl FnOnce(&mut T) -> R) -> Result<R>
    where
        T: Serialize + DeserializeOwned + Default,
    {
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;
        let repo = SqliteSettingsRepository::new(&tx);

        let mut value = repo.get_json::<T>(key)?.unwrap_or_default();
        let result = apply(&mut value);
        repo.set_json(key, &value, now_millis())?;

        tx.commit()?;
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Cache
    // -----------------------------------------------------------------------

    /// Cache data for `ttl` (one hour when `None`).
    pub async fn cache_put(&self, key: &str, data: &Value, ttl: Option<Duration>) -> Result<()> {
        let ttl = ttl.unwrap_or(DEFAULT_CACHE_TTL);
        let expires = now_millis()
            .saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX));

        let db = self.db.lock().await;
        CacheRepository::put(
            &SqliteSettingsRepository::new(db.connection()),
            key,
            data,
            expires,
            cache_category(key),
        )
    }

    /// Cached data, if present and unexpired.
    pub async fn cache_get(&self, key: &str) -> Result<Option<Value>> {
        let db = self.db.lock().await;
        CacheRepository::get(&SqliteSettingsRepository::new(db.connection()), key, now_millis())
    }

    pub async fn purge_expired_cache(&self) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteSettingsRepository::new(db.connection()).purge_expired(now_millis())
    }

    // -----------------------------------------------------------------------
    // Backups
    // -----------------------------------------------------------------------

    /// Store a backup of every collection, keeping the newest `keep`.
    pub async fn create_backup(&self, keep: usize) -> Result<BackupInfo> {
        let snapshot = self.export_snapshot().await?;
        let created_at = now_millis();
        let record_count = snapshot.record_count();

        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;
        let repo = SqliteBackupRepository::new(&tx);
        let id = repo.insert(created_at, record_count, &snapshot.to_value())?;
        repo.evict_keeping(keep)?;
        tx.commit()?;

        tracing::info!("Created backup {id} with {record_count} records");
        Ok(BackupInfo {
            id,
            created_at,
            record_count,
        })
    }

    /// Backups, newest first.
    pub async fn list_backups(&self) -> Result<Vec<BackupInfo>> {
        let db = self.db.lock().await;
        SqliteBackupRepository::new(db.connection()).list()
    }

    /// Replace the store's contents with a backup.
    pub async fn restore_backup(&self, id: i64) -> Result<SnapshotCounts> {
        let payload = {
            let db = self.db.lock().await;
            SqliteBackupRepository::new(db.connection()).load(id)?
        };
        let payload = payload.ok_or_else(|| Error::NotFound(format!("backup {id}")))?;

        let (snapshot, warnings) = Snapshot::from_value(payload)?;
        if !warnings.is_empty() {
            tracing::warn!("Backup {id} restored with {} warnings", warnings.len());
        }
        let counts = self.replace_snapshot(&snapshot, None).await?;
        tracing::info!("Restored backup {id}");
        Ok(counts)
    }

    // -----------------------------------------------------------------------
    // Conflict log
    // -----------------------------------------------------------------------

    /// Record a settled conflict.
    pub async fn record_conflict(
        &self,
        record: &Record,
        local_last_modified: i64,
        remote_last_modified: i64,
        strategy: ResolutionStrategy,
    ) -> Result<i64> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).record(
            record.id.as_str(),
            record.collection.as_str(),
            local_last_modified,
            remote_last_modified,
            now_millis(),
            strategy,
        )
    }

    /// Recently settled conflicts.
    pub async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).list(limit)
    }
}

fn reset_in_flight(db: &mut Database) -> Result<usize> {
    let tx = db.connection_mut().transaction()?;
    let repo = SqliteQueueRepository::new(&tx);
    let recovered = repo.count_status(QueueStatus::InFlight)?;
    if recovered == 0 {
        return Ok(0);
    }

    let mut items = repo.load()?;
    for item in items
        .iter_mut()
        .filter(|item| item.status == QueueStatus::InFlight)
    {
        item.status = QueueStatus::Pending;
    }
    repo.replace_all(&items)?;

    tx.commit()?;
    Ok(recovered)
}

fn previous_stamp(repo: &SqliteRecordRepository<'_>, record: &Record) -> Result<Option<i64>> {
    // Agenda and waitlist share storage, so an entry may be moving views
    let views: &[Collection] = match record.collection {
        Collection::Agenda | Collection::Waitlist => &[Collection::Agenda, Collection::Waitlist],
        Collection::Expertises => &[Collection::Expertises],
        Collection::Documents => &[Collection::Documents],
    };
    for view in views {
        if let Some(existing) = repo.get(*view, &record.id)? {
            return Ok(Some(existing.last_modified));
        }
    }
    Ok(None)
}

fn skip(report: &mut BatchReport, index: usize, error: &Error) {
    tracing::warn!("Skipping record {index}: {error}");
    report.skipped.push(SkippedRecord {
        index,
        reason: error.to_string(),
    });
}
