//! Sync engine: snapshot import and export, queue push, conflict handling.

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use super::backoff::RetryPolicy;
use super::compression::encode_payload;
use super::conflict::{apply_resolution, last_writer_wins, ConflictPrompt, ResolvedVersion};
use super::snapshot::{validate, SnapshotInput};
use super::transport::{PushRequest, RemoteTransport, RemoteUpdate};
use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityLevel, ConnectivityMonitor, ReachabilityProbe};
use crate::db::BackupInfo;
use crate::error::{Error, Result};
use crate::events::{EventBus, SyncEvent, SyncKind};
use crate::metrics::MetricsRecorder;
use crate::models::{
    Conflict, DeviceType, MutationQueueItem, Priority, Snapshot, SnapshotCounts, SyncAction,
    SyncMetadata,
};
use crate::queue::MutationQueue;
use crate::store::LocalStore;
use crate::util::{duration_millis, now_millis, now_rfc3339};

/// Services the engine coordinates, built once at startup.
pub struct SyncServices<P> {
    pub store: LocalStore,
    pub queue: MutationQueue,
    pub monitor: Arc<ConnectivityMonitor<P>>,
    pub events: EventBus,
    pub metrics: MetricsRecorder,
}

/// Result of a successful import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub counts: SnapshotCounts,
    /// Records and sections dropped during validation
    pub warnings: Vec<String>,
    /// Backup taken before the import, if any
    pub backup: Option<BackupInfo>,
    pub bytes: usize,
    pub duration: Duration,
}

/// Why a push did not start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AutoModeOff,
    /// Connectivity below what pushing requires
    Unreachable(ConnectivityLevel),
    InFlight,
}

/// Conflicts returned with a push and what became of them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConflictSummary {
    pub resolved: usize,
    /// Dismissed by the user or not storable
    pub unresolved: usize,
}

/// Result of one push attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Skipped(SkipReason),
    /// Nothing pending
    Idle,
    Delivered {
        sent: usize,
        updates_applied: usize,
        conflicts: ConflictSummary,
        /// Pending items left after this batch
        remaining: usize,
    },
    Failed {
        error: String,
        /// Items put back for another attempt
        retried: usize,
        /// Items that reached the attempts ceiling
        exhausted: usize,
        retry_after: Duration,
    },
}

/// Totals over a push loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushSummary {
    pub batches: usize,
    pub delivered: usize,
    pub failures: usize,
    pub exhausted: usize,
}

/// Clears a single-flight flag when dropped.
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives pull, push and conflict resolution.
pub struct SyncEngine<T, P, C> {
    store: LocalStore,
    queue: MutationQueue,
    monitor: Arc<ConnectivityMonitor<P>>,
    events: EventBus,
    metrics: MetricsRecorder,
    transport: T,
    prompt: C,
    config: SyncConfig,
    retry_policy: RetryPolicy,
    import_in_flight: AtomicBool,
    push_in_flight: AtomicBool,
}

impl<T, P, C> SyncEngine<T, P, C>
where
    T: RemoteTransport,
    P: ReachabilityProbe,
    C: ConflictPrompt,
{
    pub fn new(services: SyncServices<P>, transport: T, prompt: C, config: SyncConfig) -> Self {
        Self {
            store: services.store,
            queue: services.queue,
            monitor: services.monitor,
            events: services.events,
            metrics: services.metrics,
            transport,
            prompt,
            retry_policy: RetryPolicy::from_config(&config),
            config,
            import_in_flight: AtomicBool::new(false),
            push_in_flight: AtomicBool::new(false),
        }
    }

    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub const fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    pub fn is_importing(&self) -> bool {
        self.import_in_flight.load(Ordering::Acquire)
    }

    pub fn is_pushing(&self) -> bool {
        self.push_in_flight.load(Ordering::Acquire)
    }

    // -----------------------------------------------------------------------
    // Import
    // -----------------------------------------------------------------------

    /// Import a snapshot file handed over by the file picker.
    ///
    /// Returns `Ok(None)` when another import is already running.
    pub async fn import_file(&self, path: impl AsRef<Path> + Send) -> Result<Option<ImportReport>> {
        self.import_with(SnapshotInput::from_path(path, self.config.max_file_size))
            .await
    }

    /// Import snapshot bytes that are already in memory.
    pub async fn import_bytes(&self, input: SnapshotInput) -> Result<Option<ImportReport>> {
        self.import_with(async { Ok::<_, Error>(input) }).await
    }

    /// Fetch the canonical export from the remote and import it.
    pub async fn import_remote(&self) -> Result<Option<ImportReport>> {
        self.import_with(async {
            let remote = self.transport.fetch_snapshot().await?;
            Ok::<_, Error>(SnapshotInput {
                bytes: remote.bytes,
                file_name: None,
                content_type: remote.content_type,
                source: remote.source,
            })
        })
        .await
    }

    async fn import_with(
        &self,
        load: impl Future<Output = Result<SnapshotInput>>,
    ) -> Result<Option<ImportReport>> {
        let Some(_guard) = FlightGuard::acquire(&self.import_in_flight) else {
            tracing::debug!("Import already running, ignoring request");
            return Ok(None);
        };

        let started = Instant::now();
        let result = match load.await {
            Ok(input) => self.run_import(input, started).await,
            Err(error) => Err(error),
        };

        match result {
            Ok(report) => {
                tracing::info!(
                    "Imported {} records in {} ms ({} warnings)",
                    report.counts.total(),
                    duration_millis(report.duration),
                    report.warnings.len()
                );
                self.metrics
                    .record(true, report.duration, report.bytes as u64)
                    .await;
                self.events.emit(SyncEvent::SyncComplete {
                    kind: SyncKind::Import,
                    success: true,
                    duration_ms: duration_millis(report.duration),
                    records_count: report.counts.total(),
                });
                self.events.emit(SyncEvent::DatabaseUpdated {
                    counts: report.counts,
                });
                Ok(Some(report))
            }
            Err(error) => {
                tracing::warn!("Import failed: {error}");
                self.metrics.record(false, started.elapsed(), 0).await;
                self.events.emit(SyncEvent::SyncError {
                    kind: SyncKind::Import,
                    error: error.to_string(),
                });
                Err(error)
            }
        }
    }

    async fn run_import(&self, input: SnapshotInput, started: Instant) -> Result<ImportReport> {
        let validated = validate(&input, &self.config)?;
        for warning in &validated.warnings {
            tracing::warn!("Dropped during import: {warning}");
        }

        let backup = if self.config.backup_before_import {
            match self.store.create_backup(self.config.backups_to_keep).await {
                Ok(info) => Some(info),
                Err(error) => {
                    tracing::warn!("Pre-import backup failed, continuing: {error}");
                    None
                }
            }
        } else {
            None
        };

        let mut metadata = self.metadata().await?;
        metadata.last_sync_timestamp = Some(now_millis());
        metadata.import_source = Some(input.source.clone());
        metadata.import_time = Some(now_rfc3339());
        metadata.snapshot_metadata = Value::Object(validated.snapshot.metadata.clone());

        let counts = self
            .store
            .replace_snapshot(&validated.snapshot, Some(&metadata))
            .await?;

        Ok(ImportReport {
            counts,
            warnings: validated.warnings,
            backup,
            bytes: input.bytes.len(),
            duration: started.elapsed(),
        })
    }

    // -----------------------------------------------------------------------
    // Export
    // -----------------------------------------------------------------------

    /// Full store in the inbound snapshot format.
    pub async fn export_snapshot(&self) -> Result<Snapshot> {
        let metadata = self.metadata().await?;
        let mut snapshot = self.store.export_snapshot().await?;
        snapshot
            .metadata
            .insert("exportTime".to_string(), Value::String(now_rfc3339()));
        snapshot
            .metadata
            .insert("exportedBy".to_string(), Value::String(metadata.device_id));
        snapshot.metadata.insert(
            "deviceType".to_string(),
            Value::String(metadata.device_type.to_string()),
        );
        Ok(snapshot)
    }

    /// Export rendered as pretty JSON.
    pub async fn export_json(&self) -> Result<String> {
        let snapshot = self.export_snapshot().await?;
        Ok(serde_json::to_string_pretty(&snapshot.to_value())?)
    }

    // -----------------------------------------------------------------------
    // Push
    // -----------------------------------------------------------------------

    fn push_gate(&self) -> Option<SkipReason> {
        let state = self.monitor.state();
        if !state.auto_mode {
            return Some(SkipReason::AutoModeOff);
        }
        let required = if self.config.require_server_for_push {
            ConnectivityLevel::OnlineServer
        } else {
            ConnectivityLevel::OnlinePeer
        };
        let level = state.level();
        (level < required).then_some(SkipReason::Unreachable(level))
    }

    /// Send one batch from the front of the queue.
    ///
    /// A transport failure is reported as [`PushOutcome::Failed`]; `Err` is
    /// reserved for local storage failures.
    pub async fn push_once(&self) -> Result<PushOutcome> {
        if let Some(reason) = self.push_gate() {
            tracing::debug!("Push skipped: {reason:?}");
            return Ok(PushOutcome::Skipped(reason));
        }
        let Some(_guard) = FlightGuard::acquire(&self.push_in_flight) else {
            return Ok(PushOutcome::Skipped(SkipReason::InFlight));
        };

        // Anything still in flight was orphaned by an interrupted push
        self.queue.recover_in_flight().await?;

        let mut metadata = self.metadata().await?;
        let batch = self.queue.dequeue_batch(self.config.batch_size).await?;
        if batch.is_empty() {
            return Ok(PushOutcome::Idle);
        }

        let request = PushRequest {
            device_id: metadata.device_id.clone(),
            device_type: metadata.device_type,
            timestamp: now_millis(),
            items: batch,
        };
        let json = match serde_json::to_string(&request) {
            Ok(json) => json,
            Err(error) => {
                self.queue.requeue_front(request.items).await?;
                return Err(error.into());
            }
        };
        let payload = encode_payload(json, self.config.compression_threshold);

        let started = Instant::now();
        tracing::info!(
            "Pushing {} items ({} bytes{})",
            request.items.len(),
            payload.wire_len(),
            if payload.compressed { ", compressed" } else { "" }
        );

        match self.transport.push(&metadata, &payload).await {
            Ok(response) => {
                let ids: Vec<String> = request.items.iter().map(|item| item.id.clone()).collect();
                let sent = self.queue.acknowledge(&ids).await?;
                metadata.last_sync_timestamp = Some(now_millis());
                if response.sync_token.is_some() {
                    metadata.sync_token = response.sync_token;
                }
                self.store.save_metadata(&metadata).await?;

                let updates_applied = self.apply_updates(response.updates).await?;
                let conflicts = self.resolve_conflicts(response.conflicts).await?;
                let remaining = self.queue.pending_len().await?;

                let elapsed = started.elapsed();
                self.metrics
                    .record(true, elapsed, payload.wire_len() as u64)
                    .await;
                self.events.emit(SyncEvent::SyncComplete {
                    kind: SyncKind::Push,
                    success: true,
                    duration_ms: duration_millis(elapsed),
                    records_count: sent,
                });

                Ok(PushOutcome::Delivered {
                    sent,
                    updates_applied,
                    conflicts,
                    remaining,
                })
            }
            Err(error) => {
                tracing::warn!("Push failed: {error}");
                let (retried, exhausted) = self.split_for_retry(request.items);
                let retry_after = retried
                    .first()
                    .map_or(self.retry_policy.base_delay, |item| {
                        self.retry_policy.delay_for(item.attempts)
                    });
                let outcome = PushOutcome::Failed {
                    error: error.to_string(),
                    retried: retried.len(),
                    exhausted: exhausted.len(),
                    retry_after,
                };

                self.queue.requeue_front(retried).await?;
                self.queue.mark_failed(exhausted).await?;

                self.metrics.record(false, started.elapsed(), 0).await;
                self.events.emit(SyncEvent::SyncError {
                    kind: SyncKind::Push,
                    error: error.to_string(),
                });
                Ok(outcome)
            }
        }
    }

    /// Push until the queue is drained, the gate closes or every remaining
    /// item is exhausted, pausing for the cooldown or backoff in between.
    pub async fn run_push_loop(&self) -> Result<PushSummary> {
        let mut summary = PushSummary::default();

        loop {
            let delay = match self.push_once().await? {
                PushOutcome::Skipped(_) | PushOutcome::Idle => break,
                PushOutcome::Delivered {
                    sent, remaining, ..
                } => {
                    summary.batches += 1;
                    summary.delivered += sent;
                    if remaining == 0 {
                        break;
                    }
                    self.config.cooldown()
                }
                PushOutcome::Failed {
                    retried,
                    exhausted,
                    retry_after,
                    ..
                } => {
                    summary.batches += 1;
                    summary.failures += 1;
                    summary.exhausted += exhausted;
                    if retried == 0 && self.queue.pending_len().await? == 0 {
                        break;
                    }
                    retry_after
                }
            };
            tokio::time::sleep(delay).await;
        }

        tracing::info!(
            "Push loop finished: {} delivered, {} exhausted",
            summary.delivered,
            summary.exhausted
        );
        Ok(summary)
    }

    fn split_for_retry(
        &self,
        batch: Vec<MutationQueueItem>,
    ) -> (Vec<MutationQueueItem>, Vec<MutationQueueItem>) {
        batch
            .into_iter()
            .map(|mut item| {
                item.attempts += 1;
                item
            })
            .partition(|item| self.retry_policy.allows_retry(item.attempts))
    }

    async fn apply_updates(&self, updates: Vec<RemoteUpdate>) -> Result<usize> {
        let mut applied = 0;
        for update in updates {
            match self.store.put_preserving(update.collection, update.data).await {
                Ok(_) => applied += 1,
                Err(Error::Validation(message)) => {
                    tracing::warn!("Ignoring invalid remote update: {message}");
                }
                Err(error) => return Err(error),
            }
        }
        Ok(applied)
    }

    // -----------------------------------------------------------------------
    // Conflicts
    // -----------------------------------------------------------------------

    async fn resolve_conflicts(&self, conflicts: Vec<Conflict>) -> Result<ConflictSummary> {
        let mut summary = ConflictSummary::default();

        for conflict in conflicts {
            let resolved = if conflict.auto_resolvable {
                Some(last_writer_wins(&conflict))
            } else {
                self.prompt
                    .choose(&conflict)
                    .await
                    .map(|resolution| apply_resolution(&conflict, resolution, now_millis()))
            };

            let Some(resolved) = resolved else {
                tracing::warn!("Conflict {} left unresolved", conflict.id);
                summary.unresolved += 1;
                continue;
            };

            match self.settle(&conflict, resolved).await {
                Ok(()) => summary.resolved += 1,
                Err(Error::Validation(message)) => {
                    tracing::warn!("Conflict {} not storable: {message}", conflict.id);
                    summary.unresolved += 1;
                }
                Err(error) => return Err(error),
            }
        }

        Ok(summary)
    }

    /// Stamp and write the chosen version, log it and queue it for the server.
    async fn settle(&self, conflict: &Conflict, resolved: ResolvedVersion) -> Result<()> {
        let record = self.store.put(conflict.collection, resolved.record).await?;
        self.store
            .record_conflict(
                &record,
                conflict.local_timestamp(),
                conflict.remote_timestamp(),
                resolved.strategy,
            )
            .await?;

        if resolved.propagate {
            self.queue
                .enqueue(
                    SyncAction::ResolveConflict {
                        conflict_id: conflict.id.clone(),
                        collection: record.collection,
                        record: record.to_value(),
                    },
                    Priority::Urgent,
                )
                .await?;
        }

        tracing::info!(
            "Conflict {} on {} settled with {}",
            conflict.id,
            record.id,
            resolved.strategy
        );
        Ok(())
    }

    async fn metadata(&self) -> Result<SyncMetadata> {
        self.store.load_metadata(DeviceType::detect()).await
    }
}
