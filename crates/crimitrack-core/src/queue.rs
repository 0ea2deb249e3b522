//! Durable priority-ordered queue of outbound changes.
//!
//! Pending items are kept in ascending priority, FIFO within a priority.
//! Items handed to a push stay stored as `in-flight` until the remote
//! acknowledges them. Failed items stay in the queue with status `failed`
//! until the user retries or discards them.

use crate::error::{Error, Result};
use crate::events::{EventBus, SyncEvent};
use crate::models::{MutationQueueItem, Priority, QueueStatus, SyncAction};
use crate::store::LocalStore;

/// Queue service over the local store.
#[derive(Clone)]
pub struct MutationQueue {
    store: LocalStore,
    events: EventBus,
    device_id: String,
}

impl MutationQueue {
    pub fn new(store: LocalStore, events: EventBus, device_id: impl Into<String>) -> Self {
        Self {
            store,
            events,
            device_id: device_id.into(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Persist a new item and return its id.
    pub async fn enqueue(&self, action: SyncAction, priority: Priority) -> Result<String> {
        let item = MutationQueueItem::new(action, priority, self.device_id.clone());
        let id = item.id.clone();

        let pending = self
            .store
            .update_queue(|items| {
                insert_by_priority(items, item);
                pending_count(items)
            })
            .await?;

        tracing::debug!("Enqueued {id} with priority {priority:?}");
        self.events.emit(SyncEvent::QueueChanged { length: pending });
        Ok(id)
    }

    /// Claim up to `n` pending items in delivery order.
    ///
    /// Claimed items stay stored with status `in-flight` until they are
    /// acknowledged, requeued or marked failed.
    pub async fn dequeue_batch(&self, n: usize) -> Result<Vec<MutationQueueItem>> {
        let (batch, pending) = self
            .store
            .update_queue(|items| {
                let mut batch = Vec::new();
                for item in items.iter_mut().filter(|item| item.is_pending()).take(n) {
                    item.status = QueueStatus::InFlight;
                    batch.push(item.clone());
                }
                (batch, pending_count(items))
            })
            .await?;

        if !batch.is_empty() {
            tracing::debug!("Dequeued {} items", batch.len());
            self.events.emit(SyncEvent::QueueChanged { length: pending });
        }
        Ok(batch)
    }

    /// Drop in-flight items the remote confirmed, returning how many were
    /// removed.
    pub async fn acknowledge(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let removed = self
            .store
            .update_queue(|items| {
                let before = items.len();
                items.retain(|item| !claimed_by(item, ids));
                before - items.len()
            })
            .await?;

        tracing::debug!("Acknowledged {removed} items");
        Ok(removed)
    }

    /// Put items back at the front as pending, keeping their relative order.
    pub async fn requeue_front(&self, batch: Vec<MutationQueueItem>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let ids = item_ids(&batch);
        let pending = self
            .store
            .update_queue(|items| {
                items.retain(|item| !claimed_by(item, &ids));
                let mut restored: Vec<_> = batch
                    .into_iter()
                    .map(|mut item| {
                        item.status = QueueStatus::Pending;
                        item
                    })
                    .collect();
                restored.append(items);
                // Stable: requeued items stay ahead within their priority
                restored.sort_by_key(|item| (item.status == QueueStatus::Failed, item.priority));
                *items = restored;
                pending_count(items)
            })
            .await?;

        self.events.emit(SyncEvent::QueueChanged { length: pending });
        Ok(())
    }

    /// Keep items with terminal status `failed` and surface them.
    pub async fn mark_failed(&self, failed: Vec<MutationQueueItem>) -> Result<()> {
        if failed.is_empty() {
            return Ok(());
        }

        let ids = item_ids(&failed);
        self.store
            .update_queue(|items| {
                items.retain(|item| !claimed_by(item, &ids));
                items.extend(failed.into_iter().map(|mut item| {
                    item.status = QueueStatus::Failed;
                    item
                }));
            })
            .await?;

        tracing::warn!("{} queue items exhausted their attempts", ids.len());
        self.events.emit(SyncEvent::QueueFailed { item_ids: ids });
        Ok(())
    }

    /// Return items stranded in flight by an interrupted push to pending.
    pub async fn recover_in_flight(&self) -> Result<usize> {
        let recovered = self.store.recover_in_flight().await?;
        if recovered > 0 {
            let pending = self.pending_len().await?;
            self.events.emit(SyncEvent::QueueChanged { length: pending });
        }
        Ok(recovered)
    }

    /// Number of items awaiting delivery.
    pub async fn pending_len(&self) -> Result<usize> {
        Ok(pending_count(&self.store.get_queue().await?))
    }

    /// Every item, in delivery order.
    pub async fn items(&self) -> Result<Vec<MutationQueueItem>> {
        self.store.get_queue().await
    }

    /// Items waiting for user action.
    pub async fn failed_items(&self) -> Result<Vec<MutationQueueItem>> {
        let items = self.store.get_queue().await?;
        Ok(items
            .into_iter()
            .filter(|item| item.status == QueueStatus::Failed)
            .collect())
    }

    /// Give a failed item a fresh set of attempts.
    pub async fn retry_failed(&self, id: &str) -> Result<()> {
        let outcome = self
            .store
            .update_queue(|items| {
                let position = items
                    .iter()
                    .position(|item| item.id == id && item.status == QueueStatus::Failed)?;
                let mut item = items.remove(position);
                item.status = QueueStatus::Pending;
                item.attempts = 0;
                insert_by_priority(items, item);
                Some(pending_count(items))
            })
            .await?;

        let pending = outcome.ok_or_else(|| Error::NotFound(format!("failed queue item {id}")))?;
        tracing::info!("Retrying failed queue item {id}");
        self.events.emit(SyncEvent::QueueChanged { length: pending });
        Ok(())
    }

    /// Drop a failed item for good.
    pub async fn discard_failed(&self, id: &str) -> Result<()> {
        let removed = self
            .store
            .update_queue(|items| {
                let before = items.len();
                items.retain(|item| !(item.id == id && item.status == QueueStatus::Failed));
                before != items.len()
            })
            .await?;

        if !removed {
            return Err(Error::NotFound(format!("failed queue item {id}")));
        }
        tracing::info!("Discarded failed queue item {id}");
        Ok(())
    }

    /// Remove completed items, returning how many were removed.
    pub async fn purge_completed(&self) -> Result<usize> {
        self.store
            .update_queue(|items| {
                let before = items.len();
                items.retain(|item| item.status != QueueStatus::Completed);
                before - items.len()
            })
            .await
    }
}

/// Insert after the last deliverable item of the same or a more urgent
/// priority. Failed items always trail the delivery order.
fn insert_by_priority(items: &mut Vec<MutationQueueItem>, item: MutationQueueItem) {
    let position = items
        .iter()
        .position(|existing| {
            existing.status == QueueStatus::Failed || existing.priority > item.priority
        })
        .unwrap_or(items.len());
    items.insert(position, item);
}

fn claimed_by(item: &MutationQueueItem, ids: &[String]) -> bool {
    item.status == QueueStatus::InFlight && ids.contains(&item.id)
}

fn item_ids(items: &[MutationQueueItem]) -> Vec<String> {
    items.iter().map(|item| item.id.clone()).collect()
}

fn pending_count(items: &[MutationQueueItem]) -> usize {
    items.iter().filter(|item| item.is_pending()).count()
}
