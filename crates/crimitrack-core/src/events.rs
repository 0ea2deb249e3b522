//! Typed events broadcast to the rest of the application

use serde::Serialize;
use tokio::sync::broadcast;

use crate::connectivity::ConnectivityState;
use crate::models::SnapshotCounts;

/// Default capacity for the event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Which sync path produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncKind {
    Import,
    Push,
}

/// Events emitted by the store, the queue, the monitor and the engine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SyncEvent {
    /// A sync operation finished
    SyncComplete {
        kind: SyncKind,
        success: bool,
        duration_ms: u64,
        records_count: usize,
    },
    /// A sync operation failed; nothing was written
    SyncError { kind: SyncKind, error: String },
    /// The connectivity snapshot changed
    ConnectivityChanged(ConnectivityState),
    /// The number of pending queue items changed
    QueueChanged { length: usize },
    /// Items reached the attempts ceiling and need user action
    QueueFailed { item_ids: Vec<String> },
    /// The store was replaced by an import
    DatabaseUpdated { counts: SnapshotCounts },
}

impl SyncEvent {
    /// Name used by the application's event router.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SyncComplete { .. } => "sync:complete",
            Self::SyncError { .. } => "sync:error",
            Self::ConnectivityChanged(_) => "connectivity:statechange",
            Self::QueueChanged { .. } => "queue:changed",
            Self::QueueFailed { .. } => "queue:failed",
            Self::DatabaseUpdated { .. } => "database:updated",
        }
    }
}

/// Cloneable handle to the event channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    event_tx: broadcast::Sender<SyncEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { event_tx }
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_tx.subscribe()
    }

    /// Emit an event; having no subscribers is not an error
    pub fn emit(&self, event: SyncEvent) {
        tracing::debug!("Emitting {}", event.name());
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(SyncEvent::QueueChanged { length: 3 });

        let event = rx.recv().await.unwrap();
        assert_eq!(event, SyncEvent::QueueChanged { length: 3 });
        assert_eq!(event.name(), "queue:changed");
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new();
        bus.emit(SyncEvent::SyncError {
            kind: SyncKind::Import,
            error: "boom".to_string(),
        });
    }

    #[test]
    fn test_event_names() {
        let event = SyncEvent::ConnectivityChanged(ConnectivityState::default());
        assert_eq!(event.name(), "connectivity:statechange");
        assert_eq!(
            SyncEvent::DatabaseUpdated {
                counts: SnapshotCounts::default()
            }
            .name(),
            "database:updated"
        );
    }
}
