//! Data models for CrimiTrack

mod queue_item;
mod record;
mod snapshot;
mod sync_conflict;
mod sync_metadata;

pub use queue_item::{MutationQueueItem, Priority, QueueStatus, SyncAction};
pub use record::{
    normalize_date, value_stamp, value_timestamp, Collection, Record, RecordId, LAST_MODIFIED_KEY,
    WAITLIST_FLAG_KEY,
};
pub use snapshot::{Snapshot, SnapshotCounts};
pub use sync_conflict::{Conflict, Resolution, ResolutionStrategy, SyncConflict};
pub use sync_metadata::{DeviceType, SyncMetadata};
