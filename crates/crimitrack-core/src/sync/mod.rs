//! Snapshot pull, queue push and conflict resolution

mod backoff;
mod compression;
mod conflict;
mod engine;
mod snapshot;
mod transport;

pub use backoff::RetryPolicy;
pub use compression::{compress, decompress, encode_payload, EncodedPayload};
pub use conflict::{apply_resolution, last_writer_wins, merge, ConflictPrompt, ResolvedVersion};
pub use engine::{
    ConflictSummary, ImportReport, PushOutcome, PushSummary, SkipReason, SyncEngine,
    SyncServices,
};
pub use snapshot::{check_input, validate, SnapshotInput, ValidatedSnapshot};
pub use transport::{
    HttpTransport, PushRequest, RemoteSnapshot, RemoteTransport, RemoteUpdate, SyncResponse,
};
