/*
    store - Durable storage for the operation log

    - commit_log: checksummed append-only record file
    - op_log_store: operation index, sync status, persisted vector clock
    - snapshot: state cache snapshots used for fast startup and compaction
*/

pub mod commit_log;
pub mod errors;
pub mod op_log_store;
pub mod snapshot;

pub use commit_log::{CommitLog, LogEntry};
pub use errors::{StoreError, StoreResult, ValidationError};
pub use op_log_store::{CompactionStats, OpSource, OperationLogEntry, OperationLogStore};
pub use snapshot::{SnapshotManager, SnapshotMetadata, StateCache};
