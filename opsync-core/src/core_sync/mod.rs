/*
    core_sync - Remote half of offline-first sync

    Handles:
    - The transport contract and wire types
    - Incremental upload and download of operations
    - Encryption password rotation with snapshot replacement
*/

pub mod errors;
pub mod key_rotation;
pub mod sync_service;
pub mod transport;

// Re-export commonly used types
pub use errors::{KeyRotationError, SyncError, SyncResult, TransportError, TransportResult};
pub use key_rotation::{
    ClientIdProvider, KeyRotationOrchestrator, KeyRotationSummary, StateSource, StaticClientId,
};
pub use sync_service::{DownloadSummary, SyncService, UploadSummary, DEFAULT_BATCH_SIZE};
pub use transport::{
    PrivateSyncConfig, SnapshotReason, SnapshotUpload, SyncTransport, TransportCapabilities,
};
