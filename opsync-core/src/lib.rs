//! opsync-core
//!
//! Offline-first sync built on an append-only operation log. Local state
//! changes are captured as operations, replayed into state on other
//! devices, and reconciled with last-writer-wins when edits are concurrent.

pub mod config;
pub mod core_crypto;
pub mod core_oplog;
pub mod core_sync;
pub mod logging;
pub mod metrics;
pub mod test_utils;

pub use config::{Config, ConfigError};
pub use core_crypto::{CryptoError, CryptoResult, OperationEncryptor};
pub use core_oplog::{
    Action, ActionType, AppState, EntityType, OpSource, OpType, Operation, OperationLogStore,
    StateContainer, StoreError, StoreResult, VectorClock, VectorClockTracker,
};
pub use core_sync::{KeyRotationError, KeyRotationOrchestrator, SyncError, SyncService, SyncTransport};
pub use logging::{init_logging, LogLevel};
