/*
    core_oplog - Operation log engine

    The local half of offline-first sync. Handles:
    - The operation model and versioned schema decoding
    - Vector clock bookkeeping
    - Capture of local state changes into the durable log
    - Replay: conversion, bulk hydration, LWW conflict resolution
*/

pub mod apply;
pub mod capture;
pub mod clock;
pub mod model;
pub mod store;

#[cfg(test)]
pub mod tests;

// Re-export commonly used types
pub use apply::{bulk_apply, convert_op_to_action, Reducer, ReducerChain, StateContainer};
pub use clock::{VectorClock, VectorClockComparison, VectorClockTracker};
pub use model::{Action, ActionType, AppState, EntityType, OpType, Operation};
pub use store::{OpSource, OperationLogStore, StoreError, StoreResult};

/// Wall clock in milliseconds since the Unix epoch
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
