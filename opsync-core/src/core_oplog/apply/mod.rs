//! Replay side of the operation log
//!
//! Converts stored operations back into actions and folds them through the
//! reducer chain, including the last-write-wins conflict machinery.

pub mod conflict;
pub mod container;
pub mod converter;
pub mod entity_reducer;
pub mod hydration;
pub mod lww;
pub mod reducer;

pub use conflict::{
    compare_for_lww, detect_conflicts, resolve_conflict, ConflictResolution, ConflictScan,
    EntityConflict, LwwSide, LwwWinner,
};
pub use container::{HydrationGuard, HydrationState, StateContainer};
pub use converter::{convert_op_to_action, convert_op_to_action_with};
pub use entity_reducer::EntityReducer;
pub use hydration::{bulk_apply, bulk_apply_with, DEFAULT_MAX_HYDRATION_BATCH};
pub use lww::{LwwResolver, MODIFIED_FIELD};
pub use reducer::{MetaReducer, Reducer, ReducerChain};
