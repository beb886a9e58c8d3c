/*
    tracker.rs - Local bookkeeping of the merged vector clock

    The tracker holds the clock that summarizes every operation this
    device knows about, local or remote. Capture reads it to stamp new
    operations; hydration merges remote clocks into it. Every change is
    written through to a ClockStore.
*/

use super::vector_clock::VectorClock;
use crate::core_oplog::store::errors::{StoreError, StoreResult};
use std::sync::{Arc, Mutex, PoisonError};

fn handle_poison<T>(_err: PoisonError<T>) -> StoreError {
    StoreError::Storage("Lock poisoned: a thread panicked while holding the clock".to_string())
}

/// Durable home of the merged vector clock
pub trait ClockStore: Send + Sync {
    /// Load the persisted clock; empty if none was saved yet
    fn load_clock(&self) -> StoreResult<VectorClock>;

    /// Replace the persisted clock
    fn save_clock(&self, clock: &VectorClock) -> StoreResult<()>;
}

/// Clock store that keeps nothing on disk
#[derive(Debug, Default)]
pub struct MemoryClockStore {
    clock: Mutex<VectorClock>,
}

impl ClockStore for MemoryClockStore {
    fn load_clock(&self) -> StoreResult<VectorClock> {
        Ok(self.clock.lock().map_err(handle_poison)?.clone())
    }

    fn save_clock(&self, clock: &VectorClock) -> StoreResult<()> {
        *self.clock.lock().map_err(handle_poison)? = clock.clone();
        Ok(())
    }
}

/// Maintains the merged per-client counters for this device
pub struct VectorClockTracker {
    store: Arc<dyn ClockStore>,
    clock: Mutex<VectorClock>,
}

impl VectorClockTracker {
    /// Load the persisted clock from `store`
    pub fn new(store: Arc<dyn ClockStore>) -> StoreResult<Self> {
        let clock = store.load_clock()?;
        Ok(VectorClockTracker {
            store,
            clock: Mutex::new(clock),
        })
    }

    /// Merged clock over all known operations
    pub fn current_clock(&self) -> StoreResult<VectorClock> {
        Ok(self.clock.lock().map_err(handle_poison)?.clone())
    }

    /// Clock for a new local operation: current clock with `client_id` incremented.
    ///
    /// The tracker advances to the returned clock and persists it.
    pub fn next_clock_for(&self, client_id: &str) -> StoreResult<VectorClock> {
        let mut clock = self.clock.lock().map_err(handle_poison)?;
        let next = clock.incremented(client_id);
        self.store.save_clock(&next)?;
        *clock = next.clone();
        Ok(next)
    }

    /// Preview of `next_clock_for` that does not advance the tracker
    pub fn peek_next_clock(&self, client_id: &str) -> StoreResult<VectorClock> {
        Ok(self.current_clock()?.incremented(client_id))
    }

    /// Merge a clock received from a remote operation (per-key max) and persist
    pub fn merge_remote(&self, remote: &VectorClock) -> StoreResult<VectorClock> {
        self.merge_all(std::iter::once(remote))
    }

    /// Merge several remote clocks with a single write
    pub fn merge_all<'a>(
        &self,
        remotes: impl IntoIterator<Item = &'a VectorClock>,
    ) -> StoreResult<VectorClock> {
        let mut clock = self.clock.lock().map_err(handle_poison)?;
        let mut merged = clock.clone();
        for remote in remotes {
            merged.merge(remote);
        }
        if merged != *clock {
            self.store.save_clock(&merged)?;
            *clock = merged.clone();
        }
        Ok(merged)
    }

    /// Record a clock that was already persisted by the caller
    pub(crate) fn observe(&self, clock: &VectorClock) -> StoreResult<()> {
        self.clock.lock().map_err(handle_poison)?.merge(clock);
        Ok(())
    }
}
