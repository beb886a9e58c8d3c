/*
    container.rs - Owner of the current application state

    StateContainer serializes every transition through the reducer chain:
    one `dispatch` for a single action, one `bulk_apply` for a batch of
    stored operations. While a batch is applied the shared HydrationState
    is raised, so the capture layer stays silent even for actions that
    were not marked remote.
*/

use super::hydration::{bulk_apply_with, DEFAULT_MAX_HYDRATION_BATCH};
use super::reducer::Reducer;
use crate::core_oplog::model::{Action, ActionAliasTable, AppState, Operation};
use crate::core_oplog::store::errors::{StoreError, StoreResult};
use crate::core_oplog::store::{OpSource, OperationLogStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

fn handle_poison<T>(_err: PoisonError<T>) -> StoreError {
    StoreError::Storage("Lock poisoned: a thread panicked while reducing state".to_string())
}

/// Flag shared between the container and the capture layer
#[derive(Debug, Default)]
pub struct HydrationState {
    applying: AtomicBool,
}

impl HydrationState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// True while stored or remote operations are being replayed
    pub fn is_applying_remote_ops(&self) -> bool {
        self.applying.load(Ordering::Acquire)
    }

    /// Raise the flag until the guard is dropped
    pub fn begin(&self) -> HydrationGuard<'_> {
        self.applying.store(true, Ordering::Release);
        HydrationGuard { state: self }
    }
}

pub struct HydrationGuard<'a> {
    state: &'a HydrationState,
}

impl Drop for HydrationGuard<'_> {
    fn drop(&mut self) {
        self.state.applying.store(false, Ordering::Release);
    }
}

pub struct StateContainer {
    state: Mutex<Arc<AppState>>,
    reducer: Box<dyn Reducer>,
    hydration: Arc<HydrationState>,
    aliases: ActionAliasTable,
    max_hydration_batch: usize,
}

impl StateContainer {
    pub fn new(initial: AppState, reducer: impl Reducer + 'static) -> Self {
        Self::with_hydration(initial, reducer, HydrationState::new())
    }

    /// Share `hydration` with a capture layer inside `reducer`
    pub fn with_hydration(
        initial: AppState,
        reducer: impl Reducer + 'static,
        hydration: Arc<HydrationState>,
    ) -> Self {
        StateContainer {
            state: Mutex::new(Arc::new(initial)),
            reducer: Box::new(reducer),
            hydration,
            aliases: ActionAliasTable::default(),
            max_hydration_batch: DEFAULT_MAX_HYDRATION_BATCH,
        }
    }

    pub fn with_aliases(mut self, aliases: ActionAliasTable) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn with_max_hydration_batch(mut self, max: usize) -> Self {
        self.max_hydration_batch = max;
        self
    }

    pub fn hydration(&self) -> Arc<HydrationState> {
        self.hydration.clone()
    }

    /// Current state snapshot
    pub fn state(&self) -> StoreResult<Arc<AppState>> {
        Ok(self.state.lock().map_err(handle_poison)?.clone())
    }

    /// Run one action through the chain
    pub fn dispatch(&self, action: &Action) -> StoreResult<Arc<AppState>> {
        let mut current = self.state.lock().map_err(handle_poison)?;
        let next = self.reducer.reduce(current.clone(), action)?;
        *current = next.clone();
        Ok(next)
    }

    /// Apply a batch of decrypted operations as one transition.
    ///
    /// On error the state is left as it was before the batch.
    pub fn bulk_apply(&self, ops: &[Operation]) -> StoreResult<Arc<AppState>> {
        let mut current = self.state.lock().map_err(handle_poison)?;
        if ops.len() > self.max_hydration_batch {
            tracing::warn!(
                count = ops.len(),
                threshold = self.max_hydration_batch,
                "Hydration batch exceeds configured maximum"
            );
        }

        let _guard = self.hydration.begin();
        let next = bulk_apply_with(ops, current.clone(), self.reducer.as_ref(), &self.aliases)?;
        *current = next.clone();
        Ok(next)
    }

    /// Replace the whole state, e.g. after loading a state cache
    pub fn replace(&self, state: AppState) -> StoreResult<()> {
        *self.state.lock().map_err(handle_poison)? = Arc::new(state);
        Ok(())
    }

    /// Rebuild state at startup: latest state cache, then every live
    /// operation logged after it. Returns the number of operations replayed.
    ///
    /// Rejected operations and remote operations that were never applied
    /// are skipped, so the result matches what the device last showed.
    pub fn restore_from_log(&self, store: &OperationLogStore) -> StoreResult<usize> {
        let (base, after_seq) = match store.load_state_cache()? {
            Some(cache) => (cache.state, cache.metadata.last_applied_seq),
            None => (AppState::new(), 0),
        };
        let ops: Vec<Operation> = store
            .get_ops_after_seq(after_seq)?
            .into_iter()
            .filter(|e| e.rejected_at.is_none() && (e.source == OpSource::Local || e.applied))
            .map(|e| e.op)
            .collect();

        self.replace(base)?;
        self.bulk_apply(&ops)?;
        tracing::info!(cache_seq = after_seq, replayed = ops.len(), "Restored state from log");
        Ok(ops.len())
    }
}
