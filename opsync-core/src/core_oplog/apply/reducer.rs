/*
    reducer.rs - State transition chain

    A Reducer is a pure `(state, action) -> state` function. A MetaReducer
    wraps the next reducer in the chain and may inspect, rewrite, short
    circuit, or observe the transition.

    ReducerChain folds an ordered list of MetaReducers over a base reducer:
    layers[0] is outermost and sees the action first.

        Capture -> LWW resolver -> EntityReducer

    Capture must be outermost so it sees locally issued actions before any
    layer could mark them remote. The inner layers must be idempotent under
    replay, because hydration feeds them the same operations again after
    a restart.
*/

use crate::core_oplog::model::{Action, AppState};
use crate::core_oplog::store::errors::StoreResult;
use std::sync::Arc;

/// Pure state transition
pub trait Reducer: Send + Sync {
    fn reduce(&self, state: Arc<AppState>, action: &Action) -> StoreResult<Arc<AppState>>;
}

impl<F> Reducer for F
where
    F: Fn(Arc<AppState>, &Action) -> StoreResult<Arc<AppState>> + Send + Sync,
{
    fn reduce(&self, state: Arc<AppState>, action: &Action) -> StoreResult<Arc<AppState>> {
        self(state, action)
    }
}

/// Layer wrapping the rest of the chain
pub trait MetaReducer: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    fn wrap(
        &self,
        state: Arc<AppState>,
        action: &Action,
        next: &dyn Reducer,
    ) -> StoreResult<Arc<AppState>>;
}

/// Ordered meta-reducers over a base reducer
pub struct ReducerChain {
    layers: Vec<Box<dyn MetaReducer>>,
    base: Box<dyn Reducer>,
}

impl ReducerChain {
    pub fn new(base: impl Reducer + 'static) -> Self {
        ReducerChain {
            layers: Vec::new(),
            base: Box::new(base),
        }
    }

    /// Add a layer inside the ones already present
    pub fn layer(mut self, layer: impl MetaReducer + 'static) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    /// Layer names, outermost first
    pub fn layer_names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|l| l.name()).collect()
    }
}

impl Reducer for ReducerChain {
    fn reduce(&self, state: Arc<AppState>, action: &Action) -> StoreResult<Arc<AppState>> {
        Next { layers: &self.layers, base: self.base.as_ref() }.reduce(state, action)
    }
}

/// Remainder of the chain below the current layer
struct Next<'a> {
    layers: &'a [Box<dyn MetaReducer>],
    base: &'a dyn Reducer,
}

impl Reducer for Next<'_> {
    fn reduce(&self, state: Arc<AppState>, action: &Action) -> StoreResult<Arc<AppState>> {
        match self.layers.split_first() {
            Some((layer, rest)) => {
                layer.wrap(state, action, &Next { layers: rest, base: self.base })
            }
            None => self.base.reduce(state, action),
        }
    }
}
