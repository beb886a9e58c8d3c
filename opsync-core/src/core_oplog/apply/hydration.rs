/*
    hydration.rs - Bulk application of operations

    Folds an ordered batch of operations through the reducer chain as one
    state transition. Used for startup replay and for remote batches, so
    observers see one change instead of hundreds.

    - Order is significant: operations are applied in the order given
    - An empty batch returns the very same Arc (identity is preserved)
    - Payloads must already be decrypted

    The fold is synchronous and never yields. Very large batches hold the
    calling thread for their whole duration.
*/

use super::converter::convert_op_to_action_with;
use super::reducer::Reducer;
use crate::core_oplog::model::{ActionAliasTable, AppState, Operation};
use crate::core_oplog::store::errors::{StoreError, StoreResult};
use crate::metrics::{record_counter, Timer, HYDRATION_DURATION_MS, HYDRATION_OPS_APPLIED};
use std::sync::{Arc, OnceLock};

/// Default size above which `StateContainer` logs a batch as a scaling risk
pub const DEFAULT_MAX_HYDRATION_BATCH: usize = 10_000;

fn default_aliases() -> &'static ActionAliasTable {
    static ALIASES: OnceLock<ActionAliasTable> = OnceLock::new();
    ALIASES.get_or_init(ActionAliasTable::default)
}

/// Apply `ops` to `state` in order, with the built-in alias table
pub fn bulk_apply(
    ops: &[Operation],
    state: Arc<AppState>,
    reducer: &dyn Reducer,
) -> StoreResult<Arc<AppState>> {
    bulk_apply_with(ops, state, reducer, default_aliases())
}

pub fn bulk_apply_with(
    ops: &[Operation],
    state: Arc<AppState>,
    reducer: &dyn Reducer,
    aliases: &ActionAliasTable,
) -> StoreResult<Arc<AppState>> {
    if ops.is_empty() {
        return Ok(state);
    }

    if let Some(encrypted) = ops.iter().find(|op| op.is_payload_encrypted) {
        return Err(StoreError::InvalidOperation(format!(
            "operation {} still has an encrypted payload, decrypt before hydration",
            encrypted.id
        )));
    }

    let timer = Timer::new(HYDRATION_DURATION_MS);
    let result = ops.iter().try_fold(state, |state, op| {
        let action = convert_op_to_action_with(op, aliases);
        reducer.reduce(state, &action).map_err(|e| {
            tracing::error!(op_id = %op.id, action = %action.action_type, error = %e, "Hydration failed");
            e
        })
    })?;
    let elapsed_ms = timer.stop();

    record_counter(HYDRATION_OPS_APPLIED, ops.len() as u64);
    tracing::debug!(count = ops.len(), elapsed_ms, "Bulk applied operations");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_oplog::apply::entity_reducer::EntityReducer;
    use crate::core_oplog::apply::lww::LwwResolver;
    use crate::core_oplog::apply::reducer::ReducerChain;
    use crate::core_oplog::clock::VectorClock;
    use crate::core_oplog::model::{ActionType, EntityType, OpType, CURRENT_SCHEMA_VERSION};
    use crate::core_oplog::apply::converter::convert_op_to_action;
    use serde_json::{json, Value};

    fn op(n: u64, op_type: OpType, action: &str, payload: Value) -> Operation {
        Operation {
            id: format!("op-{}", n),
            action_type: ActionType::new(action),
            op_type,
            entity_type: EntityType::Task,
            entity_id: payload.get("id").and_then(Value::as_str).map(str::to_string),
            entity_ids: None,
            payload,
            client_id: "client-a".into(),
            vector_clock: VectorClock::with_entry("client-a", n),
            timestamp: n,
            schema_version: CURRENT_SCHEMA_VERSION,
            is_payload_encrypted: false,
        }
    }

    fn chain() -> ReducerChain {
        ReducerChain::new(EntityReducer).layer(LwwResolver)
    }

    #[test]
    fn test_empty_returns_same_reference() {
        let state = Arc::new(AppState::new());
        let result = bulk_apply(&[], state.clone(), &chain()).unwrap();
        assert!(Arc::ptr_eq(&state, &result));
    }

    #[test]
    fn test_order_is_significant() {
        let ops = vec![
            op(1, OpType::Create, "[Task] Add Task", json!({"id": "t1", "title": "first"})),
            op(2, OpType::Update, "[Task] Update Task", json!({"id": "t1", "changes": {"title": "second"}})),
        ];
        let forward = bulk_apply(&ops, Arc::new(AppState::new()), &chain()).unwrap();
        assert_eq!(forward.entity(EntityType::Task, "t1").unwrap()["title"], "second");

        let reversed: Vec<_> = ops.into_iter().rev().collect();
        let backward = bulk_apply(&reversed, Arc::new(AppState::new()), &chain()).unwrap();
        // Update on a missing entity is a no-op, so the create wins
        assert_eq!(backward.entity(EntityType::Task, "t1").unwrap()["title"], "first");
    }

    #[test]
    fn test_matches_one_at_a_time() {
        let chain = chain();
        let ops: Vec<_> = (1..=100)
            .map(|n| {
                let id = format!("t{}", n % 7);
                if n % 3 == 0 {
                    op(n, OpType::Update, "[Task] Update Task", json!({"id": id, "changes": {"n": n}}))
                } else {
                    op(n, OpType::Create, "[Task] Add Task", json!({"id": id, "n": n}))
                }
            })
            .collect();

        let bulk = bulk_apply(&ops, Arc::new(AppState::new()), &chain).unwrap();
        let mut stepwise = Arc::new(AppState::new());
        for op in &ops {
            stepwise = chain.reduce(stepwise, &convert_op_to_action(op)).unwrap();
        }
        assert_eq!(*bulk, *stepwise);
    }

    #[test]
    fn test_encrypted_ops_rejected() {
        let mut encrypted = op(1, OpType::Create, "[Task] Add Task", json!("Y2lwaGVy"));
        encrypted.is_payload_encrypted = true;
        let err = bulk_apply(&[encrypted], Arc::new(AppState::new()), &chain()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidOperation(_)));
    }

    #[test]
    fn test_reducer_errors_propagate() {
        let failing = |_: Arc<AppState>, _: &crate::core_oplog::model::Action| -> StoreResult<Arc<AppState>> {
            Err(StoreError::InvalidOperation("boom".into()))
        };
        let ops = vec![op(1, OpType::Create, "[Task] Add Task", json!({"id": "t1"}))];
        assert!(bulk_apply(&ops, Arc::new(AppState::new()), &failing).is_err());
    }
}
