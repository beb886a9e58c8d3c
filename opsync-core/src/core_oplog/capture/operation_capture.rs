/*
    operation_capture.rs - Records local state changes as operations

    Outermost layer of the reducer chain. After the inner layers accept a
    persistent, non-remote action, capture stamps it into an Operation and
    appends it to the log:

    - opType / entityType / entityId(s) come from the action meta
    - payload is the action payload wrapped as a multi-entity payload
      (full-state actions keep their payload as-is)
    - vectorClock is the tracker clock with this client incremented
    - id is a UUIDv7, timestamp is the wall clock

    The operation and its clock are written as one record, so a crash can
    never leave an operation whose counter the tracker does not know.
    Nothing is captured while the container replays stored operations.
*/

use super::validator::validate_operation_payload;
use crate::core_oplog::apply::{HydrationState, MetaReducer, Reducer};
use crate::core_oplog::clock::VectorClockTracker;
use crate::core_oplog::model::{
    Action, ActionMeta, AppState, MultiEntityPayload, Operation, CURRENT_SCHEMA_VERSION,
};
use crate::core_oplog::now_millis;
use crate::core_oplog::store::errors::StoreResult;
use crate::core_oplog::store::{OpSource, OperationLogStore};
use crate::metrics::{record_counter, OPS_CAPTURED, OPS_SKIPPED_INVALID};
use serde_json::Value;
use std::sync::Arc;

pub struct OperationCapture {
    client_id: String,
    store: Arc<OperationLogStore>,
    tracker: Arc<VectorClockTracker>,
    hydration: Arc<HydrationState>,
}

impl OperationCapture {
    pub fn new(
        client_id: impl Into<String>,
        store: Arc<OperationLogStore>,
        tracker: Arc<VectorClockTracker>,
        hydration: Arc<HydrationState>,
    ) -> Self {
        OperationCapture {
            client_id: client_id.into(),
            store,
            tracker,
            hydration,
        }
    }

    fn should_capture(&self, action: &Action) -> bool {
        action.is_persistent() && !action.is_remote() && !self.hydration.is_applying_remote_ops()
    }

    /// Build, validate and append the operation for `action`.
    ///
    /// Returns the log sequence, or `None` if validation dropped it.
    fn capture(&self, action: &Action, meta: &ActionMeta) -> StoreResult<Option<u64>> {
        let clock = self.tracker.peek_next_clock(&self.client_id)?;
        let op = self.build_operation(action, meta, clock);

        match validate_operation_payload(&op) {
            Ok(warnings) => {
                for warning in warnings {
                    tracing::warn!(op_id = %op.id, action = %op.action_type, "{}", warning);
                }
            }
            Err(e) => {
                tracing::error!(
                    op_id = %op.id,
                    action = %op.action_type,
                    entity_type = %op.entity_type,
                    error = %e,
                    "Skipping invalid operation"
                );
                record_counter(OPS_SKIPPED_INVALID, 1);
                return Ok(None);
            }
        }

        let seq = self.store.append_with_clock(op.clone(), OpSource::Local, &op.vector_clock)?;
        self.tracker.observe(&op.vector_clock)?;
        record_counter(OPS_CAPTURED, 1);
        tracing::debug!(
            seq,
            op_id = %op.id,
            action = %op.action_type,
            op_type = %op.op_type,
            entity_type = %op.entity_type,
            entity_id = op.entity_id.as_deref().unwrap_or(""),
            client_id = %self.client_id,
            "Captured operation"
        );
        Ok(Some(seq))
    }

    fn build_operation(
        &self,
        action: &Action,
        meta: &ActionMeta,
        clock: crate::core_oplog::clock::VectorClock,
    ) -> Operation {
        let entity_ids = meta
            .entity_ids
            .clone()
            .or_else(|| meta.entity_id.clone().map(|id| vec![id]));

        let payload = if meta.op_type.is_full_state() {
            Value::Object(action.payload.clone())
        } else {
            MultiEntityPayload::new(action.payload.clone()).into_value()
        };

        Operation {
            id: Operation::new_id(),
            action_type: action.action_type.clone(),
            op_type: meta.op_type,
            entity_type: meta.entity_type,
            entity_id: meta.entity_id.clone(),
            entity_ids,
            payload,
            client_id: self.client_id.clone(),
            vector_clock: clock,
            timestamp: now_millis(),
            schema_version: CURRENT_SCHEMA_VERSION,
            is_payload_encrypted: false,
        }
    }
}

impl MetaReducer for OperationCapture {
    fn name(&self) -> &'static str {
        "capture"
    }

    fn wrap(
        &self,
        state: Arc<AppState>,
        action: &Action,
        next: &dyn Reducer,
    ) -> StoreResult<Arc<AppState>> {
        let next_state = next.reduce(state, action)?;
        if self.should_capture(action) {
            if let Some(meta) = action.meta.as_ref() {
                self.capture(action, meta)?;
            }
        }
        Ok(next_state)
    }
}
