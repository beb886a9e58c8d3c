/*
    lww.rs - Last-write-wins conflict resolver layer

    Handles the `[<ENTITY>] LWW Update` action family. Conflict resolution
    decides a winner elsewhere and emits one of these with the winning
    entity's fields; this layer then forces that state:

    - no id in payload           -> warn, state unchanged
    - unknown / non-collection   -> warn, state unchanged
    - entity exists              -> overwrite the given fields, bump `modified`
    - entity missing             -> recreate it from the payload

    Deletion never silently beats a concurrent update: a missing target is
    recreated. Every other action passes through untouched.
*/

use super::reducer::{MetaReducer, Reducer};
use crate::core_oplog::model::{Action, AppState, EntityType};
use crate::core_oplog::now_millis;
use crate::core_oplog::store::errors::StoreResult;
use crate::metrics::{record_counter, LWW_APPLIED, LWW_RECREATED, LWW_REJECTED};
use serde_json::Value;
use std::sync::Arc;

/// Entity field holding the local modification time in milliseconds
pub const MODIFIED_FIELD: &str = "modified";

/// Meta-reducer applying LWW Update actions
#[derive(Debug, Default, Clone, Copy)]
pub struct LwwResolver;

impl MetaReducer for LwwResolver {
    fn name(&self) -> &'static str {
        "lww"
    }

    fn wrap(
        &self,
        state: Arc<AppState>,
        action: &Action,
        next: &dyn Reducer,
    ) -> StoreResult<Arc<AppState>> {
        let Some(entity_name) = action.action_type.lww_entity_name() else {
            return next.reduce(state, action);
        };
        let state = apply_lww_update(state, action, entity_name);
        next.reduce(state, action)
    }
}

/// Apply one LWW update. Rejections return `state` untouched.
fn apply_lww_update(mut state: Arc<AppState>, action: &Action, entity_name: &str) -> Arc<AppState> {
    let Some(id) = action.payload.get("id").and_then(Value::as_str).map(str::to_string) else {
        tracing::warn!(action = %action.action_type, "LWW update entity data has no id, skipping");
        record_counter(LWW_REJECTED, 1);
        return state;
    };

    let entity_type = match EntityType::from_name(entity_name) {
        Some(t) if t.supports_lww() => t,
        _ => {
            tracing::warn!(entity_type = entity_name, entity_id = %id, "Unknown entity type for LWW update: {}", entity_name);
            record_counter(LWW_REJECTED, 1);
            return state;
        }
    };

    let now = now_millis();
    let Some(collection) = Arc::make_mut(&mut state).collection_mut(entity_type) else {
        return state;
    };

    match collection.entities.get_mut(&id) {
        Some(existing) => {
            let previous = existing.get(MODIFIED_FIELD).and_then(Value::as_u64).unwrap_or(0);
            for (key, value) in &action.payload {
                existing.insert(key.clone(), value.clone());
            }
            let modified = now.max(previous.saturating_add(1));
            existing.insert(MODIFIED_FIELD.to_string(), Value::from(modified));
            tracing::debug!(%entity_type, entity_id = %id, modified, "Applied LWW update");
            record_counter(LWW_APPLIED, 1);
        }
        None => {
            tracing::info!(
                %entity_type,
                entity_id = %id,
                "Entity {}:{} not found, recreating from LWW update",
                entity_type,
                id
            );
            let mut entity = action.payload.clone();
            let carried = entity.get(MODIFIED_FIELD).and_then(Value::as_u64).unwrap_or(0);
            entity.insert(MODIFIED_FIELD.to_string(), Value::from(now.max(carried)));
            collection.upsert(id, entity);
            record_counter(LWW_RECREATED, 1);
        }
    }

    state
}
