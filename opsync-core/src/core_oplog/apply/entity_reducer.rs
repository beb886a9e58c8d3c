/*
    entity_reducer.rs - Generic keyed-entity reducer

    Base of the reducer chain. Interprets persistent actions by their
    declared OpType against the keyed collections and singletons of
    AppState. Domain-specific field semantics are out of scope here; the
    reducer only knows about ids, `entity`, and `changes`.

    Every branch is idempotent, so replaying an operation twice leaves the
    same state as replaying it once.
*/

use super::reducer::Reducer;
use crate::core_oplog::model::{
    Action, AppState, Entity, EntityType, OpType, StoragePattern, FULL_STATE_KEY,
};
use crate::core_oplog::store::errors::{StoreError, StoreResult};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Base reducer for persistent entity actions
#[derive(Debug, Default, Clone, Copy)]
pub struct EntityReducer;

impl Reducer for EntityReducer {
    fn reduce(&self, state: Arc<AppState>, action: &Action) -> StoreResult<Arc<AppState>> {
        let Some(meta) = action.meta.as_ref().filter(|m| m.is_persistent) else {
            return Ok(state);
        };

        if meta.op_type.is_full_state() {
            return replace_state(action);
        }

        match meta.entity_type.storage_pattern() {
            StoragePattern::Collection => reduce_collection(state, action, meta.entity_type),
            StoragePattern::Singleton => reduce_singleton(state, action, meta.entity_type),
            // Virtual entities and the ALL sentinel carry nothing to apply here
            StoragePattern::Virtual | StoragePattern::FullState => Ok(state),
        }
    }
}

fn replace_state(action: &Action) -> StoreResult<Arc<AppState>> {
    let payload = action.payload.get(FULL_STATE_KEY).cloned().ok_or_else(|| {
        StoreError::InvalidOperation(format!(
            "{} has no {} payload",
            action.action_type, FULL_STATE_KEY
        ))
    })?;
    let state = AppState::from_value(payload).map_err(|e| {
        StoreError::Deserialization(format!("full-state payload of {}: {}", action.action_type, e))
    })?;
    Ok(Arc::new(state))
}

fn reduce_collection(
    mut state: Arc<AppState>,
    action: &Action,
    entity_type: EntityType,
) -> StoreResult<Arc<AppState>> {
    let Some(op_type) = action.op_type() else {
        return Ok(state);
    };

    match op_type {
        OpType::Create => {
            let Some(entity) = created_entity(&action.payload) else {
                tracing::debug!(action = %action.action_type, "Create without entity object");
                return Ok(state);
            };
            let Some(id) = entity_id_of(&entity) else {
                return Err(StoreError::InvalidOperation(format!(
                    "{} creates a {} without id",
                    action.action_type, entity_type
                )));
            };
            collection(&mut state, entity_type)?.upsert(id, entity);
        }
        OpType::Update | OpType::Move => {
            let Some(id) = target_id(action) else {
                return Ok(state);
            };
            if state.entity(entity_type, &id).is_none() {
                tracing::debug!(%entity_type, entity_id = %id, "Update for missing entity ignored");
                return Ok(state);
            }
            let changes = update_changes(&action.payload);
            collection(&mut state, entity_type)?.merge_into(&id, &changes);
        }
        OpType::Delete => {
            let ids = delete_ids(action);
            let present = state.collection(entity_type).is_some_and(|c| ids.iter().any(|id| c.contains(id)));
            if present {
                let coll = collection(&mut state, entity_type)?;
                for id in &ids {
                    coll.remove(id);
                }
            }
        }
        OpType::Batch => {
            let ids = action
                .meta
                .as_ref()
                .and_then(|m| m.entity_ids.clone())
                .unwrap_or_default();
            let Some(changes) = action.payload.get("changes").and_then(Value::as_object) else {
                return Ok(state);
            };
            let existing: Vec<String> = ids
                .into_iter()
                .filter(|id| state.entity(entity_type, id).is_some())
                .collect();
            if !existing.is_empty() {
                let coll = collection(&mut state, entity_type)?;
                for id in existing {
                    // Per-id change sets take precedence over a shared one
                    match changes.get(&id).and_then(Value::as_object) {
                        Some(per_id) => coll.merge_into(&id, per_id),
                        None => coll.merge_into(&id, changes),
                    };
                }
            }
        }
        // Handled by the LWW layer
        OpType::LwwUpdate => {}
        OpType::SyncImport | OpType::BackupImport | OpType::Repair => {}
    }

    Ok(state)
}

fn reduce_singleton(
    mut state: Arc<AppState>,
    action: &Action,
    entity_type: EntityType,
) -> StoreResult<Arc<AppState>> {
    match action.op_type() {
        Some(OpType::Create | OpType::Update | OpType::Move | OpType::Batch) => {
            let changes = update_changes(&action.payload);
            if changes.is_empty() {
                return Ok(state);
            }
            let singletons = &mut Arc::make_mut(&mut state).singletons;
            let slot = singletons.entry(entity_type).or_insert_with(|| Value::Object(Map::new()));
            match slot {
                Value::Object(obj) => obj.extend(changes),
                other => *other = Value::Object(changes),
            }
        }
        Some(OpType::Delete) => {
            if state.singleton(entity_type).is_some() {
                Arc::make_mut(&mut state).singletons.remove(&entity_type);
            }
        }
        _ => {}
    }
    Ok(state)
}

fn collection(
    state: &mut Arc<AppState>,
    entity_type: EntityType,
) -> StoreResult<&mut crate::core_oplog::model::EntityCollection> {
    Arc::make_mut(state)
        .collection_mut(entity_type)
        .ok_or_else(|| StoreError::InvalidOperation(format!("{} is not a collection", entity_type)))
}

/// Entity carried by a create: `entity`, the flat payload, or the first nested object with an id
fn created_entity(payload: &Map<String, Value>) -> Option<Entity> {
    if let Some(entity) = payload.get("entity").and_then(Value::as_object) {
        return Some(entity.clone());
    }
    if payload.contains_key("id") {
        return Some(payload.clone());
    }
    payload
        .values()
        .filter_map(Value::as_object)
        .find(|obj| obj.contains_key("id"))
        .cloned()
}

fn entity_id_of(entity: &Entity) -> Option<String> {
    match entity.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn target_id(action: &Action) -> Option<String> {
    action
        .payload
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| action.meta.as_ref().and_then(|m| m.entity_id.clone()))
}

/// `changes` if present, otherwise the flat payload without its id
fn update_changes(payload: &Map<String, Value>) -> Map<String, Value> {
    match payload.get("changes").and_then(Value::as_object) {
        Some(changes) => changes.clone(),
        None => {
            let mut flat = payload.clone();
            flat.remove("id");
            flat
        }
    }
}

fn delete_ids(action: &Action) -> Vec<String> {
    let mut ids = Vec::new();
    if let Some(meta) = &action.meta {
        ids.extend(meta.entity_ids.iter().flatten().cloned());
        ids.extend(meta.entity_id.iter().cloned());
    }
    if let Some(list) = action.payload.get("ids").and_then(Value::as_array) {
        ids.extend(list.iter().filter_map(Value::as_str).map(str::to_string));
    }
    if let Some(id) = action.payload.get("id").and_then(Value::as_str) {
        ids.push(id.to_string());
    }
    ids.sort();
    ids.dedup();
    ids
}
