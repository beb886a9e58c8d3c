/*
    converter.rs - Operation to replay action

    Rebuilds the state-change request that produced a stored operation:
    1. Resolve retired action names through the alias table
    2. Full-state ops: wrap the payload under FULL_STATE_KEY, once
    3. Other ops: take `actionPayload` of a multi-entity payload, or the
       legacy flat payload as-is
    4. Mark the action persistent and remote so capture ignores it

    Payload fields live in `Action::payload`, separate from the dispatch
    type, so an entity field literally named `type` cannot replace it.
*/

use crate::core_oplog::model::{
    Action, ActionAliasTable, ActionMeta, MultiEntityPayload, Operation, FULL_STATE_KEY,
};
use serde_json::{Map, Value};
use std::sync::OnceLock;

fn default_aliases() -> &'static ActionAliasTable {
    static ALIASES: OnceLock<ActionAliasTable> = OnceLock::new();
    ALIASES.get_or_init(ActionAliasTable::default)
}

/// Convert with the built-in alias table
pub fn convert_op_to_action(op: &Operation) -> Action {
    convert_op_to_action_with(op, default_aliases())
}

pub fn convert_op_to_action_with(op: &Operation, aliases: &ActionAliasTable) -> Action {
    Action {
        action_type: aliases.resolve(&op.action_type),
        payload: replay_payload(op),
        meta: Some(ActionMeta {
            is_persistent: true,
            is_remote: true,
            entity_type: op.entity_type,
            entity_id: op.entity_id.clone(),
            entity_ids: op.entity_ids.clone(),
            op_type: op.op_type,
        }),
    }
}

fn replay_payload(op: &Operation) -> Map<String, Value> {
    if op.op_type.is_full_state() {
        return match &op.payload {
            Value::Object(obj) if obj.contains_key(FULL_STATE_KEY) => obj.clone(),
            other => {
                let mut wrapped = Map::new();
                wrapped.insert(FULL_STATE_KEY.to_string(), other.clone());
                wrapped
            }
        };
    }

    if let Some(action_payload) = MultiEntityPayload::action_payload_of(&op.payload) {
        return action_payload.clone();
    }

    match &op.payload {
        Value::Object(flat) => flat.clone(),
        Value::Null => Map::new(),
        other => {
            tracing::warn!(
                op_id = %op.id,
                encrypted = op.is_payload_encrypted,
                "Replaying operation with non-object payload ({}), using empty payload",
                if other.is_string() { "string" } else { "scalar or array" }
            );
            Map::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_oplog::clock::VectorClock;
    use crate::core_oplog::model::{ActionType, EntityType, OpType, CURRENT_SCHEMA_VERSION};
    use serde_json::json;

    fn op(op_type: OpType, payload: Value) -> Operation {
        Operation {
            id: "op-1".into(),
            action_type: ActionType::new("[Task] Add Task"),
            op_type,
            entity_type: EntityType::Task,
            entity_id: Some("task-1".into()),
            entity_ids: None,
            payload,
            client_id: "client-a".into(),
            vector_clock: VectorClock::with_entry("client-a", 1),
            timestamp: 1,
            schema_version: CURRENT_SCHEMA_VERSION,
            is_payload_encrypted: false,
        }
    }

    #[test]
    fn test_flat_payload_spread_and_meta() {
        let action = convert_op_to_action(&op(
            OpType::Create,
            json!({"title": "My Task", "timeSpent": 3600, "done": true}),
        ));

        assert_eq!(action.action_type.as_str(), "[Task] Add Task");
        assert_eq!(action.payload["title"], "My Task");
        assert_eq!(action.payload["timeSpent"], 3600);
        assert_eq!(action.payload["done"], true);

        let meta = action.meta.unwrap();
        assert!(meta.is_persistent);
        assert!(meta.is_remote);
        assert_eq!(meta.entity_type, EntityType::Task);
        assert_eq!(meta.entity_id.as_deref(), Some("task-1"));
        assert_eq!(meta.entity_ids, None);
        assert_eq!(meta.op_type, OpType::Create);
    }

    #[test]
    fn test_entity_ids_carried_into_meta() {
        let mut batch = op(OpType::Batch, json!({"changes": {}}));
        batch.entity_ids = Some(vec!["task-1".into(), "task-2".into(), "task-3".into()]);
        let action = convert_op_to_action(&batch);
        assert_eq!(action.meta.unwrap().entity_ids.unwrap().len(), 3);
    }

    #[test]
    fn test_multi_entity_payload_uses_action_payload_only() {
        let payload = json!({
            "actionPayload": {"id": "task-1", "changes": {"title": "Updated"}},
            "entityChanges": [{"entityType": "PROJECT", "entityId": "p1", "opType": "UPD"}]
        });
        let action = convert_op_to_action(&op(OpType::Update, payload));
        assert_eq!(action.payload["changes"]["title"], "Updated");
        assert!(action.payload.get("entityChanges").is_none());
        assert!(action.payload.get("actionPayload").is_none());
    }

    #[test]
    fn test_type_field_in_payload_kept_out_of_dispatch_type() {
        let action = convert_op_to_action(&op(OpType::Create, json!({"type": "COUNTER", "id": "c1"})));
        assert_eq!(action.action_type.as_str(), "[Task] Add Task");
        assert_eq!(action.payload["type"], "COUNTER");
        assert_eq!(action.to_json()["type"], "[Task] Add Task");
    }

    #[test]
    fn test_full_state_payload_wrapped_once() {
        for op_type in [OpType::SyncImport, OpType::BackupImport, OpType::Repair] {
            let state = json!({"collections": {"TASK": {"ids": ["t1"], "entities": {}}}});
            let mut import = op(op_type, state.clone());
            import.entity_type = EntityType::All;

            let action = convert_op_to_action(&import);
            assert_eq!(action.payload.len(), 1);
            assert_eq!(action.payload[FULL_STATE_KEY], state);
            assert!(action.payload.get("collections").is_none());

            import.payload = Value::Object(action.payload.clone());
            let again = convert_op_to_action(&import);
            assert_eq!(again.payload, action.payload);
            assert!(again.payload[FULL_STATE_KEY].get(FULL_STATE_KEY).is_none());

            let meta = again.meta.unwrap();
            assert_eq!(meta.entity_type, EntityType::All);
            assert_eq!(meta.op_type, op_type);
            assert!(meta.is_remote);
        }
    }

    #[test]
    fn test_alias_resolution() {
        let aliases = ActionAliasTable::from_entries([("[Task] Add Task", "[Task] Create Task")]);
        let action = convert_op_to_action_with(&op(OpType::Create, json!({})), &aliases);
        assert_eq!(action.action_type.as_str(), "[Task] Create Task");
    }

    #[test]
    fn test_empty_and_null_payloads() {
        assert!(convert_op_to_action(&op(OpType::Update, json!({}))).payload.is_empty());
        assert!(convert_op_to_action(&op(OpType::Update, Value::Null)).payload.is_empty());
    }
}
