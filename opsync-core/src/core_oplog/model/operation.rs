/*
    operation.rs - The persisted operation record

    An Operation is one persistent state change plus its causal metadata.
    Once appended to the log it is never mutated; transient copies (for
    example with a decrypted payload) are produced with `Clone`.
*/

use super::types::{ActionType, EntityType, OpType};
use crate::core_oplog::clock::VectorClock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Schema version stamped on newly captured operations
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Key under which full-state payloads are wrapped on replay
pub const FULL_STATE_KEY: &str = "appDataComplete";

/// One persistent state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: String,
    pub action_type: ActionType,
    pub op_type: OpType,
    pub entity_type: EntityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_ids: Option<Vec<String>>,
    /// Plain object, or a base64 ciphertext string when `is_payload_encrypted`
    pub payload: Value,
    pub client_id: String,
    pub vector_clock: VectorClock,
    /// Wall clock in milliseconds since the Unix epoch
    pub timestamp: u64,
    pub schema_version: u32,
    #[serde(default)]
    pub is_payload_encrypted: bool,
}

impl Operation {
    /// Fresh time-ordered operation id
    pub fn new_id() -> String {
        uuid::Uuid::now_v7().to_string()
    }

    /// Ids this operation touches: `entity_ids` if present, otherwise `entity_id`
    pub fn target_ids(&self) -> Vec<String> {
        match (&self.entity_ids, &self.entity_id) {
            (Some(ids), _) if !ids.is_empty() => ids.clone(),
            (_, Some(id)) => vec![id.clone()],
            _ => Vec::new(),
        }
    }

    /// True if this operation targets the given entity
    pub fn touches(&self, entity_type: EntityType, entity_id: &str) -> bool {
        self.entity_type == entity_type && self.target_ids().iter().any(|id| id == entity_id)
    }
}

/// Collateral change recorded alongside a multi-entity action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityChange {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub op_type: OpType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<Value>,
}

/// Payload of an operation whose action touched several entities.
///
/// Only `action_payload` is replayed; `entity_changes` is informational.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiEntityPayload {
    pub action_payload: Map<String, Value>,
    #[serde(default)]
    pub entity_changes: Vec<EntityChange>,
}

impl MultiEntityPayload {
    pub fn new(action_payload: Map<String, Value>) -> Self {
        MultiEntityPayload {
            action_payload,
            entity_changes: Vec::new(),
        }
    }

    /// True if `payload` has the multi-entity shape
    pub fn detect(payload: &Value) -> bool {
        payload
            .as_object()
            .map(|obj| {
                obj.get("actionPayload").is_some_and(Value::is_object)
                    && obj.get("entityChanges").is_some_and(Value::is_array)
            })
            .unwrap_or(false)
    }

    /// Borrow the replayable part of a multi-entity payload
    pub fn action_payload_of(payload: &Value) -> Option<&Map<String, Value>> {
        if Self::detect(payload) {
            payload.get("actionPayload").and_then(Value::as_object)
        } else {
            None
        }
    }

    pub fn into_value(self) -> Value {
        let mut obj = Map::new();
        obj.insert("actionPayload".to_string(), Value::Object(self.action_payload));
        obj.insert(
            "entityChanges".to_string(),
            serde_json::to_value(self.entity_changes).unwrap_or_else(|_| Value::Array(Vec::new())),
        );
        Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Operation {
        Operation {
            id: Operation::new_id(),
            action_type: ActionType::new("[Task] Update Task"),
            op_type: OpType::Update,
            entity_type: EntityType::Task,
            entity_id: Some("task-1".to_string()),
            entity_ids: None,
            payload: json!({"id": "task-1", "changes": {"title": "x"}}),
            client_id: "client-a".to_string(),
            vector_clock: VectorClock::with_entry("client-a", 1),
            timestamp: 1_700_000_000_000,
            schema_version: CURRENT_SCHEMA_VERSION,
            is_payload_encrypted: false,
        }
    }

    #[test]
    fn test_wire_shape_is_camel_case() {
        let op = sample();
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["actionType"], "[Task] Update Task");
        assert_eq!(json["opType"], "UPD");
        assert_eq!(json["entityType"], "TASK");
        assert_eq!(json["entityId"], "task-1");
        assert!(json.get("entityIds").is_none());
        assert_eq!(json["vectorClock"], json!({"client-a": 1}));
        assert_eq!(json["schemaVersion"], 2);
        assert_eq!(json["isPayloadEncrypted"], false);
    }

    #[test]
    fn test_ids_are_time_ordered() {
        let a = Operation::new_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = Operation::new_id();
        assert!(a < b);
    }

    #[test]
    fn test_target_ids() {
        let mut op = sample();
        assert_eq!(op.target_ids(), vec!["task-1".to_string()]);
        op.entity_ids = Some(vec!["a".into(), "b".into()]);
        assert_eq!(op.target_ids(), vec!["a".to_string(), "b".to_string()]);
        op.entity_ids = None;
        op.entity_id = None;
        assert!(op.target_ids().is_empty());
    }

    #[test]
    fn test_multi_entity_detection() {
        assert!(MultiEntityPayload::detect(&json!({"actionPayload": {}, "entityChanges": []})));
        assert!(!MultiEntityPayload::detect(&json!({"actionPayload": {}})));
        assert!(!MultiEntityPayload::detect(&json!({"actionPayload": 1, "entityChanges": []})));
        assert!(!MultiEntityPayload::detect(&json!("ciphertext")));
    }

    #[test]
    fn test_multi_entity_round_trip_shape() {
        let mut action_payload = Map::new();
        action_payload.insert("id".into(), json!("t1"));
        let mut payload = MultiEntityPayload::new(action_payload);
        payload.entity_changes.push(EntityChange {
            entity_type: EntityType::Project,
            entity_id: "p1".into(),
            op_type: OpType::Update,
            changes: None,
        });
        let value = payload.into_value();
        assert_eq!(value["actionPayload"]["id"], "t1");
        assert_eq!(value["entityChanges"][0]["entityType"], "PROJECT");
        assert_eq!(
            MultiEntityPayload::action_payload_of(&value).unwrap().get("id"),
            Some(&json!("t1"))
        );
    }
}
