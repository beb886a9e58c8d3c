/*
    validator.rs - Write-time payload validation

    Checks the payload shape of an operation before capture persists it.
    Hard failures keep the operation out of the log; softer oddities are
    returned as warnings and logged.

    Encrypted payloads are opaque and always pass.
*/

use crate::core_oplog::model::{OpType, Operation, FULL_STATE_KEY};
use crate::core_oplog::store::errors::ValidationError;
use serde_json::{Map, Value};

/// Keys that identify a bare (unwrapped) full-state payload
const STATE_KEYS: &[&str] = &["collections", "singletons"];

/// Validate `op.payload` for its operation type.
///
/// Returns the list of non-fatal warnings on success.
pub fn validate_operation_payload(op: &Operation) -> Result<Vec<String>, ValidationError> {
    if op.is_payload_encrypted {
        return Ok(Vec::new());
    }

    let payload = op.payload.as_object().ok_or_else(|| ValidationError::InvalidField {
        field: "payload".to_string(),
        reason: format!("must be an object, got {}", json_kind(&op.payload)),
    })?;

    let body = if payload.contains_key("actionPayload") || payload.contains_key("entityChanges") {
        validate_multi_entity(payload)?
    } else {
        payload
    };

    let mut warnings = Vec::new();
    match op.op_type {
        OpType::Create => validate_create(op, body, &mut warnings)?,
        OpType::Update | OpType::Move => {
            if !body.contains_key("id") && !body.contains_key("changes") && op.entity_id.is_none() {
                warnings.push(format!(
                    "{} payload for {} has no id, changes, or entity id",
                    op.op_type, op.entity_type
                ));
            }
        }
        OpType::Delete => {
            let has_ids = op.entity_id.is_some()
                || op.entity_ids.as_ref().is_some_and(|ids| !ids.is_empty())
                || body.contains_key("id")
                || body.contains_key("ids");
            if !has_ids {
                warnings.push(format!("delete of {} names no entity ids", op.entity_type));
            }
        }
        OpType::Batch => {
            if body.is_empty() {
                return Err(ValidationError::InvalidField {
                    field: "payload".to_string(),
                    reason: "batch payload is empty".to_string(),
                });
            }
        }
        OpType::SyncImport | OpType::BackupImport => {
            let recognizable = body.contains_key(FULL_STATE_KEY)
                || STATE_KEYS.iter().any(|key| body.contains_key(*key));
            if !recognizable {
                return Err(ValidationError::InvalidField {
                    field: "payload".to_string(),
                    reason: format!("{} payload does not look like application state", op.op_type),
                });
            }
        }
        OpType::LwwUpdate => {
            if !body.contains_key("id") && op.entity_id.is_none() {
                warnings.push(format!("LWW update for {} carries no id", op.entity_type));
            }
        }
        OpType::Repair => {}
    }

    Ok(warnings)
}

fn validate_multi_entity(payload: &Map<String, Value>) -> Result<&Map<String, Value>, ValidationError> {
    let action_payload = payload
        .get("actionPayload")
        .and_then(Value::as_object)
        .ok_or_else(|| ValidationError::InvalidField {
            field: "actionPayload".to_string(),
            reason: "must be an object".to_string(),
        })?;

    let changes = payload
        .get("entityChanges")
        .and_then(Value::as_array)
        .ok_or_else(|| ValidationError::InvalidField {
            field: "entityChanges".to_string(),
            reason: "must be an array".to_string(),
        })?;

    for (i, change) in changes.iter().enumerate() {
        for field in ["entityType", "entityId"] {
            if change.get(field).is_none() {
                return Err(ValidationError::MissingField(format!("entityChanges[{}].{}", i, field)));
            }
        }
    }

    Ok(action_payload)
}

fn validate_create(
    op: &Operation,
    body: &Map<String, Value>,
    warnings: &mut Vec<String>,
) -> Result<(), ValidationError> {
    let entity = body
        .get("entity")
        .and_then(Value::as_object)
        .or_else(|| body.values().find_map(|v| v.as_object().filter(|o| o.contains_key("id"))));

    match entity {
        Some(entity) if !entity.contains_key("id") => {
            Err(ValidationError::MissingField(format!("{} entity id", op.entity_type)))
        }
        Some(_) => Ok(()),
        None if body.contains_key("id") => Ok(()),
        None => {
            warnings.push(format!("create of {} carries no entity object", op.entity_type));
            Ok(())
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_oplog::clock::VectorClock;
    use crate::core_oplog::model::{ActionType, EntityType, CURRENT_SCHEMA_VERSION};
    use serde_json::json;

    fn op(op_type: OpType, payload: Value) -> Operation {
        Operation {
            id: "op".into(),
            action_type: ActionType::new("[Task] Something"),
            op_type,
            entity_type: EntityType::Task,
            entity_id: None,
            entity_ids: None,
            payload,
            client_id: "c".into(),
            vector_clock: VectorClock::new(),
            timestamp: 0,
            schema_version: CURRENT_SCHEMA_VERSION,
            is_payload_encrypted: false,
        }
    }

    fn wrap(action_payload: Value) -> Value {
        json!({"actionPayload": action_payload, "entityChanges": []})
    }

    #[test]
    fn test_encrypted_payload_skipped() {
        let mut encrypted = op(OpType::Create, json!("opaque"));
        encrypted.is_payload_encrypted = true;
        assert!(validate_operation_payload(&encrypted).unwrap().is_empty());
    }

    #[test]
    fn test_non_object_payload_rejected() {
        let err = validate_operation_payload(&op(OpType::Update, json!([1, 2]))).unwrap_err();
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn test_multi_entity_shape_checked() {
        let bad = json!({"actionPayload": "x", "entityChanges": []});
        assert!(validate_operation_payload(&op(OpType::Update, bad)).is_err());

        let missing_id = json!({
            "actionPayload": {"id": "t1"},
            "entityChanges": [{"entityType": "TAG"}]
        });
        let err = validate_operation_payload(&op(OpType::Update, missing_id)).unwrap_err();
        assert!(matches!(err, ValidationError::MissingField(f) if f == "entityChanges[0].entityId"));
    }

    #[test]
    fn test_create_rules() {
        let ok = wrap(json!({"task": {"id": "t1", "title": "x"}}));
        assert!(validate_operation_payload(&op(OpType::Create, ok)).unwrap().is_empty());

        let no_id = wrap(json!({"entity": {"title": "x"}}));
        assert!(validate_operation_payload(&op(OpType::Create, no_id)).is_err());

        let no_entity = wrap(json!({"title": "x"}));
        assert_eq!(validate_operation_payload(&op(OpType::Create, no_entity)).unwrap().len(), 1);
    }

    #[test]
    fn test_update_and_delete_warnings() {
        let unusual = wrap(json!({"foo": 1}));
        assert_eq!(validate_operation_payload(&op(OpType::Update, unusual.clone())).unwrap().len(), 1);
        assert_eq!(validate_operation_payload(&op(OpType::Delete, unusual)).unwrap().len(), 1);

        let mut with_id = op(OpType::Delete, wrap(json!({})));
        with_id.entity_id = Some("t1".into());
        assert!(validate_operation_payload(&with_id).unwrap().is_empty());
    }

    #[test]
    fn test_batch_and_imports() {
        assert!(validate_operation_payload(&op(OpType::Batch, json!({}))).is_err());
        assert!(validate_operation_payload(&op(OpType::Batch, json!({"changes": []}))).is_ok());

        assert!(validate_operation_payload(&op(OpType::SyncImport, json!({"foo": 1}))).is_err());
        assert!(validate_operation_payload(&op(OpType::SyncImport, json!({"collections": {}}))).is_ok());
        assert!(
            validate_operation_payload(&op(OpType::BackupImport, json!({"appDataComplete": {}}))).is_ok()
        );
        assert!(validate_operation_payload(&op(OpType::Repair, json!({"anything": true}))).is_ok());
    }
}
